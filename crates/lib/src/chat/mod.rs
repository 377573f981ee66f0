//! Chat core: wire types, SSE decoding, the chat stream client, and the session registry.
//!
//! A query opens one server-push stream; `content` events extend the assistant message in
//! delivery order and a `final` event seals it with source citations.

mod client;
mod message;
mod registry;
mod sse;
mod stream;
mod types;

pub use client::{ChatBackend, ChatClient};
pub use message::{ReplyState, ThreadEntry};
pub use registry::{ChatError, SessionRegistry, TurnOutcome, TurnTicket};
pub use sse::{parse_event, SseDecoder, SseFrame};
pub use stream::{ChatStream, StreamEvent};
pub use types::{
    ChatMessage, ConversationSummary, Role, SessionId, SharedConversation, Source, TargetLanguage,
    PLACEHOLDER_TITLE,
};
