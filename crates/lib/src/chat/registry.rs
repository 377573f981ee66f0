//! Session registry: the list of conversations, the active conversation's thread, and the
//! single in-flight reply.
//!
//! Every turn gets a ticket. Stream events are applied only while their ticket is still the
//! active conversation's in-flight turn, so events arriving after a session switch, a new
//! chat, or a cancellation are dropped instead of landing in the wrong thread.

use super::client::ChatBackend;
use super::message::{Applied, ReplyState, ThreadEntry};
use super::stream::StreamEvent;
use super::types::{ChatMessage, ConversationSummary, Role, SessionId, TargetLanguage};
use crate::error::ApiError;
use std::future::Future;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("a reply is still streaming in this conversation")]
    Busy,
    #[error("query is empty")]
    EmptyQuery,
    #[error("no active conversation")]
    NoActiveSession,
    #[error("the latest reply is not complete")]
    NotSealed,
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Identifies one turn: its conversation, a registry-unique sequence number, and the index
/// of the assistant entry it writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnTicket {
    session_id: SessionId,
    turn: u64,
    index: usize,
}

impl TurnTicket {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Reply sealed with its sources.
    Sealed,
    /// Stream broke; the partial reply stays unsealed.
    Failed(String),
    /// The conversation was switched away from (or the turn cancelled) mid-stream.
    Abandoned,
}

struct ActiveConversation {
    id: SessionId,
    entries: Vec<ThreadEntry>,
    in_flight: Option<TurnTicket>,
}

impl ActiveConversation {
    fn new(id: SessionId, history: Vec<ChatMessage>) -> Self {
        Self {
            id,
            entries: history.into_iter().map(ThreadEntry::sealed).collect(),
            in_flight: None,
        }
    }
}

pub struct SessionRegistry<B> {
    backend: B,
    sessions: Vec<ConversationSummary>,
    loaded: bool,
    active: Option<ActiveConversation>,
    next_turn: u64,
    notices: Vec<String>,
}

impl<B: ChatBackend> SessionRegistry<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            sessions: Vec::new(),
            loaded: false,
            active: None,
            next_turn: 0,
            notices: Vec::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Cached summaries, most recent first. Does not load.
    pub fn sessions(&self) -> &[ConversationSummary] {
        &self.sessions
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.id.as_str())
    }

    /// Thread of the active conversation (empty when none is active).
    pub fn messages(&self) -> &[ThreadEntry] {
        self.active.as_ref().map(|a| a.entries.as_slice()).unwrap_or(&[])
    }

    /// True while a reply is streaming into the active conversation.
    pub fn is_loading(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.in_flight.is_some())
    }

    /// Non-fatal notices (e.g. history failed to load) not yet shown to the user.
    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    fn notice(&mut self, msg: String) {
        log::warn!("{}", msg);
        self.notices.push(msg);
    }

    /// Conversation list, fetched from the backend on first use. A failed fetch leaves the
    /// list as it was, queues a notice, and is retried on the next call.
    pub async fn list_sessions(&mut self) -> &[ConversationSummary] {
        if !self.loaded {
            self.reload_sessions().await;
        }
        &self.sessions
    }

    /// Fetch the list again. The active conversation is kept even when the backend does not
    /// know it yet (a new chat before its first message). Returns false on failure.
    pub async fn reload_sessions(&mut self) -> bool {
        match self.backend.list_sessions().await {
            Ok(remote) => {
                let active_id = self.active.as_ref().map(|a| a.id.clone());
                let mut merged: Vec<ConversationSummary> = self
                    .sessions
                    .drain(..)
                    .filter(|s| Some(&s.id) == active_id.as_ref() && !remote.iter().any(|r| r.id == s.id))
                    .collect();
                merged.extend(remote);
                log::debug!("loaded {} chat sessions", merged.len());
                self.sessions = merged;
                self.loaded = true;
                true
            }
            Err(e) => {
                self.notice(format!("failed to load chat history: {}", e));
                false
            }
        }
    }

    /// Load the list, then open the most recent conversation or a new one when there is none
    /// (or it cannot be loaded).
    pub async fn bootstrap(&mut self) {
        self.list_sessions().await;
        let first = self.sessions.first().map(|s| s.id.clone());
        match first {
            Some(id) => {
                if self.select_session(&id).await.is_err() {
                    self.new_session();
                }
            }
            None => {
                self.new_session();
            }
        }
    }

    /// Mint a conversation client-side, list it first with the placeholder title, and make it
    /// active. The backend learns about it with the first message.
    pub fn new_session(&mut self) -> SessionId {
        let summary = ConversationSummary::placeholder();
        let id = summary.id.clone();
        self.sessions.insert(0, summary);
        self.active = Some(ActiveConversation::new(id.clone(), Vec::new()));
        log::debug!("new chat session {}", id);
        id
    }

    /// Fetch `id`'s history and make it the active conversation. On failure nothing changes.
    pub async fn select_session(&mut self, id: &str) -> Result<(), ChatError> {
        let history = match self.backend.session_history(id).await {
            Ok(h) => h,
            Err(e) => {
                log::warn!("failed to load conversation {}: {}", id, e);
                return Err(e.into());
            }
        };
        self.active = Some(ActiveConversation::new(id.to_string(), history));
        Ok(())
    }

    /// Overwrite the title of one summary. Returns false when `id` is not listed.
    pub fn update_title(&mut self, id: &str, title: &str) -> bool {
        match self.sessions.iter_mut().find(|s| s.id == id) {
            Some(s) => {
                s.title = title.to_string();
                true
            }
            None => false,
        }
    }

    pub async fn rename_session(&mut self, id: &str, title: &str) -> Result<(), ChatError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ApiError::Validation("title is required".to_string()).into());
        }
        self.backend.rename_session(id, title).await?;
        self.update_title(id, title);
        Ok(())
    }

    /// Delete on the backend and drop the summary. Deleting the active conversation moves to
    /// the next one, or a new chat when none is left.
    pub async fn delete_session(&mut self, id: &str) -> Result<(), ChatError> {
        self.backend.delete_session(id).await?;
        self.sessions.retain(|s| s.id != id);
        if self.active_id() == Some(id) {
            self.active = None;
            let next = self.sessions.first().map(|s| s.id.clone());
            let selected = match next {
                Some(next) => self.select_session(&next).await.is_ok(),
                None => false,
            };
            if !selected {
                self.new_session();
            }
        }
        Ok(())
    }

    /// Start a turn in the active conversation: append the user message and an empty
    /// streaming assistant message. Rejected while another reply is in flight.
    pub fn begin_turn(&mut self, query: &str) -> Result<TurnTicket, ChatError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ChatError::EmptyQuery);
        }
        let active = self.active.as_mut().ok_or(ChatError::NoActiveSession)?;
        if active.in_flight.is_some() {
            return Err(ChatError::Busy);
        }
        active.entries.push(ThreadEntry::sealed(ChatMessage::user(query)));
        active.entries.push(ThreadEntry::streaming());
        let ticket = TurnTicket {
            session_id: active.id.clone(),
            turn: self.next_turn,
            index: active.entries.len() - 1,
        };
        self.next_turn += 1;
        active.in_flight = Some(ticket.clone());
        Ok(ticket)
    }

    /// Apply one stream event for `ticket`. Returns false when the event was dropped because
    /// the turn is no longer current or already terminal.
    pub fn apply(&mut self, ticket: &TurnTicket, event: StreamEvent) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        if active.in_flight.as_ref() != Some(ticket) {
            log::debug!("dropping event for stale turn in session {}", ticket.session_id);
            return false;
        }
        let applied = match active.entries.get_mut(ticket.index) {
            Some(entry) => entry.apply(event),
            None => return false,
        };
        match applied {
            Applied::Appended => {}
            Applied::Sealed { title } => {
                active.in_flight = None;
                if let Some(title) = title {
                    self.update_title(&ticket.session_id, &title);
                }
            }
            Applied::Failed(reason) => {
                active.in_flight = None;
                log::warn!("chat stream failed in session {}: {}", ticket.session_id, reason);
            }
            Applied::Ignored => return false,
        }
        true
    }

    /// Give up on a turn (e.g. the caller cancelled). Its partial reply stays unsealed.
    pub fn abandon_turn(&mut self, ticket: &TurnTicket) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.in_flight.as_ref() != Some(ticket) {
            return;
        }
        active.in_flight = None;
        if let Some(entry) = active.entries.get_mut(ticket.index) {
            entry.state = ReplyState::Failed("cancelled".to_string());
        }
    }

    /// Run one full turn: begin, open the stream, apply events until the reply is sealed or
    /// fails. `on_content` sees each content fragment as it is applied. When `cancel` resolves
    /// first, the stream is closed and the turn abandoned with its partial reply unsealed.
    pub async fn send<C>(
        &mut self,
        query: &str,
        language: TargetLanguage,
        on_content: &mut (dyn for<'a> FnMut(&'a str) + Send),
        cancel: C,
    ) -> Result<TurnOutcome, ChatError>
    where
        C: Future<Output = ()>,
    {
        let ticket = self.begin_turn(query)?;
        let mut stream = match self
            .backend
            .open_stream(&ticket.session_id, query.trim(), language)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                self.apply(&ticket, StreamEvent::Error(e.to_string()));
                return Err(e.into());
            }
        };
        tokio::pin!(cancel);
        loop {
            let event = tokio::select! {
                biased;
                _ = &mut cancel => {
                    log::debug!("turn cancelled in session {}", ticket.session_id);
                    stream.close();
                    self.abandon_turn(&ticket);
                    return Ok(TurnOutcome::Abandoned);
                }
                event = stream.next_event() => event,
            };
            let Some(event) = event else { break };
            let terminal = event.is_terminal();
            if let StreamEvent::Content(text) = &event {
                on_content(text.as_str());
            }
            if !self.apply(&ticket, event) {
                stream.close();
                return Ok(TurnOutcome::Abandoned);
            }
            if terminal {
                break;
            }
        }
        Ok(self.outcome(&ticket))
    }

    fn outcome(&self, ticket: &TurnTicket) -> TurnOutcome {
        let entry = self
            .active
            .as_ref()
            .filter(|a| a.id == ticket.session_id)
            .and_then(|a| a.entries.get(ticket.index));
        match entry.map(|e| &e.state) {
            Some(ReplyState::Sealed) => TurnOutcome::Sealed,
            Some(ReplyState::Failed(reason)) => TurnOutcome::Failed(reason.clone()),
            _ => TurnOutcome::Abandoned,
        }
    }

    /// Text of a message that may be copied; `None` while it is unsealed.
    pub fn shareable_text(&self, index: usize) -> Option<&str> {
        self.messages()
            .get(index)
            .filter(|e| e.is_shareable())
            .map(|e| e.message.content.as_str())
    }

    /// Create a share link for the active conversation. Refused while a reply is streaming or
    /// when the latest reply never sealed.
    pub async fn share_active(&mut self) -> Result<String, ChatError> {
        let active = self.active.as_ref().ok_or(ChatError::NoActiveSession)?;
        if active.in_flight.is_some() {
            return Err(ChatError::Busy);
        }
        let last_reply = active
            .entries
            .iter()
            .rev()
            .find(|e| e.message.role == Role::Assistant);
        if last_reply.is_some_and(|e| !e.is_sealed()) {
            return Err(ChatError::NotSealed);
        }
        let id = active.id.clone();
        Ok(self.backend.share_session(&id).await?)
    }

    /// Import a shared conversation, list it first, and make it active.
    pub async fn import_shared(&mut self, share_id: &str) -> Result<SessionId, ChatError> {
        let conv = self.backend.import_shared(share_id).await?;
        self.sessions.retain(|s| s.id != conv.id);
        self.sessions.insert(
            0,
            ConversationSummary {
                id: conv.id.clone(),
                title: conv.title,
            },
        );
        self.active = Some(ActiveConversation::new(conv.id.clone(), conv.history));
        Ok(conv.id)
    }
}
