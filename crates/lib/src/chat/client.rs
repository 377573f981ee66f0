//! HTTP chat client: session listing, history, share links, and opening chat streams.

use super::stream::ChatStream;
use super::types::{ChatMessage, ConversationSummary, SharedConversation, TargetLanguage};
use crate::error::ApiError;
use crate::transport::{ApiRequest, AuthPlacement, AuthTransport};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

/// Backend operations the session registry depends on.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// GET /collaboration/chat/sessions.
    async fn list_sessions(&self) -> Result<Vec<ConversationSummary>, ApiError>;

    /// GET /collaboration/chat/sessions/{id}: full message history.
    async fn session_history(&self, id: &str) -> Result<Vec<ChatMessage>, ApiError>;

    /// Open the event stream answering `query` within conversation `session_id`.
    async fn open_stream(
        &self,
        session_id: &str,
        query: &str,
        language: TargetLanguage,
    ) -> Result<ChatStream, ApiError>;

    async fn rename_session(&self, id: &str, title: &str) -> Result<(), ApiError>;

    async fn delete_session(&self, id: &str) -> Result<(), ApiError>;

    /// POST /collaboration/chat/{id}/share; returns the share id.
    async fn share_session(&self, id: &str) -> Result<String, ApiError>;

    /// Copy a shared conversation into the caller's account.
    async fn import_shared(&self, share_id: &str) -> Result<SharedConversation, ApiError>;
}

const SESSIONS: &str = "/collaboration/chat/sessions";

#[derive(Debug, Deserialize)]
struct SessionDetails {
    #[serde(default)]
    history: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ShareResponse {
    share_id: String,
}

#[derive(Clone)]
pub struct ChatClient {
    transport: AuthTransport,
}

impl ChatClient {
    pub fn new(transport: AuthTransport) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &AuthTransport {
        &self.transport
    }

    /// GET /collaboration/chat/shared/preview/{share_id}. Public; no credentials are sent.
    pub async fn shared_preview(&self, share_id: &str) -> Result<SharedConversation, ApiError> {
        let req = ApiRequest::get("/collaboration/chat/shared/preview")
            .segment(share_id)
            .anonymous();
        self.transport.send_json(req).await
    }

    async fn send_empty(&self, req: ApiRequest) -> Result<(), ApiError> {
        self.transport.send(req).await.map(|_| ())
    }
}

#[async_trait]
impl ChatBackend for ChatClient {
    async fn list_sessions(&self) -> Result<Vec<ConversationSummary>, ApiError> {
        self.transport.send_json(ApiRequest::get(SESSIONS)).await
    }

    async fn session_history(&self, id: &str) -> Result<Vec<ChatMessage>, ApiError> {
        let details: SessionDetails = self
            .transport
            .send_json(ApiRequest::get(SESSIONS).segment(id))
            .await?;
        Ok(details.history)
    }

    /// The access token travels as the `token` query parameter; an expired token still gets
    /// the transport's single refresh-and-retry before the stream is considered failed.
    async fn open_stream(
        &self,
        session_id: &str,
        query: &str,
        language: TargetLanguage,
    ) -> Result<ChatStream, ApiError> {
        if query.trim().is_empty() {
            return Err(ApiError::Validation("query is required".to_string()));
        }
        let req = ApiRequest::get("/query/chat")
            .query("query", query)
            .query("session_id", session_id)
            .query("target_language", language.code())
            .auth(AuthPlacement::Query("token"));
        let res = self.transport.send(req).await?;
        log::debug!("chat stream open for session {}", session_id);
        Ok(ChatStream::from_response(res))
    }

    async fn rename_session(&self, id: &str, title: &str) -> Result<(), ApiError> {
        let req = ApiRequest::put(SESSIONS)
            .segment(id)
            .json(json!({ "title": title }));
        self.send_empty(req).await
    }

    async fn delete_session(&self, id: &str) -> Result<(), ApiError> {
        self.send_empty(ApiRequest::delete(SESSIONS).segment(id)).await
    }

    async fn share_session(&self, id: &str) -> Result<String, ApiError> {
        let res: ShareResponse = self
            .transport
            .send_json(ApiRequest::post("/collaboration/chat").segment(id).segment("share"))
            .await?;
        Ok(res.share_id)
    }

    async fn import_shared(&self, share_id: &str) -> Result<SharedConversation, ApiError> {
        self.transport
            .send_json(ApiRequest::get("/collaboration/chat/share").segment(share_id))
            .await
    }
}
