//! Authenticated transport: decorates each request with the current access token at
//! dispatch time and recovers from a single authorization failure by refreshing.
//!
//! A request descriptor is immutable; the replay after a refresh is a new descriptor with
//! `attempt` bumped, so each original request is retried at most once. Concurrent requests
//! failing together may each refresh; that redundancy is accepted.

use crate::error::ApiError;
use crate::tokens::{TokenKind, TokenStore};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Path prefix under which every backend endpoint is mounted.
pub const API_PREFIX: &str = "/api/v1";

/// Credential lifecycle notifications. `LoggedOut` after a failed refresh means the user
/// must log in again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    LoggedIn,
    Refreshed,
    LoggedOut,
}

/// Where the access token goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlacement {
    /// Anonymous request (login, register, refresh, public share preview).
    None,
    /// `Authorization: Bearer <access>` header.
    Bearer,
    /// Token as a query parameter, for event streams that cannot carry headers.
    Query(&'static str),
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// Immutable description of one backend call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    /// Raw path segments below the API prefix; encoded when the URL is built.
    segments: Vec<String>,
    query: Vec<(String, String)>,
    body: RequestBody,
    auth: AuthPlacement,
    attempt: u32,
}

impl ApiRequest {
    /// `path` is a fixed route such as "/users/me". Caller-supplied ids go through `segment`.
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            query: Vec::new(),
            body: RequestBody::Empty,
            auth: AuthPlacement::Bearer,
            attempt: 0,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: &str) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: &str) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append one path segment. `/`, `?`, `#` and the like are percent-encoded, never routed.
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Form(fields);
        self
    }

    pub fn auth(mut self, auth: AuthPlacement) -> Self {
        self.auth = auth;
        self
    }

    pub fn anonymous(self) -> Self {
        self.auth(AuthPlacement::None)
    }

    /// Unencoded path below the API prefix, for logs.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    /// 0 for the original request, 1 for its replay after a refresh.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Only authenticated first attempts are eligible for refresh-and-retry.
    pub fn may_retry(&self) -> bool {
        self.auth != AuthPlacement::None && self.attempt == 0
    }

    /// Replay descriptor for after a refresh.
    pub fn retried(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// HTTP client for the document-assistant backend with bearer auth and one-shot refresh.
#[derive(Clone)]
pub struct AuthTransport {
    base_url: String,
    client: reqwest::Client,
    tokens: Arc<dyn TokenStore>,
    events: broadcast::Sender<AuthEvent>,
}

impl AuthTransport {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenStore>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let (events, _) = broadcast::channel(16);
        Self {
            base_url,
            client: reqwest::Client::new(),
            tokens,
            events,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    /// Subscribe to login/refresh/logout notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: AuthEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Absolute URL for a request: base URL, API prefix, then each segment percent-encoded.
    pub fn endpoint(&self, req: &ApiRequest) -> Result<reqwest::Url, ApiError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ApiError::Validation(format!("invalid base url {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Validation(format!("base url {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(API_PREFIX.split('/').filter(|s| !s.is_empty()))
            .extend(&req.segments);
        Ok(url)
    }

    /// Build the wire request, reading the access token now rather than from shared defaults.
    fn decorate(&self, req: &ApiRequest) -> Result<reqwest::RequestBuilder, ApiError> {
        let mut builder = self.client.request(req.method.clone(), self.endpoint(req)?);
        let token = match req.auth {
            AuthPlacement::None => None,
            _ => self.tokens.get(TokenKind::Access),
        };
        let mut query = req.query.clone();
        match (req.auth, token) {
            (AuthPlacement::Bearer, Some(t)) => builder = builder.bearer_auth(t),
            (AuthPlacement::Query(name), t) => query.push((name.to_string(), t.unwrap_or_default())),
            _ => {}
        }
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        Ok(match &req.body {
            RequestBody::Empty => builder,
            RequestBody::Json(v) => builder.json(v),
            RequestBody::Form(fields) => builder.form(fields),
        })
    }

    /// Send once; non-success statuses become errors.
    async fn dispatch(&self, req: &ApiRequest) -> Result<reqwest::Response, ApiError> {
        log::debug!("{} {} (attempt {})", req.method, req.path(), req.attempt);
        let res = self.decorate(req)?.send().await?;
        if res.status().is_success() {
            Ok(res)
        } else {
            Err(ApiError::from_response(res).await)
        }
    }

    /// Send a request. On 401 for a first attempt with a refresh token available, refresh once
    /// and replay. If the refresh fails for any reason, credentials are cleared, `LoggedOut` is
    /// emitted, and the original error is returned. Other errors pass through untouched.
    pub async fn send(&self, req: ApiRequest) -> Result<reqwest::Response, ApiError> {
        let original = match self.dispatch(&req).await {
            Err(e @ ApiError::Unauthorized(_)) if req.may_retry() => e,
            other => return other,
        };
        if self.tokens.get(TokenKind::Refresh).is_none() {
            return Err(original);
        }
        match self.refresh_access_token().await {
            Ok(_) => self.dispatch(&req.retried()).await,
            Err(e) => {
                log::info!("token refresh failed ({}), logging out", e);
                self.force_logout();
                Err(original)
            }
        }
    }

    /// Send and decode a JSON body.
    pub async fn send_json<T: DeserializeOwned>(&self, req: ApiRequest) -> Result<T, ApiError> {
        let res = self.send(req).await?;
        decode_json(res).await
    }

    /// POST /users/refresh with the stored refresh token; stores the new access token.
    pub async fn refresh_access_token(&self) -> Result<String, ApiError> {
        let refresh_token = self
            .tokens
            .get(TokenKind::Refresh)
            .ok_or_else(|| ApiError::Unauthorized("no refresh token".to_string()))?;
        let req = ApiRequest::post("/users/refresh")
            .anonymous()
            .json(json!({ "refresh_token": refresh_token }));
        let res = self.dispatch(&req).await?;
        let data: RefreshResponse = decode_json(res).await?;
        self.store(TokenKind::Access, &data.access_token);
        if let Some(rotated) = data.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            self.store(TokenKind::Refresh, rotated);
        }
        log::info!("access token refreshed");
        self.emit(AuthEvent::Refreshed);
        Ok(data.access_token)
    }

    /// Clear both tokens and announce the logout.
    pub fn force_logout(&self) {
        if let Err(e) = self.tokens.clear() {
            log::warn!("clearing stored tokens: {}", e);
        }
        self.emit(AuthEvent::LoggedOut);
    }

    pub(crate) fn store(&self, kind: TokenKind, token: &str) {
        if let Err(e) = self.tokens.set(kind, token) {
            log::warn!("persisting {}: {}", kind.key(), e);
        }
    }
}

pub(crate) async fn decode_json<T: DeserializeOwned>(res: reqwest::Response) -> Result<T, ApiError> {
    let body = res.text().await?;
    serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
}
