//! In-process mock of the document-assistant backend for integration tests.
//! Serves a handful of `/api/v1` routes on a free local port and counts calls.

#![allow(dead_code)]

use axum::{
    extract::{Form, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const USERNAME: &str = "ana@example.com";
pub const PASSWORD: &str = "correct horse";
pub const REFRESH_TOKEN: &str = "refresh-1";
/// A session id holding URL delimiters; served only if it arrives as one path segment.
pub const ODD_SESSION_ID: &str = "team/ops?draft#1";

#[derive(Debug, Default)]
pub struct MockInner {
    /// Access token the backend currently accepts.
    pub valid_access: String,
    /// When set, every authenticated call is rejected regardless of token.
    pub reject_all: bool,
    /// When set, refresh answers 500 instead of judging the token.
    pub refresh_broken: bool,
    /// When set, refresh answers 200 with a body that is not JSON.
    pub refresh_garbled: bool,
    pub me_calls: usize,
    pub refresh_calls: usize,
    pub stream_calls: usize,
    pub last_stream_query: HashMap<String, String>,
    /// SSE body served by /query/chat.
    pub sse_body: String,
    pub issued: usize,
}

#[derive(Clone, Default)]
pub struct Mock(pub Arc<Mutex<MockInner>>);

impl Mock {
    pub fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.0.lock().unwrap()
    }
}

pub struct MockServer {
    pub base_url: String,
    pub state: Mock,
}

/// Start the mock on 127.0.0.1 with an ephemeral port. The server task is left running.
pub async fn start(valid_access: &str) -> MockServer {
    let state = Mock::default();
    state.lock().valid_access = valid_access.to_string();

    let api = Router::new()
        .route("/users/login", post(login))
        .route("/users/refresh", post(refresh))
        .route("/users/me", get(me))
        .route("/collaboration/chat/sessions", get(sessions))
        .route("/collaboration/chat/sessions/:id", get(session_details))
        .route("/collaboration/chat/:id/share", post(share))
        .route("/collaboration/chat/shared/preview/:share_id", get(preview))
        .route("/query/chat", get(chat_stream))
        .route("/boom", get(boom));
    let app = Router::new().nest("/api/v1", api).with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock backend");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockServer {
        base_url: format!("http://{}", addr),
        state,
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "detail": "Could not validate credentials" })),
    )
        .into_response()
}

fn authorized(state: &Mock, token: Option<String>) -> bool {
    let g = state.lock();
    !g.reject_all && token.as_deref() == Some(g.valid_access.as_str())
}

async fn login(Form(form): Form<HashMap<String, String>>) -> Response {
    if form.get("username").map(String::as_str) == Some(USERNAME)
        && form.get("password").map(String::as_str) == Some(PASSWORD)
    {
        Json(json!({
            "access_token": "access-1",
            "refresh_token": REFRESH_TOKEN,
            "token_type": "bearer"
        }))
        .into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "Incorrect email or password" })),
        )
            .into_response()
    }
}

async fn refresh(State(state): State<Mock>, Json(body): Json<serde_json::Value>) -> Response {
    let mut g = state.lock();
    g.refresh_calls += 1;
    if g.refresh_broken {
        return (StatusCode::INTERNAL_SERVER_ERROR, "refresh backend down").into_response();
    }
    if g.refresh_garbled {
        return (StatusCode::OK, "<html>maintenance</html>").into_response();
    }
    if body.get("refresh_token").and_then(|v| v.as_str()) != Some(REFRESH_TOKEN) {
        return unauthorized();
    }
    g.issued += 1;
    g.valid_access = "access-2".to_string();
    Json(json!({ "access_token": "access-2" })).into_response()
}

async fn me(State(state): State<Mock>, headers: HeaderMap) -> Response {
    state.lock().me_calls += 1;
    if !authorized(&state, bearer(&headers)) {
        return unauthorized();
    }
    Json(json!({
        "id": "u1",
        "name": "Ana",
        "email": USERNAME,
        "department": "Operations",
        "role": "staff",
        "status": "approved"
    }))
    .into_response()
}

async fn sessions(State(state): State<Mock>, headers: HeaderMap) -> Response {
    if !authorized(&state, bearer(&headers)) {
        return unauthorized();
    }
    Json(json!([
        { "id": "s1", "title": "Trackside dress code" },
        { "id": "s2", "title": "Maintenance schedule" }
    ]))
    .into_response()
}

async fn session_details(
    State(state): State<Mock>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&state, bearer(&headers)) {
        return unauthorized();
    }
    if id != "s1" && id != ODD_SESSION_ID {
        return (StatusCode::NOT_FOUND, Json(json!({ "detail": "not found" }))).into_response();
    }
    Json(json!({
        "history": [
            { "role": "user", "content": "What is the dress code for trackside staff?" },
            { "role": "assistant", "content": "High-visibility jackets.", "sources": [
                { "id": "doc_safety_001", "file_name": "KMRL_Safety_Protocol_2025.pdf", "context": "Section 3.1" }
            ]}
        ]
    }))
    .into_response()
}

async fn share(State(state): State<Mock>, Path(id): Path<String>, headers: HeaderMap) -> Response {
    if !authorized(&state, bearer(&headers)) {
        return unauthorized();
    }
    Json(json!({ "share_id": format!("sh-{}", id) })).into_response()
}

async fn preview(Path(share_id): Path<String>, headers: HeaderMap) -> Response {
    if headers.contains_key(header::AUTHORIZATION) {
        return (StatusCode::BAD_REQUEST, "preview is public").into_response();
    }
    Json(json!({
        "id": share_id,
        "title": "Shared chat",
        "history": [ { "role": "user", "content": "hello" } ]
    }))
    .into_response()
}

async fn chat_stream(State(state): State<Mock>, Query(q): Query<HashMap<String, String>>) -> Response {
    {
        let mut g = state.lock();
        g.stream_calls += 1;
        g.last_stream_query = q.clone();
    }
    if !authorized(&state, q.get("token").cloned()) {
        return unauthorized();
    }
    let body = state.lock().sse_body.clone();
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn boom() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
}
