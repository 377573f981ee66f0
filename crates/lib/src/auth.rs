//! Login, registration, current user, and logout on top of the authenticated transport.

use crate::error::ApiError;
use crate::tokens::TokenKind;
use crate::transport::{ApiRequest, AuthEvent, AuthTransport};
use serde::{Deserialize, Serialize};

/// Account as returned by GET /users/me.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub role: String,
    /// Approval state (e.g. "pending", "approved").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    #[allow(dead_code)]
    token_type: Option<String>,
}

/// Fields for POST /users/register.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub department: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    message: String,
}

fn require(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

#[derive(Clone)]
pub struct AuthClient {
    transport: AuthTransport,
}

impl AuthClient {
    pub fn new(transport: AuthTransport) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &AuthTransport {
        &self.transport
    }

    /// True when an access token is stored. Says nothing about whether it is still valid.
    pub fn has_credentials(&self) -> bool {
        self.transport.tokens().get(TokenKind::Access).is_some()
    }

    /// POST /users/login (form-encoded), persist both tokens, then load the current user.
    /// Nothing is persisted when the backend rejects the credentials.
    pub async fn login(&self, username: &str, password: &str) -> Result<User, ApiError> {
        require("username", username)?;
        require("password", password)?;
        let req = ApiRequest::post("/users/login").anonymous().form(vec![
            ("username".to_string(), username.trim().to_string()),
            ("password".to_string(), password.to_string()),
        ]);
        let tokens: LoginResponse = self.transport.send_json(req).await?;
        self.transport.store(TokenKind::Access, &tokens.access_token);
        self.transport.store(TokenKind::Refresh, &tokens.refresh_token);
        log::info!("logged in as {}", username.trim());
        self.transport.emit(AuthEvent::LoggedIn);
        self.current_user().await
    }

    /// POST /users/register. New accounts await admin approval before they can log in.
    pub async fn register(&self, registration: &Registration) -> Result<String, ApiError> {
        require("name", &registration.name)?;
        require("email", &registration.email)?;
        require("department", &registration.department)?;
        require("password", &registration.password)?;
        let body = serde_json::to_value(registration).map_err(|e| ApiError::Decode(e.to_string()))?;
        let req = ApiRequest::post("/users/register").anonymous().json(body);
        let res: MessageResponse = self.transport.send_json(req).await?;
        Ok(res.message)
    }

    /// GET /users/me.
    pub async fn current_user(&self) -> Result<User, ApiError> {
        self.transport.send_json(ApiRequest::get("/users/me")).await
    }

    /// Drop stored credentials. Purely local; the backend keeps no session.
    pub fn logout(&self) {
        log::info!("logging out");
        self.transport.force_logout();
    }
}
