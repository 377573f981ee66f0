//! Chakra core library: credentials, authenticated transport, streaming chat, and the
//! conversation registry used by the CLI.

pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod tokens;
pub mod transport;

use std::sync::Arc;

/// Everything a front-end needs, wired from one config.
pub struct Client {
    pub auth: auth::AuthClient,
    pub chat: chat::ChatClient,
}

impl Client {
    /// Build clients sharing one transport and the token file named by the config.
    pub fn from_config(config: &config::Config) -> Self {
        let tokens = Arc::new(tokens::FileTokenStore::load(config::resolve_token_path(config)));
        Self::with_store(config::resolve_base_url(config), tokens)
    }

    pub fn with_store(base_url: impl Into<String>, tokens: Arc<dyn tokens::TokenStore>) -> Self {
        let transport = transport::AuthTransport::new(base_url, tokens);
        Self {
            auth: auth::AuthClient::new(transport.clone()),
            chat: chat::ChatClient::new(transport),
        }
    }

    pub fn transport(&self) -> &transport::AuthTransport {
        self.chat.transport()
    }
}
