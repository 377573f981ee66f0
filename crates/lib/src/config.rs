//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.chakra/config.json`) and environment.
//! The API base URL and push public key can be overridden by env, matching how the
//! web front-end reads them at start time.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::chat::TargetLanguage;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Backend API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Where credentials are persisted.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Chat defaults.
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Backend location and push key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Server root (default "http://localhost:8000"). Overridden by CHAKRA_API_URL env.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Public key for push-notification subscriptions. Overridden by CHAKRA_PUSH_PUBLIC_KEY env.
    #[serde(default)]
    pub push_public_key: Option<String>,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            push_public_key: None,
        }
    }
}

/// Credential persistence settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Token file (default ~/.chakra/tokens.json).
    pub token_path: Option<PathBuf>,
}

/// Chat defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    /// Output language for answers when none is given on the command line.
    #[serde(default)]
    pub default_language: TargetLanguage,
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the API base URL: env CHAKRA_API_URL overrides config. Trailing slashes are dropped.
pub fn resolve_base_url(config: &Config) -> String {
    non_empty_env("CHAKRA_API_URL")
        .unwrap_or_else(|| config.api.base_url.trim().to_string())
        .trim_end_matches('/')
        .to_string()
}

/// Resolve the push-notification public key: env CHAKRA_PUSH_PUBLIC_KEY overrides config.
pub fn resolve_push_public_key(config: &Config) -> Option<String> {
    non_empty_env("CHAKRA_PUSH_PUBLIC_KEY").or_else(|| {
        config
            .api
            .push_public_key
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

fn chakra_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".chakra"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("CHAKRA_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| chakra_dir().join("config.json"))
}

/// Resolve the token file: `storage.tokenPath` if set, otherwise ~/.chakra/tokens.json.
pub fn resolve_token_path(config: &Config) -> PathBuf {
    config
        .storage
        .token_path
        .clone()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| chakra_dir().join("tokens.json"))
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
