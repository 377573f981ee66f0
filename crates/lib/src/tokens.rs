//! Token store: access and refresh tokens that survive restarts.
//!
//! The file store keeps a JSON object keyed `access_token` / `refresh_token` (e.g. at
//! ~/.chakra/tokens.json) and writes through on every change. No expiry tracking.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Which credential a token is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    /// Storage key, shared with the web front-end.
    pub fn key(self) -> &'static str {
        match self {
            TokenKind::Access => "access_token",
            TokenKind::Refresh => "refresh_token",
        }
    }
}

/// Durable key-value holder for credentials. Single-key reads and writes.
pub trait TokenStore: Send + Sync {
    fn get(&self, kind: TokenKind) -> Option<String>;
    fn set(&self, kind: TokenKind, token: &str) -> std::io::Result<()>;
    fn clear(&self) -> std::io::Result<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

impl StoredTokens {
    fn slot(&mut self, kind: TokenKind) -> &mut Option<String> {
        match kind {
            TokenKind::Access => &mut self.access_token,
            TokenKind::Refresh => &mut self.refresh_token,
        }
    }

    fn read(&self, kind: TokenKind) -> Option<String> {
        match kind {
            TokenKind::Access => self.access_token.clone(),
            TokenKind::Refresh => self.refresh_token.clone(),
        }
    }
}

/// Token store backed by a JSON file; loaded once, written on every change.
pub struct FileTokenStore {
    path: PathBuf,
    tokens: Mutex<StoredTokens>,
}

impl FileTokenStore {
    /// Load store from path; if file missing or invalid, starts empty.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let tokens = match std::fs::read_to_string(&path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                log::warn!("ignoring unreadable token file {}: {}", path.display(), e);
                StoredTokens::default()
            }),
            Err(_) => StoredTokens::default(),
        };
        Self {
            path,
            tokens: Mutex::new(tokens),
        }
    }

    fn save(&self, tokens: &StoredTokens) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(tokens)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, kind: TokenKind) -> Option<String> {
        let g = self.tokens.lock().unwrap_or_else(|p| p.into_inner());
        g.read(kind).filter(|t| !t.is_empty())
    }

    fn set(&self, kind: TokenKind, token: &str) -> std::io::Result<()> {
        let mut g = self.tokens.lock().unwrap_or_else(|p| p.into_inner());
        *g.slot(kind) = Some(token.to_string());
        self.save(&g)
    }

    fn clear(&self) -> std::io::Result<()> {
        let mut g = self.tokens.lock().unwrap_or_else(|p| p.into_inner());
        *g = StoredTokens::default();
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Process-local store; nothing survives a restart. Used for tests and one-shot runs.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<StoredTokens>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with both tokens.
    pub fn with_tokens(access: &str, refresh: &str) -> Self {
        Self {
            tokens: Mutex::new(StoredTokens {
                access_token: Some(access.to_string()),
                refresh_token: Some(refresh.to_string()),
            }),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, kind: TokenKind) -> Option<String> {
        let g = self.tokens.lock().unwrap_or_else(|p| p.into_inner());
        g.read(kind).filter(|t| !t.is_empty())
    }

    fn set(&self, kind: TokenKind, token: &str) -> std::io::Result<()> {
        let mut g = self.tokens.lock().unwrap_or_else(|p| p.into_inner());
        *g.slot(kind) = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> std::io::Result<()> {
        let mut g = self.tokens.lock().unwrap_or_else(|p| p.into_inner());
        *g = StoredTokens::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_token_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("chakra-tokens-test-{}", uuid::Uuid::new_v4()))
            .join("tokens.json")
    }

    #[test]
    fn file_store_survives_reload() {
        let path = temp_token_path();
        let store = FileTokenStore::load(&path);
        assert!(store.get(TokenKind::Access).is_none());
        store.set(TokenKind::Access, "a1").unwrap();
        store.set(TokenKind::Refresh, "r1").unwrap();

        let reloaded = FileTokenStore::load(&path);
        assert_eq!(reloaded.get(TokenKind::Access).as_deref(), Some("a1"));
        assert_eq!(reloaded.get(TokenKind::Refresh).as_deref(), Some("r1"));

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["access_token"], "a1");
        assert_eq!(raw["refresh_token"], "r1");
    }

    #[test]
    fn clear_removes_both_tokens_durably() {
        let path = temp_token_path();
        let store = FileTokenStore::load(&path);
        store.set(TokenKind::Access, "a1").unwrap();
        store.set(TokenKind::Refresh, "r1").unwrap();
        store.clear().unwrap();
        assert!(store.get(TokenKind::Access).is_none());
        assert!(FileTokenStore::load(&path).get(TokenKind::Refresh).is_none());
        // clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let path = temp_token_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json").unwrap();
        let store = FileTokenStore::load(&path);
        assert!(store.get(TokenKind::Access).is_none());
    }

    #[test]
    fn memory_store_set_overwrites_single_key() {
        let store = MemoryTokenStore::with_tokens("a1", "r1");
        store.set(TokenKind::Access, "a2").unwrap();
        assert_eq!(store.get(TokenKind::Access).as_deref(), Some("a2"));
        assert_eq!(store.get(TokenKind::Refresh).as_deref(), Some("r1"));
    }

    #[test]
    fn keys_match_storage_names() {
        assert_eq!(TokenKind::Access.key(), "access_token");
        assert_eq!(TokenKind::Refresh.key(), "refresh_token");
    }
}
