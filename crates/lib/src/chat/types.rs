//! Wire types shared by the chat endpoints.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Conversation identifier. Minted client-side as a v4 UUID; server ids are kept verbatim.
pub type SessionId = String;

/// Title given to a conversation until the backend generates one.
pub const PLACEHOLDER_TITLE: &str = "New Chat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A document citation attached to a sealed assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub file_name: String,
    /// Excerpt the answer was grounded on.
    #[serde(default)]
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

/// One turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sources: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            sources: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: SessionId,
    #[serde(default)]
    pub title: String,
}

impl ConversationSummary {
    /// Freshly minted conversation with the placeholder title.
    pub fn placeholder() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: PLACEHOLDER_TITLE.to_string(),
        }
    }
}

/// A conversation published through a share link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedConversation {
    pub id: SessionId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

/// Output language for answers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetLanguage {
    #[default]
    En,
    Ml,
    Hi,
}

impl TargetLanguage {
    pub fn code(self) -> &'static str {
        match self {
            TargetLanguage::En => "en",
            TargetLanguage::Ml => "ml",
            TargetLanguage::Hi => "hi",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TargetLanguage::En => "English",
            TargetLanguage::Ml => "Malayalam",
            TargetLanguage::Hi => "Hindi",
        }
    }
}

impl fmt::Display for TargetLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for TargetLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(TargetLanguage::En),
            "ml" | "malayalam" => Ok(TargetLanguage::Ml),
            "hi" | "hindi" => Ok(TargetLanguage::Hi),
            other => Err(format!("unsupported language '{}' (expected en, ml or hi)", other)),
        }
    }
}
