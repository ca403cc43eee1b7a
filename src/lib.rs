pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod jsvalidate;
pub mod knowledge;
pub mod mode;
pub mod orchestrator;
pub mod prompt;
pub mod providers;
pub mod repair;
pub mod store;
pub mod web;

use serde::{Deserialize, Serialize};

pub use error::{DemoError, Result};

// ---------------------------------------------------------------------------
// Shared conversation types
// ---------------------------------------------------------------------------

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One role-tagged utterance in a conversation, as used for mode selection
/// and prompt assembly. Built from persisted messages; the root metadata
/// turn and empty placeholder turns never appear here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        ConversationTurn { role: Role::User, text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        ConversationTurn { role: Role::Assistant, text: text.into() }
    }
}

/// A single chat message on the provider wire. `role` is one of
/// "system" | "user" | "assistant".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage { role: "assistant".to_string(), content: content.into() }
    }
}

impl From<&ConversationTurn> for ChatMessage {
    fn from(turn: &ConversationTurn) -> Self {
        ChatMessage {
            role: turn.role.as_str().to_string(),
            content: turn.text.clone(),
        }
    }
}
