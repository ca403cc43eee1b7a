//! Decides whether a turn should produce a new experiment artifact or a
//! plain chat reply.

use crate::ConversationTurn;
use serde::{Deserialize, Serialize};

/// What the model is asked to produce this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Experiment,
    Chat,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Experiment => write!(f, "experiment"),
            Mode::Chat => write!(f, "chat"),
        }
    }
}

/// Pick the mode for the current turn.
///
/// `prior_turns` is the conversation history with the root metadata turn and
/// the pending placeholder already excluded. At most one prior turn means
/// this is the first real exchange, which produces an experiment; anything
/// longer is a follow-up chat. `force_chat` (restricted-access callers)
/// always wins.
pub fn select_mode(prior_turns: &[ConversationTurn], force_chat: bool) -> Mode {
    if force_chat {
        return Mode::Chat;
    }
    if prior_turns.len() <= 1 {
        Mode::Experiment
    } else {
        Mode::Chat
    }
}
