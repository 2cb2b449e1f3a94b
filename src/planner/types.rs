use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::perception::traits::Capture;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One content part of a conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnContent {
    Text { text: String },
    /// Base64 PNG. Kept encoded so turns serialize straight into requests.
    Image { base64: String },
}

/// One turn of the planner conversation. The running turn sequence is the
/// planner's only cross-iteration memory: strictly growing within a task,
/// cleared when a new task starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: Vec<TurnContent>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: vec![TurnContent::Text { text: text.into() }],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: vec![TurnContent::Text { text: text.into() }],
        }
    }

    pub fn user_with_capture(text: impl Into<String>, capture: &Capture) -> Self {
        Self {
            role: TurnRole::User,
            content: vec![
                TurnContent::Image {
                    base64: base64::engine::general_purpose::STANDARD.encode(&capture.bytes),
                },
                TurnContent::Text { text: text.into() },
            ],
        }
    }

    /// Approximate request payload contribution in bytes.
    pub fn payload_bytes(&self) -> usize {
        self.content
            .iter()
            .map(|c| match c {
                TurnContent::Text { text } => text.len(),
                TurnContent::Image { base64 } => base64.len(),
            })
            .sum()
    }
}
