//! Prompt composition from conversation history
//!
//! Pure text assembly: no I/O, deterministic. The backend receives one
//! flat instruction per invocation, so multi-turn context is rendered
//! inline rather than passed structurally.

use crate::config::RepositoryTarget;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Assistant,
}

impl Role {
    fn tag(self) -> &'static str {
        match self {
            Role::Human => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// One historical message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComposeError {
    #[error("conversation history is empty")]
    EmptyHistory,
}

/// Compose the backend instruction from an ordered history.
///
/// The last element must be the newest human turn (validated upstream).
/// A lone initiating question is passed through verbatim; longer
/// histories get a role-tagged transcript, the current question, and an
/// explicit statement of the repository root.
pub fn compose(history: &[Turn], target: &RepositoryTarget) -> Result<String, ComposeError> {
    compose_capped(history, target, None)
}

/// Like [`compose`], keeping only the most recent `max_history` turns.
pub fn compose_capped(
    history: &[Turn],
    target: &RepositoryTarget,
    max_history: Option<usize>,
) -> Result<String, ComposeError> {
    if history.is_empty() {
        return Err(ComposeError::EmptyHistory);
    }

    let history = match max_history {
        Some(cap) if cap > 0 && history.len() > cap => &history[history.len() - cap..],
        _ => history,
    };

    if history.len() == 1 {
        return Ok(history[0].text.clone());
    }

    let (current, prior) = history.split_last().ok_or(ComposeError::EmptyHistory)?;

    let mut text = String::from("Previous conversation:\n");
    for turn in prior {
        text.push_str(turn.role.tag());
        text.push_str(": ");
        text.push_str(&turn.text);
        text.push('\n');
    }
    text.push_str(&format!("\nCurrent question: {}\n", current.text));
    text.push_str(&format!(
        "\nYou are working in the repository at: {}",
        target.root.display()
    ));

    Ok(text)
}
