//! Continuity store: conversation key -> backend continuity token
//!
//! The store itself carries no lock. The dispatcher serializes all
//! access for a given key (see `dispatch`), so get/set pairs for one
//! conversation can never interleave; a plain map is sufficient.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Stored continuity state for one conversation
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// Opaque token issued by the backend; never interpreted here
    pub token: String,
    /// When the last successful turn completed
    pub last_answered: DateTime<Utc>,
}

/// In-memory continuity map. Volatile by design: entries die with the
/// process, and conversation history is always reconstructible by the
/// caller.
#[derive(Debug, Default)]
pub struct ContinuityStore {
    entries: HashMap<String, SessionEntry>,
}

impl ContinuityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continuity token for a conversation, if any prior turn succeeded
    pub fn get(&self, key: &str) -> Option<&SessionEntry> {
        self.entries.get(key)
    }

    /// Record the token from a successful invocation
    pub fn set(&mut self, key: &str, token: String) {
        self.entries.insert(
            key.to_string(),
            SessionEntry {
                token,
                last_answered: Utc::now(),
            },
        );
    }

    /// Number of conversations with stored continuity
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
