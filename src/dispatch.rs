//! Dispatch coordinator
//!
//! Owns the request pipeline: validate, serialize per conversation,
//! admit under the worker budget, compose, invoke, record continuity.
//! Per request: `Received -> Serialized -> Admitted -> Composing ->
//! Invoking -> Completed | Failed`. The key lock is taken before the
//! worker slot so same-key followers queue without consuming budget.

#[cfg(test)]
pub mod testing;

use crate::backend::{Backend, CliBackend, InvokeError, InvokeMetrics};
use crate::config::RepositoryTarget;
use crate::prompt::{self, Role, Turn};
use crate::session::ContinuityStore;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};

/// Type alias for the production dispatcher with the real CLI backend
pub type ProductionDispatcher = Dispatcher<CliBackend>;

/// Inbound request from the messaging collaborator.
///
/// `history` is the full ordered conversation, newest human turn last;
/// the dispatcher never fetches history itself.
#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub conversation_key: String,
    pub target: String,
    pub history: Vec<Turn>,
}

/// Successful turn outcome returned to the caller
#[derive(Debug, Clone)]
pub struct TurnReply {
    pub conversation_key: String,
    pub text: String,
    /// Whether this turn resumed stored continuity
    pub resumed: bool,
    pub metrics: InvokeMetrics,
}

/// Failure taxonomy surfaced to the caller
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Malformed request, rejected before occupying a worker slot
    #[error("invalid request: {0}")]
    Input(String),
    #[error(transparent)]
    Invoke(#[from] InvokeError),
}

impl DispatchError {
    /// Short category for user-visible rendering; never a stack trace
    pub fn category(&self) -> &'static str {
        match self {
            DispatchError::Input(_) => "invalid_request",
            DispatchError::Invoke(InvokeError::Timeout { .. }) => "timeout",
            DispatchError::Invoke(InvokeError::Parse { .. }) => "parse_failure",
            DispatchError::Invoke(InvokeError::BackendReported { .. }) => "backend_error",
            DispatchError::Invoke(InvokeError::Launch(_)) => "launch_failure",
            DispatchError::Invoke(InvokeError::Wait(_)) => "wait_failure",
        }
    }
}

/// Coordinates concurrent turns across all conversations
pub struct Dispatcher<B> {
    backend: B,
    targets: HashMap<String, RepositoryTarget>,
    /// Continuity map; only ever mutated while holding that key's turn lock
    store: Mutex<ContinuityStore>,
    /// Per-conversation turn locks. tokio's mutex is fair, so a burst of
    /// turns in one conversation is served strictly in arrival order.
    turn_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Worker budget: bounds concurrent backend invocations globally
    slots: Semaphore,
}

impl<B: Backend> Dispatcher<B> {
    pub fn new(backend: B, targets: HashMap<String, RepositoryTarget>, workers: usize) -> Self {
        Self {
            backend,
            targets,
            store: Mutex::new(ContinuityStore::new()),
            turn_locks: Mutex::new(HashMap::new()),
            slots: Semaphore::new(workers),
        }
    }

    /// Configured repository targets
    pub fn targets(&self) -> &HashMap<String, RepositoryTarget> {
        &self.targets
    }

    /// Number of conversations with stored continuity
    pub async fn active_sessions(&self) -> usize {
        self.store.lock().await.len()
    }

    /// Stored continuity token for a conversation, if any
    #[allow(dead_code)] // Useful for tests and debugging
    pub async fn continuity_token(&self, key: &str) -> Option<String> {
        self.store.lock().await.get(key).map(|e| e.token.clone())
    }

    /// Process one turn end to end.
    ///
    /// Holds the conversation's turn lock for the whole pipeline and a
    /// worker slot only from admission onward, so same-key followers
    /// queue without consuming budget. Both are RAII guards: every exit
    /// path, including panics inside compose/invoke, releases them.
    pub async fn dispatch(&self, req: AskRequest) -> Result<TurnReply, DispatchError> {
        let target = self.validate(&req)?;
        let request_id = uuid::Uuid::new_v4();
        let started = Instant::now();

        tracing::info!(
            request_id = %request_id,
            key = %req.conversation_key,
            target = %req.target,
            turns = req.history.len(),
            "Request received"
        );

        // Serialized: one in-flight turn per conversation, FIFO
        let turn_lock = self.turn_lock(&req.conversation_key).await;
        let _turn = turn_lock.lock().await;

        // Admitted: worker slot for the compose+invoke section.
        // The semaphore is owned by the dispatcher and never closed.
        let _slot = self
            .slots
            .acquire()
            .await
            .expect("worker semaphore is never closed");

        let stored = {
            let store = self.store.lock().await;
            store.get(&req.conversation_key).cloned()
        };

        match &stored {
            Some(entry) => {
                let prefix: String = entry.token.chars().take(8).collect();
                let idle_secs = (chrono::Utc::now() - entry.last_answered).num_seconds();
                tracing::info!(
                    request_id = %request_id,
                    session = %prefix,
                    idle_secs,
                    "Resuming session"
                );
            }
            None => {
                tracing::info!(request_id = %request_id, "Starting new session");
            }
        }
        let token = stored.map(|entry| entry.token);

        // Composing: pure, synchronous
        let prompt = prompt::compose(&req.history, target)
            .map_err(|e| DispatchError::Input(e.to_string()))?;

        // Invoking: the only long-blocking step
        let reply = match self
            .backend
            .invoke(&prompt, token.as_deref(), target)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                let err = DispatchError::from(e);
                tracing::error!(
                    request_id = %request_id,
                    key = %req.conversation_key,
                    category = err.category(),
                    error = %err,
                    "Request failed"
                );
                return Err(err);
            }
        };

        // Completed: record continuity while still holding the turn lock,
        // so the token stored is exactly this invocation's token.
        self.store
            .lock()
            .await
            .set(&req.conversation_key, reply.continuity.clone());

        tracing::info!(
            request_id = %request_id,
            key = %req.conversation_key,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            chars = reply.text.len(),
            "Request completed"
        );

        Ok(TurnReply {
            conversation_key: req.conversation_key,
            text: reply.text,
            resumed: token.is_some(),
            metrics: reply.metrics,
        })
    }

    /// Reject malformed requests before they touch any shared resource
    fn validate(&self, req: &AskRequest) -> Result<&RepositoryTarget, DispatchError> {
        let target = self.targets.get(&req.target).ok_or_else(|| {
            DispatchError::Input(format!("unknown repository target '{}'", req.target))
        })?;
        if req.conversation_key.is_empty() {
            return Err(DispatchError::Input("conversation key is empty".into()));
        }
        match req.history.last() {
            None => {
                return Err(DispatchError::Input("conversation history is empty".into()));
            }
            Some(turn) if turn.role != Role::Human => {
                return Err(DispatchError::Input(
                    "last history turn must be the newest human turn".into(),
                ));
            }
            Some(_) => {}
        }
        Ok(target)
    }

    /// Turn lock for a conversation, created on first use and kept for
    /// the process lifetime (same lifecycle as the continuity entry)
    async fn turn_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.turn_locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
