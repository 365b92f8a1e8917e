//! Mock backend for dispatch tests
//!
//! Instruments what the concurrency tests need observed: global and
//! per-conversation in-flight counts, prompt arrival order, and the
//! continuity-token chain. Dispatch tests tag each question with its
//! conversation key ("key:n"), and single-turn prompts pass through
//! verbatim, so the mock can attribute calls without seeing the key.

use crate::backend::{Backend, BackendReply, InvokeError, InvokeMetrics};
use crate::config::RepositoryTarget;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct TagState {
    completed: usize,
    inflight: usize,
    max_inflight: usize,
    last_issued: Option<String>,
    last_received: Option<String>,
    prompts: Vec<String>,
}

#[derive(Default)]
struct MockState {
    tags: HashMap<String, TagState>,
    inflight: usize,
    max_inflight: usize,
    calls: usize,
    /// Received token differed from the last issued token for its tag
    token_violations: usize,
    queued_failures: HashMap<String, VecDeque<InvokeError>>,
}

/// Backend double with configurable latency and failure injection
pub struct MockBackend {
    latency: Duration,
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Queue a failure for the next invocation tagged with `tag`
    pub fn fail_next(&self, tag: &str, error: InvokeError) {
        self.state
            .lock()
            .unwrap()
            .queued_failures
            .entry(tag.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    pub fn max_inflight(&self) -> usize {
        self.state.lock().unwrap().max_inflight
    }

    pub fn max_inflight_for(&self, tag: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .tags
            .get(tag)
            .map_or(0, |t| t.max_inflight)
    }

    pub fn token_violations(&self) -> usize {
        self.state.lock().unwrap().token_violations
    }

    /// Last continuity token issued for a tag
    pub fn last_issued(&self, tag: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .tags
            .get(tag)
            .and_then(|t| t.last_issued.clone())
    }

    /// Token the most recent invocation for a tag arrived with
    pub fn last_received_token(&self, tag: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .tags
            .get(tag)
            .and_then(|t| t.last_received.clone())
    }

    /// Prompts seen for a tag, in invocation order
    pub fn prompts_for(&self, tag: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .tags
            .get(tag)
            .map(|t| t.prompts.clone())
            .unwrap_or_default()
    }

    fn tag_of(prompt: &str) -> String {
        prompt.split(':').next().unwrap_or(prompt).to_string()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn invoke(
        &self,
        prompt: &str,
        continuity: Option<&str>,
        _target: &RepositoryTarget,
    ) -> Result<BackendReply, InvokeError> {
        let tag = Self::tag_of(prompt);

        // Entry accounting and outcome decision under one lock
        let outcome = {
            let mut state = self.state.lock().unwrap();
            state.calls += 1;
            state.inflight += 1;
            state.max_inflight = state.max_inflight.max(state.inflight);

            let entry = state.tags.entry(tag.clone()).or_default();
            entry.inflight += 1;
            entry.max_inflight = entry.max_inflight.max(entry.inflight);
            entry.prompts.push(prompt.to_string());
            entry.last_received = continuity.map(str::to_string);
            let mismatch = continuity != entry.last_issued.as_deref();

            if mismatch {
                state.token_violations += 1;
            }

            let failure = state
                .queued_failures
                .get_mut(&tag)
                .and_then(VecDeque::pop_front);

            match failure {
                Some(err) => Err(err),
                None => {
                    let entry = state.tags.get_mut(&tag).expect("entry just inserted");
                    entry.completed += 1;
                    let token = format!("tok-{tag}-{}", entry.completed);
                    entry.last_issued = Some(token.clone());
                    Ok(BackendReply {
                        text: format!("answer to {prompt}"),
                        continuity: token,
                        metrics: InvokeMetrics::default(),
                    })
                }
            }
        };

        tokio::time::sleep(self.latency).await;

        {
            let mut state = self.state.lock().unwrap();
            state.inflight -= 1;
            if let Some(entry) = state.tags.get_mut(&tag) {
                entry.inflight -= 1;
            }
        }

        outcome
    }
}
