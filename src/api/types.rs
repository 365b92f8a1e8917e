//! API request and response types

use crate::backend::InvokeMetrics;
use serde::Serialize;

/// Successful answer for one turn
#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub conversation_key: String,
    pub text: String,
    pub resumed: bool,
    pub metrics: InvokeMetrics,
}

/// One served repository target
#[derive(Debug, Serialize)]
pub struct TargetInfo {
    pub id: String,
    pub root: String,
    pub timeout_secs: u64,
    pub max_turns: u32,
    pub allowed_tools: Vec<String>,
}

/// Response for target listing
#[derive(Debug, Serialize)]
pub struct TargetsResponse {
    pub targets: Vec<TargetInfo>,
}

/// Health probe response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub active_sessions: usize,
}

/// Error response: a short category plus a specific message,
/// never a stack trace
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub category: String,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            error: message.into(),
        }
    }
}
