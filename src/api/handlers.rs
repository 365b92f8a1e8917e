//! HTTP request handlers

use super::types::{
    AskResponse, ErrorResponse, HealthResponse, TargetInfo, TargetsResponse,
};
use super::AppState;
use crate::backend::InvokeError;
use crate::dispatch::{AskRequest, DispatchError};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/ask", post(ask))
        .route("/api/targets", get(list_targets))
        .route("/health", get(health))
        .route("/version", get(get_version))
        .with_state(state)
}

/// Dispatch one conversational turn
async fn ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let reply = state.dispatcher.dispatch(req).await?;
    Ok(Json(AskResponse {
        conversation_key: reply.conversation_key,
        text: reply.text,
        resumed: reply.resumed,
        metrics: reply.metrics,
    }))
}

async fn list_targets(State(state): State<AppState>) -> Json<TargetsResponse> {
    let mut targets: Vec<TargetInfo> = state
        .dispatcher
        .targets()
        .iter()
        .map(|(id, t)| TargetInfo {
            id: id.clone(),
            root: t.root.display().to_string(),
            timeout_secs: t.timeout_secs,
            max_turns: t.max_turns,
            allowed_tools: t.allowed_tools.clone(),
        })
        .collect();
    targets.sort_by(|a, b| a.id.cmp(&b.id));
    Json(TargetsResponse { targets })
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        active_sessions: state.dispatcher.active_sessions().await,
    })
}

async fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Dispatch failures rendered as HTTP responses
struct ApiError(DispatchError);

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DispatchError::Input(_) => StatusCode::BAD_REQUEST,
            DispatchError::Invoke(InvokeError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::Invoke(_) => StatusCode::BAD_GATEWAY,
        };
        let body = Json(ErrorResponse::new(self.0.category(), self.0.to_string()));
        (status, body).into_response()
    }
}
