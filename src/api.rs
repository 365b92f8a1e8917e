//! HTTP inbound surface
//!
//! Stands in for the messaging collaborator: it delivers request
//! records to the dispatcher and renders outcomes, nothing more.

mod handlers;
mod types;

pub use handlers::create_router;

use crate::dispatch::ProductionDispatcher;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<ProductionDispatcher>,
}

impl AppState {
    pub fn new(dispatcher: Arc<ProductionDispatcher>) -> Self {
        Self { dispatcher }
    }
}
