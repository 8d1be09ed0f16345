//! Shared state handed to every request handler.

use std::sync::Arc;

use taskforge_engine::{TaskManager, UpdateHub};

/// Handles shared across the HTTP and WebSocket surfaces.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<TaskManager>,
    pub hub: UpdateHub,
}
