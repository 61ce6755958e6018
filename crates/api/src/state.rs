use std::sync::Arc;

use genrelay_pipeline::JobOrchestrator;

use crate::config::ServerConfig;

/// Shared application state available to all handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    /// Accepts jobs and starts their background tasks.
    pub orchestrator: JobOrchestrator,
    pub config: Arc<ServerConfig>,
}
