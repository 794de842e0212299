use std::sync::Arc;

use crate::analysis::pipeline::Analyzer;
use crate::analysis::session::SessionStore;
use crate::config::Config;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    pub analyzer: Arc<Analyzer>,
    pub config: Config,
}
