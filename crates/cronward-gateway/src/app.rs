use axum::{
    middleware,
    routing::{any, get},
    Router,
};
use cronward_core::config::CronwardConfig;
use cronward_scheduler::StatusQuery;
use std::sync::Arc;

/// Central shared state: passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: CronwardConfig,
    /// Live view of the scheduler's registry.
    pub status: StatusQuery,
}

impl AppState {
    pub fn new(config: CronwardConfig, status: StatusQuery) -> Self {
        Self { config, status }
    }

    /// Daemon name reported by `GET /`.
    pub fn name(&self) -> &str {
        &self.config.daemon.name
    }
}

/// Assemble the status API router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", any(crate::http::status::index_handler))
        .route("/jobs", get(crate::http::status::jobs_handler))
        .route("/jobs/{name}", get(crate::http::status::job_handler))
        .fallback(crate::http::status::not_found)
        .with_state(state)
        .layer(middleware::from_fn(crate::http::access_log))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
