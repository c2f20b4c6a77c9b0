//! PushLog Deadlock Analysis API
//!
//! HTTP service that runs one captured deadlock report through deadlock-engine
//! and returns the DeadlockReport (or a structured error envelope).
//! Bind to 127.0.0.1 by default (internal only).

pub mod config;
mod handlers;
mod state;
mod types;

use axum::{extract::DefaultBodyLimit, routing::get, routing::post, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

pub use config::{ConfigError, ServiceConfig};
pub use handlers::{analyze, analyze_enhanced, health, status_for};
pub use state::AppState;

/// All routes with body limit, tracing and CORS applied.
pub fn router(state: AppState) -> Router {
  let body_limit = state.cfg.max_body_bytes;
  Router::new()
    .route("/health", get(health))
    .route("/v1/deadlocks/analyze", post(analyze))
    .route("/v1/deadlocks/analyze/enhanced", post(analyze_enhanced))
    .layer(DefaultBodyLimit::disable())
    .layer(RequestBodyLimitLayer::new(body_limit))
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::permissive())
    .with_state(Arc::new(state))
}
