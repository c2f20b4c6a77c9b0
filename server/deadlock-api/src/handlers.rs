//! HTTP handlers for the analysis API.

use axum::{
  extract::{rejection::JsonRejection, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use std::sync::Arc;

use deadlock_engine::{AnalysisError, AnalysisMode, AnalysisRequest, ErrorEnvelope, ErrorKind};

use crate::state::AppState;
use crate::types::HealthResponse;

pub async fn health() -> Json<HealthResponse> {
  Json(HealthResponse { status: "ok" })
}

pub async fn analyze(
  State(state): State<Arc<AppState>>,
  payload: Result<Json<AnalysisRequest>, JsonRejection>,
) -> Response {
  match payload {
    Ok(Json(request)) => run(&state, request).await,
    Err(rejection) => reject(rejection),
  }
}

/// Same as [`analyze`], with the mode forced to enhanced.
pub async fn analyze_enhanced(
  State(state): State<Arc<AppState>>,
  payload: Result<Json<AnalysisRequest>, JsonRejection>,
) -> Response {
  match payload {
    Ok(Json(mut request)) => {
      request.mode = AnalysisMode::Enhanced;
      run(&state, request).await
    }
    Err(rejection) => reject(rejection),
  }
}

/// Analysis is CPU-bound: run it on the blocking pool under the request timeout.
async fn run(state: &AppState, request: AnalysisRequest) -> Response {
  let mode = request.mode;
  let engine = Arc::clone(&state.engine);
  let task = tokio::task::spawn_blocking(move || engine.analyze_cached(&request));

  match tokio::time::timeout(state.cfg.request_timeout, task).await {
    Ok(Ok(Ok(report))) => {
      tracing::info!(
        mode = mode.as_str(),
        severity = ?report.severity.level,
        score = report.severity.score,
        cycles = report.cycles.len(),
        warnings = report.warnings.len(),
        "deadlock analyzed"
      );
      (StatusCode::OK, Json(&*report)).into_response()
    }
    Ok(Ok(Err(err))) => failure(&err),
    Ok(Err(join_err)) => {
      tracing::error!(error = %join_err, "analysis task failed");
      failure(&AnalysisError::internal("analysis task failed"))
    }
    Err(_) => {
      tracing::error!(timeout_ms = state.cfg.request_timeout.as_millis() as u64, "analysis timed out");
      let envelope = ErrorEnvelope::new(ErrorKind::InternalAnalysisError, "analysis timed out")
        .with_details(format!("exceeded {} ms", state.cfg.request_timeout.as_millis()));
      (StatusCode::SERVICE_UNAVAILABLE, Json(envelope)).into_response()
    }
  }
}

fn failure(err: &AnalysisError) -> Response {
  let kind = err.kind();
  if kind.is_client_error() {
    tracing::warn!(kind = ?kind, error = %err, "analysis rejected");
  } else {
    tracing::error!(kind = ?kind, error = %err, "analysis failed");
  }
  (status_for(kind), Json(ErrorEnvelope::from(err))).into_response()
}

/// Unreadable request bodies are malformed input; oversized ones keep 413.
fn reject(rejection: JsonRejection) -> Response {
  let status = match rejection.status() {
    StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
    _ => StatusCode::BAD_REQUEST,
  };
  tracing::warn!(status = status.as_u16(), error = %rejection.body_text(), "request body rejected");
  let envelope = ErrorEnvelope::new(ErrorKind::MalformedInput, "request body is not a valid analysis request")
    .with_details(rejection.body_text());
  (status, Json(envelope)).into_response()
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
  match kind {
    ErrorKind::MalformedInput => StatusCode::BAD_REQUEST,
    ErrorKind::Unparseable | ErrorKind::NoCycleFound => StatusCode::UNPROCESSABLE_ENTITY,
    ErrorKind::InternalAnalysisError => StatusCode::INTERNAL_SERVER_ERROR,
  }
}
