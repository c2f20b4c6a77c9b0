//! Binary entrypoint for the deadlock analysis API.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deadlock_api::{AppState, ServiceConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::registry()
    .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
    .with(tracing_subscriber::fmt::layer())
    .init();

  let cfg = ServiceConfig::from_env()?;
  let addr = cfg.bind_addr;
  tracing::info!(
    max_body_bytes = cfg.max_body_bytes,
    timeout_ms = cfg.request_timeout.as_millis() as u64,
    cache_capacity = cfg.cache_capacity,
    "starting deadlock-api"
  );

  let app = deadlock_api::router(AppState::new(cfg));

  let listener = tokio::net::TcpListener::bind(addr).await?;
  tracing::info!("deadlock-api listening on http://{}", addr);

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  Ok(())
}

async fn shutdown_signal() {
  let _ = tokio::signal::ctrl_c().await;
  tracing::info!("shutdown signal received");
}
