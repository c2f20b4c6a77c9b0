//! Shared handler state.

use std::sync::Arc;

use deadlock_engine::{Config, Engine, MemoryCache};

use crate::config::ServiceConfig;

#[derive(Clone)]
pub struct AppState {
  pub engine: Arc<Engine>,
  pub cfg: ServiceConfig,
}

impl AppState {
  /// Engine with default analysis settings and, unless disabled, a report cache.
  pub fn new(cfg: ServiceConfig) -> Self {
    let engine_config = Config {
      max_input_bytes: cfg.max_body_bytes,
      ..Config::default()
    };
    let mut engine = Engine::new(engine_config);
    if cfg.cache_capacity > 0 {
      engine = engine.with_cache(Arc::new(MemoryCache::new(cfg.cache_capacity)));
    }
    Self {
      engine: Arc::new(engine),
      cfg,
    }
  }
}
