//! Service configuration from environment variables.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("{var} has invalid value {value:?}")]
  Invalid { var: &'static str, value: String },
  #[error("invalid bind address {0:?}")]
  BindAddr(String),
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
  pub bind_addr: SocketAddr,
  /// Request body ceiling; larger bodies get 413.
  pub max_body_bytes: usize,
  pub request_timeout: Duration,
  /// 0 disables the report cache.
  pub cache_capacity: usize,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      bind_addr: SocketAddr::from(([127, 0, 0, 1], 5005)),
      max_body_bytes: 1024 * 1024,
      request_timeout: Duration::from_millis(5000),
      cache_capacity: 1024,
    }
  }
}

impl ServiceConfig {
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|var| env::var(var).ok())
  }

  /// Build from any variable source; unset variables take their defaults.
  pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let defaults = Self::default();

    let host = lookup("BIND_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = parsed(&lookup, "PORT")?.unwrap_or(defaults.bind_addr.port());
    let addr = format!("{host}:{port}");
    let bind_addr: SocketAddr = addr.parse().map_err(|_| ConfigError::BindAddr(addr))?;

    let max_body_bytes = parsed(&lookup, "MAX_BODY_BYTES")?.unwrap_or(defaults.max_body_bytes);
    let request_timeout = parsed(&lookup, "REQUEST_TIMEOUT_MS")?
      .map(Duration::from_millis)
      .unwrap_or(defaults.request_timeout);
    let cache_capacity = parsed(&lookup, "CACHE_CAPACITY")?.unwrap_or(defaults.cache_capacity);

    Ok(Self {
      bind_addr,
      max_body_bytes,
      request_timeout,
      cache_capacity,
    })
  }
}

fn parsed<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
  F: Fn(&str) -> Option<String>,
  T: std::str::FromStr,
{
  match lookup(var) {
    None => Ok(None),
    Some(value) => match value.trim().parse() {
      Ok(v) => Ok(Some(v)),
      Err(_) => Err(ConfigError::Invalid { var, value }),
    },
  }
}
