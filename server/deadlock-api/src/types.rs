//! Response types for the analysis API.

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
  pub status: &'static str,
}
