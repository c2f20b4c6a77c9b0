//! Engine configuration with sane defaults.

/// Tunable limits and severity weights for deadlock analysis.
#[derive(Debug, Clone)]
pub struct Config {
  /// Ceiling on raw input size (text + structured payload), in bytes.
  pub max_input_bytes: usize,
  /// Max distinct simple cycles to report.
  pub max_cycles: usize,
  /// DFS step budget for cycle enumeration.
  pub max_search_steps: usize,
  /// Severity points per cycle participant (largest cycle).
  pub participant_points: u8,
  /// Cap on participant points.
  pub participant_cap: u8,
  /// Severity points per distinct resource locked inside cycles.
  pub resource_points: u8,
  /// Cap on resource points.
  pub resource_cap: u8,
  /// Severity points per residual waiter (blast radius).
  pub residual_points: u8,
  /// Cap on residual points.
  pub residual_cap: u8,
  /// Score at or above which severity is medium.
  pub medium_threshold: u8,
  /// Score at or above which severity is high.
  pub high_threshold: u8,
  /// Score at or above which severity is critical.
  pub critical_threshold: u8,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      max_input_bytes: 1024 * 1024,
      max_cycles: 64,
      max_search_steps: 200_000,
      participant_points: 10,
      participant_cap: 30,
      resource_points: 5,
      resource_cap: 20,
      residual_points: 5,
      residual_cap: 20,
      medium_threshold: 25,
      high_threshold: 50,
      critical_threshold: 75,
    }
  }
}
