//! Severity score (0-100) from cycle shape, lock exclusivity, contention and blast radius.

use std::collections::BTreeSet;

use crate::config::Config;
use crate::cycles::{cycle_edges, CycleAnalysis};
use crate::types::{Severity, SeverityLevel, WaitGraph};

/// Deterministic weighted sum; identical input always yields the identical severity.
pub fn score(graph: &WaitGraph, analysis: &CycleAnalysis, config: &Config) -> Severity {
  let mut factors = Vec::new();

  // Longest cycle: more participants, harder to untangle.
  let participants = analysis
    .cycles
    .iter()
    .map(|c| c.participants().len())
    .max()
    .unwrap_or(0);
  let participant_pts = capped(participants, config.participant_points, config.participant_cap);
  if participant_pts > 0 {
    factors.push(format!("{}-process cycle (+{})", participants, participant_pts));
  }

  // Exclusivity: the worst cycle decides.
  let (exclusivity_pts, exclusivity_note) = analysis
    .cycles
    .iter()
    .map(|cycle| {
      let classes: Vec<u8> = cycle_edges(graph, cycle)
        .iter()
        .map(|e| e.mode.exclusivity())
        .collect();
      exclusivity_points(&classes)
    })
    .max_by_key(|(pts, _)| *pts)
    .unwrap_or((0, ""));
  if exclusivity_pts > 0 {
    factors.push(format!("{} (+{})", exclusivity_note, exclusivity_pts));
  }

  // Contention: distinct resources locked along cycles.
  let resources: BTreeSet<_> = analysis
    .cycles
    .iter()
    .flat_map(|c| cycle_edges(graph, c))
    .map(|e| &e.resource)
    .collect();
  let resource_pts = capped(resources.len(), config.resource_points, config.resource_cap);
  if resource_pts > 0 {
    factors.push(format!("{} contended resource(s) (+{})", resources.len(), resource_pts));
  }

  // Blast radius: sessions queued behind the deadlock.
  let residual_pts = capped(analysis.residual.len(), config.residual_points, config.residual_cap);
  if residual_pts > 0 {
    factors.push(format!(
      "{} residual waiter(s) (+{})",
      analysis.residual.len(),
      residual_pts
    ));
  }

  let total = (participant_pts + exclusivity_pts + resource_pts + residual_pts).min(100);
  let score = total as u8;

  Severity {
    level: level_for(score, config),
    score,
    factors,
  }
}

fn capped(count: usize, per_unit: u8, cap: u8) -> u32 {
  let count = u32::try_from(count).unwrap_or(u32::MAX);
  count.saturating_mul(u32::from(per_unit)).min(u32::from(cap))
}

/// Points for the requested lock modes along one cycle.
fn exclusivity_points(classes: &[u8]) -> (u32, &'static str) {
  if classes.is_empty() {
    (0, "")
  } else if classes.iter().all(|&c| c == 3) {
    (30, "exclusive vs exclusive lock requests")
  } else if classes.iter().any(|&c| c == 3) {
    (20, "exclusive lock requested against weaker locks")
  } else if classes.iter().any(|&c| c == 2) {
    (12, "share-level lock requests")
  } else {
    (6, "row-level lock requests")
  }
}

fn level_for(score: u8, config: &Config) -> SeverityLevel {
  if score >= config.critical_threshold {
    SeverityLevel::Critical
  } else if score >= config.high_threshold {
    SeverityLevel::High
  } else if score >= config.medium_threshold {
    SeverityLevel::Medium
  } else {
    SeverityLevel::Low
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cycles::find_cycles;
  use crate::graph;
  use crate::types::{LockMode, Resource, ResourceKind, WaitEdge};
  use std::collections::BTreeMap;

  fn edge(from: &str, to: &str, table: &str, mode: LockMode) -> WaitEdge {
    WaitEdge {
      from: from.into(),
      to: to.into(),
      resource: Resource::new(ResourceKind::Table, table),
      mode,
    }
  }

  fn severity(edges: Vec<WaitEdge>) -> Severity {
    let config = Config::default();
    let g = graph::build(BTreeMap::new(), edges);
    let a = find_cycles(&g, &config).unwrap();
    score(&g, &a, &config)
  }

  #[test]
  fn exclusive_two_process_deadlock_is_high() {
    let s = severity(vec![
      edge("100", "101", "orders", LockMode::ExclusiveLock),
      edge("101", "100", "customers", LockMode::ExclusiveLock),
    ]);
    // 20 participants + 30 exclusivity + 10 resources.
    assert_eq!(s.score, 60);
    assert_eq!(s.level, SeverityLevel::High);
    assert_eq!(s.factors.len(), 3);
  }

  #[test]
  fn weak_modes_score_lower_than_exclusive() {
    let weak = severity(vec![
      edge("1", "2", "a", LockMode::RowShareLock),
      edge("2", "1", "b", LockMode::RowShareLock),
    ]);
    let strong = severity(vec![
      edge("1", "2", "a", LockMode::AccessExclusiveLock),
      edge("2", "1", "b", LockMode::AccessExclusiveLock),
    ]);
    assert!(weak.score < strong.score);
    assert_eq!(weak.level, SeverityLevel::Medium);
  }

  #[test]
  fn residual_waiters_raise_score() {
    let base = severity(vec![
      edge("1", "2", "a", LockMode::ShareLock),
      edge("2", "1", "b", LockMode::ShareLock),
    ]);
    let crowded = severity(vec![
      edge("1", "2", "a", LockMode::ShareLock),
      edge("2", "1", "b", LockMode::ShareLock),
      edge("3", "1", "b", LockMode::ShareLock),
      edge("4", "2", "a", LockMode::ShareLock),
    ]);
    assert_eq!(crowded.score, base.score + 10);
  }

  #[test]
  fn score_is_capped_at_100() {
    let mut edges = Vec::new();
    for i in 0..10 {
      let from = i.to_string();
      let to = ((i + 1) % 10).to_string();
      edges.push(edge(&from, &to, &format!("t{}", i), LockMode::ExclusiveLock));
    }
    for i in 10..20 {
      edges.push(edge(&i.to_string(), "0", "t0", LockMode::ExclusiveLock));
    }
    let s = severity(edges);
    assert_eq!(s.score, 100);
    assert_eq!(s.level, SeverityLevel::Critical);
  }
}
