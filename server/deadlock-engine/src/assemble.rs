//! Merge stage outputs into one immutable `DeadlockReport`.

use std::collections::{BTreeMap, BTreeSet};

use crate::cycles::CycleAnalysis;
use crate::types::*;

/// Everything the upstream stages produced for one report.
#[derive(Debug, Clone)]
pub struct Parts {
  pub mode: AnalysisMode,
  pub graph: WaitGraph,
  pub locks: BTreeSet<LockRequest>,
  pub analysis: CycleAnalysis,
  pub severity: Severity,
  pub recommendations: Vec<Recommendation>,
  /// Parser warnings, in report order.
  pub warnings: Vec<String>,
}

/// Pure combination. Enhanced mode keeps query text and attaches each
/// process's lock requests; standard mode strips both.
pub fn assemble(parts: Parts) -> DeadlockReport {
  let Parts {
    mode,
    mut graph,
    locks,
    analysis,
    severity,
    recommendations,
    mut warnings,
  } = parts;

  let mut by_holder: BTreeMap<ProcessId, Vec<LockRequest>> = BTreeMap::new();
  if mode.is_enhanced() {
    for lock in locks {
      by_holder.entry(lock.holder.clone()).or_default().push(lock);
    }
  }

  for node in &mut graph.nodes {
    if mode.is_enhanced() {
      node.locks = by_holder.remove(&node.id).unwrap_or_default();
    } else {
      node.query = None;
      node.locks.clear();
    }
  }

  warnings.extend(analysis.warnings);
  if recommendations.is_empty() {
    warnings.push("no remediation pattern matched this deadlock".into());
  }

  DeadlockReport {
    cycles: analysis.cycles,
    residual: analysis.residual,
    graph,
    severity,
    recommendations,
    mode,
    warnings,
  }
}
