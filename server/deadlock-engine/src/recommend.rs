//! Rule-based remediation hints.
//!
//! Rules run in a fixed order per cycle, then graph-wide rules run once.
//! Output is deduplicated by `(category, affected_resources)`, first wins.

use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::sync::OnceLock;

use crate::cycles::{cycle_edges, CycleAnalysis};
use crate::types::*;

/// Residual waiters at which the blast-radius hint becomes medium confidence.
const CROWDED_RESIDUAL: usize = 3;

fn re_write_statement() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"(?i)^\s*(?:update|delete)\b").unwrap())
}

fn re_where() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"(?i)\bwhere\b").unwrap())
}

/// Map structural patterns to recommendations. An empty result is valid.
///
/// Rules depend only on graph structure; `severity` is carried for the
/// call contract and logged with the outcome.
pub fn recommend(
  graph: &WaitGraph,
  analysis: &CycleAnalysis,
  severity: &Severity,
) -> Vec<Recommendation> {
  let row_level_relations: HashSet<&str> = graph
    .edges
    .iter()
    .filter(|e| matches!(e.resource.kind, ResourceKind::Tuple | ResourceKind::Page))
    .filter_map(|e| e.resource.relation.as_deref())
    .collect();

  let mut out = Vec::new();
  for cycle in &analysis.cycles {
    let edges = cycle_edges(graph, cycle);
    lock_order(cycle, &edges, &mut out);
    lock_upgrade(cycle, &edges, &mut out);
    indexing(graph, &edges, &row_level_relations, &mut out);
    isolation_level(&edges, &mut out);
    other_patterns(&edges, &mut out);
  }
  blast_radius(graph, &analysis.residual, &mut out);

  let recs = dedup(out);
  tracing::debug!(
    recommendations = recs.len(),
    severity = ?severity.level,
    "evaluated remediation rules"
  );
  recs
}

fn distinct_resources(edges: &[&WaitEdge]) -> Vec<Resource> {
  edges
    .iter()
    .map(|e| e.resource.clone())
    .collect::<BTreeSet<_>>()
    .into_iter()
    .collect()
}

fn join_ids(ids: &[ProcessId]) -> String {
  ids.iter().map(ProcessId::as_str).collect::<Vec<_>>().join(", ")
}

/// Cycle spans several resources: participants lock them in different orders.
fn lock_order(cycle: &Cycle, edges: &[&WaitEdge], out: &mut Vec<Recommendation>) {
  let resources = distinct_resources(edges);
  if resources.len() < 2 {
    return;
  }
  let participants = cycle.participants();

  let (message, confidence) = match (participants, edges) {
    ([a, b], [first, second]) if resources.len() == 2 => (
      format!(
        "Process {} holds {} and waits for {} while process {} holds {} and waits for {}; \
         acquire these locks in one fixed order (e.g. by table name or primary key) in every transaction",
        a, second.resource, first.resource, b, first.resource, second.resource
      ),
      Confidence::High,
    ),
    _ => (
      format!(
        "Processes {} wait on each other across {} resources; enforce one global lock \
         acquisition order (sort the rows or tables by key before locking them)",
        join_ids(participants),
        resources.len()
      ),
      Confidence::Medium,
    ),
  };

  out.push(Recommendation {
    category: RecommendationCategory::LockOrder,
    message,
    affected_resources: resources,
    confidence,
  });
}

/// Every participant waits on the same resource: a lock upgrade race.
fn lock_upgrade(cycle: &Cycle, edges: &[&WaitEdge], out: &mut Vec<Recommendation>) {
  let resources = distinct_resources(edges);
  let [resource] = resources.as_slice() else {
    return;
  };
  let strongest = edges
    .iter()
    .map(|e| e.mode)
    .filter(|m| *m != LockMode::Unknown)
    .max()
    .unwrap_or(LockMode::Unknown);

  out.push(Recommendation {
    category: RecommendationCategory::TransactionScope,
    message: format!(
      "Processes {} all wait on {}; each likely holds a weaker lock on it and tries to upgrade to {}. \
       Take the strongest lock first (SELECT ... FOR UPDATE, or LOCK TABLE in the final mode)",
      join_ids(cycle.participants()),
      resource,
      strongest
    ),
    affected_resources: resources.clone(),
    confidence: Confidence::High,
  });
}

/// Table-level share-or-stronger lock with no row-level lock on the same relation.
fn indexing(
  graph: &WaitGraph,
  edges: &[&WaitEdge],
  row_level_relations: &HashSet<&str>,
  out: &mut Vec<Recommendation>,
) {
  for edge in edges {
    if !edge.resource.kind.is_table_level() || edge.mode.exclusivity() < 2 {
      continue;
    }
    let narrowed = edge
      .resource
      .relation
      .as_deref()
      .is_some_and(|r| row_level_relations.contains(r));
    if narrowed {
      continue;
    }

    let unfiltered_write = graph
      .node(&edge.from)
      .and_then(|p| p.query.as_deref())
      .is_some_and(|q| re_write_statement().is_match(q) && !re_where().is_match(q));
    let confidence = if unfiltered_write {
      Confidence::High
    } else {
      Confidence::Medium
    };

    out.push(Recommendation {
      category: RecommendationCategory::Indexing,
      message: format!(
        "Process {} requests {} on all of {}; statements that scan it without a usable index \
         escalate to table-wide locking. Index the filtered columns so locks narrow to rows",
        edge.from, edge.mode, edge.resource
      ),
      affected_resources: vec![edge.resource.clone()],
      confidence,
    });
  }
}

/// Row-level conflicts (waiting for another transaction to finish).
fn isolation_level(edges: &[&WaitEdge], out: &mut Vec<Recommendation>) {
  let txns: Vec<&WaitEdge> = edges
    .iter()
    .copied()
    .filter(|e| {
      matches!(
        e.resource.kind,
        ResourceKind::Transaction | ResourceKind::VirtualTransaction
      )
    })
    .collect();
  if txns.is_empty() {
    return;
  }

  out.push(Recommendation {
    category: RecommendationCategory::IsolationLevel,
    message: "Concurrent transactions updated the same rows; retry the whole transaction on \
              SQLSTATE 40P01 and use the weakest isolation level that stays correct \
              (READ COMMITTED unless REPEATABLE READ or SERIALIZABLE is required)"
      .to_string(),
    affected_resources: distinct_resources(&txns),
    confidence: Confidence::Low,
  });
}

/// Advisory locks and unrecognized lock modes.
fn other_patterns(edges: &[&WaitEdge], out: &mut Vec<Recommendation>) {
  let advisory: Vec<&WaitEdge> = edges
    .iter()
    .copied()
    .filter(|e| e.resource.kind == ResourceKind::Advisory)
    .collect();
  if !advisory.is_empty() {
    out.push(Recommendation {
      category: RecommendationCategory::Other,
      message: "Application advisory locks take part in the cycle; acquire advisory locks \
                in ascending key order and release them before touching table rows"
        .to_string(),
      affected_resources: distinct_resources(&advisory),
      confidence: Confidence::Medium,
    });
  }

  let unknown: Vec<&WaitEdge> = edges
    .iter()
    .copied()
    .filter(|e| e.mode == LockMode::Unknown)
    .collect();
  if !unknown.is_empty() {
    out.push(Recommendation {
      category: RecommendationCategory::Other,
      message: "Some lock modes in this cycle were not recognized; confirm the report comes \
                from a supported database engine before acting on other hints"
        .to_string(),
      affected_resources: distinct_resources(&unknown),
      confidence: Confidence::Low,
    });
  }
}

/// Sessions queued behind the deadlock: shorten lock hold times.
fn blast_radius(graph: &WaitGraph, residual: &[ProcessId], out: &mut Vec<Recommendation>) {
  if residual.is_empty() {
    return;
  }
  let waiters: HashSet<&ProcessId> = residual.iter().collect();
  let queued: Vec<&WaitEdge> = graph
    .edges
    .iter()
    .filter(|e| waiters.contains(&e.from))
    .collect();

  let confidence = if residual.len() >= CROWDED_RESIDUAL {
    Confidence::Medium
  } else {
    Confidence::Low
  };

  out.push(Recommendation {
    category: RecommendationCategory::TransactionScope,
    message: format!(
      "{} more session(s) ({}) were queued behind the deadlock; keep transactions short and \
       commit before slow work (network calls, user input) to limit how long locks are held",
      residual.len(),
      join_ids(residual)
    ),
    affected_resources: distinct_resources(&queued),
    confidence,
  });
}

fn dedup(recs: Vec<Recommendation>) -> Vec<Recommendation> {
  let mut seen = HashSet::new();
  recs
    .into_iter()
    .filter(|r| seen.insert((r.category, r.affected_resources.clone())))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;
  use crate::cycles::find_cycles;
  use crate::graph;
  use crate::score::score;
  use std::collections::BTreeMap;

  fn edge(from: &str, to: &str, resource: Resource, mode: LockMode) -> WaitEdge {
    WaitEdge {
      from: from.into(),
      to: to.into(),
      resource,
      mode,
    }
  }

  fn table(name: &str) -> Resource {
    Resource::new(ResourceKind::Table, name).in_relation(name)
  }

  fn run(processes: BTreeMap<ProcessId, Process>, edges: Vec<WaitEdge>) -> Vec<Recommendation> {
    let config = Config::default();
    let g = graph::build(processes, edges);
    let a = find_cycles(&g, &config).unwrap();
    let s = score(&g, &a, &config);
    recommend(&g, &a, &s)
  }

  fn categories(recs: &[Recommendation]) -> Vec<RecommendationCategory> {
    recs.iter().map(|r| r.category).collect()
  }

  #[test]
  fn opposite_order_two_tables() {
    let recs = run(
      BTreeMap::new(),
      vec![
        edge("100", "101", table("orders"), LockMode::ExclusiveLock),
        edge("101", "100", table("customers"), LockMode::ExclusiveLock),
      ],
    );
    assert_eq!(recs[0].category, RecommendationCategory::LockOrder);
    assert_eq!(recs[0].confidence, Confidence::High);
    assert_eq!(recs[0].affected_resources.len(), 2);
    assert!(recs[0].message.contains("Process 100 holds table customers"));
    // Both table-level exclusive requests also suggest indexing.
    assert_eq!(
      categories(&recs),
      vec![
        RecommendationCategory::LockOrder,
        RecommendationCategory::Indexing,
        RecommendationCategory::Indexing
      ]
    );
  }

  #[test]
  fn single_resource_cycle_is_lock_upgrade() {
    let recs = run(
      BTreeMap::new(),
      vec![
        edge("1", "2", table("t"), LockMode::ShareRowExclusiveLock),
        edge("2", "1", table("t"), LockMode::ShareRowExclusiveLock),
      ],
    );
    assert_eq!(recs[0].category, RecommendationCategory::TransactionScope);
    assert!(recs[0].message.contains("ShareRowExclusiveLock"));
    // Indexing fires once per edge but dedups on the shared resource.
    assert_eq!(
      categories(&recs),
      vec![RecommendationCategory::TransactionScope, RecommendationCategory::Indexing]
    );
  }

  #[test]
  fn tuple_locks_suppress_indexing() {
    let recs = run(
      BTreeMap::new(),
      vec![
        edge("1", "2", table("16384"), LockMode::ShareLock),
        edge("2", "1", table("16390"), LockMode::ShareLock),
        edge(
          "3",
          "1",
          Resource::new(ResourceKind::Tuple, "(0,1) of relation 16384 of database 5").in_relation("16384"),
          LockMode::ExclusiveLock,
        ),
      ],
    );
    let indexing: Vec<_> = recs
      .iter()
      .filter(|r| r.category == RecommendationCategory::Indexing)
      .collect();
    assert_eq!(indexing.len(), 1);
    assert_eq!(indexing[0].affected_resources[0].name, "16390");
  }

  #[test]
  fn unfiltered_update_raises_indexing_confidence() {
    let mut processes = BTreeMap::new();
    let mut p = Process::stub("1".into());
    p.query = Some("UPDATE accounts SET frozen = true".into());
    processes.insert(p.id.clone(), p);
    let recs = run(
      processes,
      vec![
        edge("1", "2", table("accounts"), LockMode::ExclusiveLock),
        edge("2", "1", table("ledger"), LockMode::ExclusiveLock),
      ],
    );
    let idx = recs
      .iter()
      .find(|r| r.affected_resources[0].name == "accounts" && r.category == RecommendationCategory::Indexing)
      .unwrap();
    assert_eq!(idx.confidence, Confidence::High);
  }

  #[test]
  fn row_level_transaction_cycle() {
    let txn = |x: &str| Resource::new(ResourceKind::Transaction, x);
    let recs = run(
      BTreeMap::new(),
      vec![
        edge("1", "2", txn("900"), LockMode::ShareLock),
        edge("2", "1", txn("901"), LockMode::ShareLock),
        edge("3", "2", txn("900"), LockMode::ShareLock),
      ],
    );
    assert_eq!(
      categories(&recs),
      vec![
        RecommendationCategory::LockOrder,
        RecommendationCategory::IsolationLevel,
        RecommendationCategory::TransactionScope
      ]
    );
    assert_eq!(recs[2].confidence, Confidence::Low);
    assert!(recs[2].message.contains("(3)"));
  }

  #[test]
  fn advisory_and_unknown_modes_are_other() {
    let recs = run(
      BTreeMap::new(),
      vec![
        edge("1", "2", Resource::new(ResourceKind::Advisory, "5,0,1,1"), LockMode::Unknown),
        edge("2", "1", Resource::new(ResourceKind::Advisory, "5,0,2,1"), LockMode::Unknown),
      ],
    );
    let other: Vec<_> = recs
      .iter()
      .filter(|r| r.category == RecommendationCategory::Other)
      .collect();
    // Same resource set for both "other" hints: dedup keeps the advisory one.
    assert_eq!(other.len(), 1);
    assert!(other[0].message.contains("advisory"));
  }
}
