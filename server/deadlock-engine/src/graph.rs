//! Assemble parsed entities into a directed wait-for graph.

use std::collections::{BTreeMap, HashSet};

use crate::error::AnalysisError;
use crate::types::{Process, ProcessId, WaitEdge, WaitGraph};

/// Build the wait-for graph.
///
/// - Edges with identical `(from, to, resource)` collapse to the first seen.
/// - Every edge endpoint becomes a node (stub if the parser never saw it).
/// - Nodes come out sorted by id, edges by `(from, to, resource, mode)`.
pub fn build(processes: BTreeMap<ProcessId, Process>, edges: Vec<WaitEdge>) -> WaitGraph {
  let mut nodes = processes;
  let mut seen = HashSet::new();
  let mut kept: Vec<WaitEdge> = Vec::with_capacity(edges.len());

  for edge in edges {
    if !seen.insert((edge.from.clone(), edge.to.clone(), edge.resource.clone())) {
      continue;
    }
    for endpoint in [&edge.from, &edge.to] {
      nodes
        .entry(endpoint.clone())
        .or_insert_with(|| Process::stub(endpoint.clone()));
    }
    kept.push(edge);
  }

  kept.sort();

  let graph = WaitGraph {
    nodes: nodes.into_values().collect(),
    edges: kept,
  };
  tracing::debug!(
    nodes = graph.nodes.len(),
    edges = graph.edges.len(),
    "built wait-for graph"
  );
  graph
}

/// Check the structural invariants later stages rely on.
pub fn verify(graph: &WaitGraph) -> Result<(), AnalysisError> {
  if let Some(w) = graph.nodes.windows(2).find(|w| w[0].id >= w[1].id) {
    return Err(
      AnalysisError::internal("graph nodes are not sorted and unique")
        .with_details(format!("{} before {}", w[0].id, w[1].id)),
    );
  }
  if let Some(edge) = graph
    .edges
    .iter()
    .find(|e| !graph.contains_node(&e.from) || !graph.contains_node(&e.to))
  {
    return Err(
      AnalysisError::internal("wait edge references a missing process")
        .with_details(format!("{} -> {}", edge.from, edge.to)),
    );
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{LockMode, Resource, ResourceKind};

  fn edge(from: &str, to: &str, table: &str) -> WaitEdge {
    WaitEdge {
      from: from.into(),
      to: to.into(),
      resource: Resource::new(ResourceKind::Table, table),
      mode: LockMode::ExclusiveLock,
    }
  }

  #[test]
  fn duplicate_edges_collapse() {
    let graph = build(
      BTreeMap::new(),
      vec![edge("1", "2", "a"), edge("1", "2", "a"), edge("1", "2", "b")],
    );
    assert_eq!(graph.edges.len(), 2);
    assert_eq!(graph.nodes.len(), 2);
  }

  #[test]
  fn endpoints_get_stub_nodes() {
    let mut processes = BTreeMap::new();
    let mut p1 = Process::stub("1".into());
    p1.application_name = Some("api".into());
    processes.insert(p1.id.clone(), p1);

    let graph = build(processes, vec![edge("1", "2", "a")]);
    assert_eq!(graph.nodes.len(), 2);
    assert_eq!(graph.node(&"1".into()).unwrap().application_name.as_deref(), Some("api"));
    assert_eq!(graph.node(&"2".into()).unwrap(), &Process::stub("2".into()));
    assert!(verify(&graph).is_ok());
  }

  #[test]
  fn output_is_sorted() {
    let graph = build(
      BTreeMap::new(),
      vec![edge("3", "1", "c"), edge("1", "2", "a"), edge("2", "3", "b")],
    );
    let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
    assert_eq!(graph.edges[0].from.as_str(), "1");
    assert_eq!(graph.edges[2].from.as_str(), "3");
  }

  #[test]
  fn verify_rejects_dangling_edges() {
    let graph = WaitGraph {
      nodes: vec![Process::stub("1".into())],
      edges: vec![edge("1", "9", "a")],
    };
    let err = verify(&graph).unwrap_err();
    assert!(matches!(err, AnalysisError::Internal { .. }));
  }
}
