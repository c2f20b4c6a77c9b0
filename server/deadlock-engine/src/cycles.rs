//! Deadlock proof: find every simple cycle in the wait-for graph and the
//! residual waiters queued behind it.
//!
//! Nodes are addressed by their index in `WaitGraph::nodes`, which is sorted
//! by id, so index order is id order. Enumeration anchors each search at one
//! node and only walks to larger indices, so every cycle is found once and
//! already starts at its smallest id.

use std::collections::{BTreeSet, VecDeque};

use crate::config::Config;
use crate::error::AnalysisError;
use crate::types::{Cycle, ProcessId, WaitEdge, WaitGraph};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleAnalysis {
  /// Canonical cycles, sorted.
  pub cycles: Vec<Cycle>,
  /// Non-cycle processes blocked (transitively) on a cycle participant, sorted.
  pub residual: Vec<ProcessId>,
  pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
  White,
  Gray,
  Black,
}

/// Find the deadlock cycle(s). An acyclic graph is `NoCycleFound`.
pub fn find_cycles(graph: &WaitGraph, config: &Config) -> Result<CycleAnalysis, AnalysisError> {
  let adj = adjacency(graph)?;

  let Some(witness) = first_cycle(&adj) else {
    return Err(
      AnalysisError::no_cycle("wait-for graph is acyclic; input is not a deadlock report")
        .with_details(format!(
          "{} processes, {} wait edges",
          graph.nodes.len(),
          graph.edges.len()
        )),
    );
  };

  let mut warnings = Vec::new();
  let mut found = enumerate(&adj, config, &mut warnings);
  if found.is_empty() {
    found.push(rotate_to_min(witness));
  }
  found.sort();
  found.dedup();

  let in_cycle: BTreeSet<usize> = found
    .iter()
    .flat_map(|c| c.iter().copied())
    .collect();
  let residual = residual_waiters(&adj, &in_cycle)
    .into_iter()
    .map(|i| graph.nodes[i].id.clone())
    .collect();

  let cycles: Vec<Cycle> = found
    .into_iter()
    .map(|c| Cycle(c.into_iter().map(|i| graph.nodes[i].id.clone()).collect()))
    .collect();

  for cycle in &cycles {
    verify_cycle(graph, cycle)?;
  }

  tracing::debug!(cycles = cycles.len(), "found deadlock cycles");
  Ok(CycleAnalysis {
    cycles,
    residual,
    warnings,
  })
}

/// Edges of `graph` that run along `cycle`, in loop order.
pub fn cycle_edges<'a>(graph: &'a WaitGraph, cycle: &'a Cycle) -> Vec<&'a WaitEdge> {
  cycle
    .pairs()
    .flat_map(|(from, to)| graph.edges_between(from, to))
    .collect()
}

/// Successor lists by node index, sorted and deduplicated.
fn adjacency(graph: &WaitGraph) -> Result<Vec<Vec<usize>>, AnalysisError> {
  let index_of = |id: &ProcessId| -> Result<usize, AnalysisError> {
    graph.nodes.binary_search_by(|p| p.id.cmp(id)).map_err(|_| {
      AnalysisError::internal("wait edge references a missing process").with_details(id.to_string())
    })
  };

  let mut adj = vec![Vec::new(); graph.nodes.len()];
  for edge in &graph.edges {
    let from = index_of(&edge.from)?;
    let to = index_of(&edge.to)?;
    adj[from].push(to);
  }
  for succ in &mut adj {
    succ.sort_unstable();
    succ.dedup();
  }
  Ok(adj)
}

/// White/gray/black DFS; a back edge to a gray node closes a cycle.
/// Returns that cycle (stack segment plus the closing node), or `None` if acyclic.
fn first_cycle(adj: &[Vec<usize>]) -> Option<Vec<usize>> {
  let mut color = vec![Color::White; adj.len()];

  for start in 0..adj.len() {
    if color[start] != Color::White {
      continue;
    }
    color[start] = Color::Gray;
    let mut stack: Vec<(usize, usize)> = vec![(start, 0)];

    while let Some(frame) = stack.last_mut() {
      let (node, next) = *frame;
      let Some(&succ) = adj[node].get(next) else {
        color[node] = Color::Black;
        stack.pop();
        continue;
      };
      frame.1 += 1;

      match color[succ] {
        Color::Gray => {
          let pos = stack.iter().position(|&(n, _)| n == succ)?;
          let mut cycle: Vec<usize> = stack[pos..].iter().map(|&(n, _)| n).collect();
          cycle.push(succ);
          return Some(cycle);
        }
        Color::White => {
          color[succ] = Color::Gray;
          stack.push((succ, 0));
        }
        Color::Black => {}
      }
    }
  }
  None
}

/// Every simple cycle, anchored at its smallest node, within the configured budgets.
fn enumerate(adj: &[Vec<usize>], config: &Config, warnings: &mut Vec<String>) -> Vec<Vec<usize>> {
  let mut cycles: Vec<Vec<usize>> = Vec::new();
  let mut on_path = vec![false; adj.len()];
  let mut steps = 0usize;

  'anchors: for anchor in 0..adj.len() {
    on_path[anchor] = true;
    let mut stack: Vec<(usize, usize)> = vec![(anchor, 0)];

    while let Some(frame) = stack.last_mut() {
      let (node, next) = *frame;
      let Some(&succ) = adj[node].get(next) else {
        on_path[node] = false;
        stack.pop();
        continue;
      };
      frame.1 += 1;

      steps += 1;
      if steps > config.max_search_steps {
        warnings.push(if cycles.is_empty() {
          format!(
            "cycle search stopped after {} steps before enumerating any cycle; \
             reporting the first cycle found by depth-first search",
            config.max_search_steps
          )
        } else {
          format!(
            "cycle search stopped after {} steps; reporting the {} cycle(s) found so far",
            config.max_search_steps,
            cycles.len()
          )
        });
        break 'anchors;
      }

      if succ == anchor {
        if cycles.len() == config.max_cycles {
          warnings.push(format!(
            "more than {} cycles present; only the first {} are reported",
            config.max_cycles, config.max_cycles
          ));
          break 'anchors;
        }
        let mut cycle: Vec<usize> = stack.iter().map(|&(n, _)| n).collect();
        cycle.push(anchor);
        cycles.push(cycle);
      } else if succ > anchor && !on_path[succ] {
        on_path[succ] = true;
        stack.push((succ, 0));
      }
    }
  }

  cycles
}

/// Rotate a closed loop so it starts (and ends) at its smallest node.
fn rotate_to_min(mut cycle: Vec<usize>) -> Vec<usize> {
  cycle.pop();
  let min_pos = cycle
    .iter()
    .enumerate()
    .min_by_key(|&(_, n)| *n)
    .map_or(0, |(i, _)| i);
  cycle.rotate_left(min_pos);
  if let Some(&first) = cycle.first() {
    cycle.push(first);
  }
  cycle
}

/// Nodes outside any cycle from which a cycle node is reachable.
fn residual_waiters(adj: &[Vec<usize>], in_cycle: &BTreeSet<usize>) -> Vec<usize> {
  let mut reverse = vec![Vec::new(); adj.len()];
  for (from, succ) in adj.iter().enumerate() {
    for &to in succ {
      reverse[to].push(from);
    }
  }

  let mut seen = vec![false; adj.len()];
  let mut queue: VecDeque<usize> = in_cycle.iter().copied().collect();
  for &n in in_cycle {
    seen[n] = true;
  }

  let mut residual = Vec::new();
  while let Some(node) = queue.pop_front() {
    for &waiter in &reverse[node] {
      if !seen[waiter] {
        seen[waiter] = true;
        residual.push(waiter);
        queue.push_back(waiter);
      }
    }
  }
  residual.sort_unstable();
  residual
}

fn verify_cycle(graph: &WaitGraph, cycle: &Cycle) -> Result<(), AnalysisError> {
  if !cycle.is_closed() {
    return Err(AnalysisError::internal("cycle is not closed").with_details(cycle.to_string()));
  }
  if let Some((from, to)) = cycle.pairs().find(|(f, t)| !graph.contains_edge(f, t)) {
    return Err(
      AnalysisError::internal("cycle step has no wait edge")
        .with_details(format!("{} -> {} in {}", from, to, cycle)),
    );
  }
  Ok(())
}
