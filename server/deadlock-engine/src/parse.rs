//! Parse role-tagged report lines into processes, lock requests and wait edges.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

use crate::error::AnalysisError;
use crate::normalize::excerpt;
use crate::types::*;

/// Typed entities extracted from one report.
#[derive(Debug, Clone, Default)]
pub struct ParsedReport {
  pub processes: BTreeMap<ProcessId, Process>,
  pub locks: BTreeSet<LockRequest>,
  /// In report order; duplicates are left for the graph builder.
  pub edges: Vec<WaitEdge>,
  pub warnings: Vec<String>,
}

fn re_waits() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(
      r"(?i)^process\s+(\d+)\s+waits\s+for\s+(\S+)\s+on\s+(.+?)\s*;\s*blocked\s+by\s+process\s+(\d+)\s*\.?$",
    )
    .unwrap()
  })
}

fn re_query() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"(?i)^process\s+(\d+):\s*(.*)$").unwrap())
}

fn re_tuple() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"(?i)^tuple\s+\((\d+),\s*(\d+)\)\s+of\s+relation\s+(\d+)\s+of\s+database\s+(\d+)$")
      .unwrap()
  })
}

fn re_page() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"(?i)^page\s+(\d+)\s+of\s+relation\s+(\d+)\s+of\s+database\s+(\d+)$").unwrap()
  })
}

fn re_relation_oid() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"(?i)^relation\s+(\d+)\s+of\s+database\s+(\d+)$").unwrap())
}

fn re_named() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r#"(?i)^(table|relation|index)\s+"?([^\s"]+)"?$"#).unwrap())
}

fn re_transaction() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"(?i)^transaction\s+(\d+)$").unwrap())
}

fn re_virtual_transaction() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"(?i)^virtual\s+transaction\s+(\S+)$").unwrap())
}

fn re_advisory() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"(?i)^advisory\s+lock\s+\[([^\]]+)\]$").unwrap())
}

/// Convert the token stream into typed entities.
///
/// Query text is kept only in enhanced mode. Fails only when no wait edge
/// can be derived at all.
pub fn parse(stream: TokenStream, mode: AnalysisMode) -> Result<ParsedReport, AnalysisError> {
  let TokenStream {
    tokens,
    hints,
    warnings,
  } = stream;

  let mut state = ParseState {
    report: ParsedReport {
      warnings,
      ..ParsedReport::default()
    },
    waiting_on: HashMap::new(),
  };

  // Queries attach once every wait line has been seen.
  let mut wait_lines = 0usize;
  let mut queries = Vec::new();
  for token in &tokens {
    match token.role {
      LineRole::WaitsFor => {
        wait_lines += 1;
        state.wait_line(&token.text);
      }
      LineRole::Query => queries.push(token.text.as_str()),
      LineRole::Context | LineRole::Unknown => {}
    }
  }

  for text in queries {
    state.query_line(text, mode);
  }

  for hint in hints {
    state.apply_hint(hint, mode);
  }

  let report = state.report;
  if report.edges.is_empty() {
    return Err(
      AnalysisError::unparseable("no wait-for relationships found").with_details(format!(
        "{} waits-for lines in {} report lines",
        wait_lines,
        tokens.len()
      )),
    );
  }

  tracing::debug!(
    processes = report.processes.len(),
    edges = report.edges.len(),
    locks = report.locks.len(),
    warnings = report.warnings.len(),
    "parsed report"
  );
  Ok(report)
}

struct ParseState {
  report: ParsedReport,
  /// First resource each process was seen waiting on.
  waiting_on: HashMap<ProcessId, Resource>,
}

impl ParseState {
  fn warn(&mut self, msg: String) {
    tracing::debug!(warning = %msg, "parse anomaly");
    self.report.warnings.push(msg);
  }

  fn ensure_process(&mut self, id: &ProcessId) -> &mut Process {
    self
      .report
      .processes
      .entry(id.clone())
      .or_insert_with(|| Process::stub(id.clone()))
  }

  fn wait_line(&mut self, text: &str) {
    let Some(caps) = re_waits().captures(text) else {
      self.warn(format!("malformed waits-for line skipped: {}", excerpt(text)));
      return;
    };
    let waiter = ProcessId::new(&caps[1]);
    let holder = ProcessId::new(&caps[4]);
    let mode_name = caps[2].to_string();
    let resource_text = caps[3].to_string();

    self.ensure_process(&waiter);
    if waiter == holder {
      self.warn(format!("process {} reported as blocked by itself; line skipped", waiter));
      return;
    }
    self.ensure_process(&holder);

    let mode = match LockMode::from_name(&mode_name) {
      Some(m) => m,
      None => {
        self.warn(format!(
          "unknown lock mode {:?} for process {}; treated as unknown",
          mode_name, waiter
        ));
        LockMode::Unknown
      }
    };

    let resource = self.resource(&resource_text);

    match self.waiting_on.get(&waiter).cloned() {
      Some(first) if first != resource => {
        self.warn(format!(
          "process {} waits for both {} and {}; keeping the first",
          waiter, first, resource
        ));
        return;
      }
      Some(_) => {}
      None => {
        self.waiting_on.insert(waiter.clone(), resource.clone());
      }
    }

    if resource.kind == ResourceKind::Transaction {
      self.set_transaction(&holder, &resource.name);
    }

    self.report.locks.insert(LockRequest {
      holder: waiter.clone(),
      mode,
      resource: resource.clone(),
      granted: false,
    });
    self.report.locks.insert(LockRequest {
      holder: holder.clone(),
      mode: LockMode::Unknown,
      resource: resource.clone(),
      granted: true,
    });
    self.report.edges.push(WaitEdge {
      from: waiter,
      to: holder,
      resource,
      mode,
    });
  }

  fn query_line(&mut self, text: &str, mode: AnalysisMode) {
    let Some(caps) = re_query().captures(text) else {
      self.warn(format!("malformed query line skipped: {}", excerpt(text)));
      return;
    };
    let id = ProcessId::new(&caps[1]);
    if !self.report.processes.contains_key(&id) {
      self.warn(format!("query for process {} not in any wait relationship; ignored", id));
      return;
    }
    let query = caps[2].trim().to_string();
    if mode.is_enhanced() && !query.is_empty() {
      self.set_query(&id, query);
    }
  }

  fn apply_hint(&mut self, hint: ProcessHint, mode: AnalysisMode) {
    if !self.report.processes.contains_key(&hint.id) {
      self.warn(format!("metadata for process {} not in report; ignored", hint.id));
      return;
    }
    if let Some(xid) = &hint.transaction_id {
      self.set_transaction(&hint.id, xid);
    }
    if let Some(query) = hint.query.filter(|_| mode.is_enhanced()) {
      self.set_query(&hint.id, query);
    }
    if let Some(name) = hint.application_name {
      let process = self.ensure_process(&hint.id);
      if process.application_name.is_none() {
        process.application_name = Some(name);
      }
    }
  }

  /// First transaction id wins; a different later one is a warning.
  fn set_transaction(&mut self, id: &ProcessId, xid: &str) {
    let process = self.ensure_process(id);
    let Some(existing) = process.transaction_id.clone() else {
      process.transaction_id = Some(xid.to_string());
      return;
    };
    if existing != xid {
      self.warn(format!(
        "process {} has conflicting transaction ids {} and {}; keeping the first",
        id, existing, xid
      ));
    }
  }

  fn set_query(&mut self, id: &ProcessId, query: String) {
    let process = self.ensure_process(id);
    let Some(existing) = process.query.clone() else {
      process.query = Some(query);
      return;
    };
    if existing != query {
      self.warn(format!("process {} has more than one query; keeping the first", id));
    }
  }

  fn resource(&mut self, text: &str) -> Resource {
    match parse_resource(text) {
      Some(r) => r,
      None => {
        self.warn(format!("unrecognized lock target {:?}; kept verbatim", text));
        Resource::new(ResourceKind::Other, text)
      }
    }
  }
}

/// Parse a lock target (`table orders`, `transaction 812`, `tuple (0,5) of relation ...`).
pub fn parse_resource(text: &str) -> Option<Resource> {
  let text = text.trim();

  if let Some(c) = re_tuple().captures(text) {
    let name = format!("({},{}) of relation {} of database {}", &c[1], &c[2], &c[3], &c[4]);
    return Some(Resource::new(ResourceKind::Tuple, name).in_relation(&c[3]));
  }
  if let Some(c) = re_page().captures(text) {
    let name = format!("{} of relation {} of database {}", &c[1], &c[2], &c[3]);
    return Some(Resource::new(ResourceKind::Page, name).in_relation(&c[2]));
  }
  if let Some(c) = re_relation_oid().captures(text) {
    let name = format!("{} of database {}", &c[1], &c[2]);
    return Some(Resource::new(ResourceKind::Relation, name).in_relation(&c[1]));
  }
  if let Some(c) = re_named().captures(text) {
    let name = c[2].to_string();
    return Some(match c[1].to_ascii_lowercase().as_str() {
      "index" => Resource::new(ResourceKind::Index, name),
      "table" => Resource::new(ResourceKind::Table, name.clone()).in_relation(name),
      _ => Resource::new(ResourceKind::Relation, name.clone()).in_relation(name),
    });
  }
  if let Some(c) = re_transaction().captures(text) {
    return Some(Resource::new(ResourceKind::Transaction, &c[1]));
  }
  if let Some(c) = re_virtual_transaction().captures(text) {
    return Some(Resource::new(ResourceKind::VirtualTransaction, &c[1]));
  }
  if let Some(c) = re_advisory().captures(text) {
    return Some(Resource::new(ResourceKind::Advisory, c[1].trim()));
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;

  fn stream(lines: &[(LineRole, &str)]) -> TokenStream {
    TokenStream {
      tokens: lines
        .iter()
        .map(|(role, text)| Token {
          role: *role,
          text: text.to_string(),
        })
        .collect(),
      hints: Vec::new(),
      warnings: Vec::new(),
    }
  }

  fn id(s: &str) -> ProcessId {
    ProcessId::from(s)
  }

  #[test]
  fn waits_for_line_yields_edge_and_two_processes() {
    let s = stream(&[(
      LineRole::WaitsFor,
      "Process 100 waits for ExclusiveLock on table orders; blocked by process 101",
    )]);
    let parsed = parse(s, AnalysisMode::Standard).unwrap();
    assert_eq!(parsed.processes.len(), 2);
    assert_eq!(parsed.edges.len(), 1);
    let edge = &parsed.edges[0];
    assert_eq!(edge.from, id("100"));
    assert_eq!(edge.to, id("101"));
    assert_eq!(edge.mode, LockMode::ExclusiveLock);
    assert_eq!(edge.resource, Resource::new(ResourceKind::Table, "orders").in_relation("orders"));
    assert_eq!(parsed.locks.len(), 2);
    assert!(parsed.locks.iter().any(|l| l.holder == id("101") && l.granted));
    assert!(parsed.warnings.is_empty());
  }

  #[test]
  fn transaction_wait_identifies_holder_xid() {
    let s = stream(&[(
      LineRole::WaitsFor,
      "Process 7 waits for ShareLock on transaction 9001; blocked by process 8.",
    )]);
    let parsed = parse(s, AnalysisMode::Standard).unwrap();
    assert_eq!(parsed.processes[&id("8")].transaction_id.as_deref(), Some("9001"));
    assert_eq!(parsed.processes[&id("7")].transaction_id, None);
  }

  #[test]
  fn unknown_mode_is_a_warning_not_a_failure() {
    let s = stream(&[(
      LineRole::WaitsFor,
      "Process 1 waits for SuperLock on table a; blocked by process 2",
    )]);
    let parsed = parse(s, AnalysisMode::Standard).unwrap();
    assert_eq!(parsed.edges[0].mode, LockMode::Unknown);
    assert!(parsed.warnings[0].contains("SuperLock"));
  }

  #[test]
  fn conflicting_resource_keeps_first_line() {
    let s = stream(&[
      (LineRole::WaitsFor, "Process 1 waits for ExclusiveLock on table a; blocked by process 2"),
      (LineRole::WaitsFor, "Process 1 waits for ExclusiveLock on table b; blocked by process 3"),
    ]);
    let parsed = parse(s, AnalysisMode::Standard).unwrap();
    assert_eq!(parsed.edges.len(), 1);
    assert_eq!(parsed.edges[0].resource.name, "a");
    assert!(parsed.processes.contains_key(&id("3")));
    assert!(parsed.warnings.iter().any(|w| w.contains("keeping the first")));
  }

  #[test]
  fn self_wait_is_skipped() {
    let s = stream(&[
      (LineRole::WaitsFor, "Process 1 waits for ExclusiveLock on table a; blocked by process 1"),
      (LineRole::WaitsFor, "Process 2 waits for ExclusiveLock on table a; blocked by process 3"),
    ]);
    let parsed = parse(s, AnalysisMode::Standard).unwrap();
    assert_eq!(parsed.edges.len(), 1);
    assert!(parsed.processes.contains_key(&id("1")));
    assert!(parsed.warnings[0].contains("blocked by itself"));
  }

  #[test]
  fn query_text_only_in_enhanced_mode() {
    let lines = [
      (LineRole::WaitsFor, "Process 1 waits for ExclusiveLock on table a; blocked by process 2"),
      (LineRole::Query, "Process 1: UPDATE a SET v = 1"),
    ];
    let enhanced = parse(stream(&lines), AnalysisMode::Enhanced).unwrap();
    assert_eq!(enhanced.processes[&id("1")].query.as_deref(), Some("UPDATE a SET v = 1"));
    let standard = parse(stream(&lines), AnalysisMode::Standard).unwrap();
    assert_eq!(standard.processes[&id("1")].query, None);
  }

  #[test]
  fn query_for_unknown_process_adds_no_node() {
    let lines = [
      (LineRole::Query, "Process 2: UPDATE b SET v = 2"),
      (LineRole::WaitsFor, "Process 1 waits for ExclusiveLock on table a; blocked by process 2"),
      (LineRole::Query, "Process 7: SELECT pg_sleep(1)"),
    ];
    let parsed = parse(stream(&lines), AnalysisMode::Enhanced).unwrap();
    assert_eq!(parsed.processes.len(), 2);
    assert!(!parsed.processes.contains_key(&id("7")));
    assert_eq!(parsed.processes[&id("2")].query.as_deref(), Some("UPDATE b SET v = 2"));
    assert!(parsed.warnings.iter().any(|w| w.contains("process 7")));
  }

  #[test]
  fn malformed_lines_are_quoted_as_excerpts() {
    let long = format!("Process 1 waits for {}", "x".repeat(10_000));
    let s = stream(&[
      (LineRole::WaitsFor, long.as_str()),
      (LineRole::WaitsFor, "Process 1 waits for ExclusiveLock on table a; blocked by process 2"),
    ]);
    let parsed = parse(s, AnalysisMode::Standard).unwrap();
    assert!(parsed.warnings[0].starts_with("malformed waits-for line skipped"));
    assert!(parsed.warnings[0].len() < 1_000);
  }

  #[test]
  fn no_edges_is_unparseable() {
    let s = stream(&[
      (LineRole::Context, "ERROR: deadlock detected"),
      (LineRole::WaitsFor, "Process 1 waits for something odd"),
    ]);
    let err = parse(s, AnalysisMode::Standard).unwrap_err();
    assert!(matches!(err, AnalysisError::Unparseable { .. }));
  }

  #[test]
  fn hints_enrich_known_processes_only() {
    let mut s = stream(&[(
      LineRole::WaitsFor,
      "Process 1 waits for ExclusiveLock on table a; blocked by process 2",
    )]);
    s.hints = vec![
      ProcessHint {
        id: id("1"),
        application_name: Some("api".into()),
        query: Some("SELECT 1".into()),
        ..ProcessHint::default()
      },
      ProcessHint {
        id: id("99"),
        ..ProcessHint::default()
      },
    ];
    let parsed = parse(s, AnalysisMode::Standard).unwrap();
    assert_eq!(parsed.processes[&id("1")].application_name.as_deref(), Some("api"));
    assert_eq!(parsed.processes[&id("1")].query, None);
    assert!(!parsed.processes.contains_key(&id("99")));
    assert_eq!(parsed.warnings.len(), 1);
  }

  #[test]
  fn resource_grammar() {
    let tuple = parse_resource("tuple (0,5) of relation 16384 of database 16385").unwrap();
    assert_eq!(tuple.kind, ResourceKind::Tuple);
    assert_eq!(tuple.relation.as_deref(), Some("16384"));

    let rel = parse_resource("relation 16384 of database 16385").unwrap();
    assert_eq!(rel.kind, ResourceKind::Relation);
    assert_eq!(rel.relation.as_deref(), Some("16384"));

    let idx = parse_resource("index \"orders_pkey\"").unwrap();
    assert_eq!(idx, Resource::new(ResourceKind::Index, "orders_pkey"));

    let vxid = parse_resource("virtual transaction 4/1022").unwrap();
    assert_eq!(vxid.kind, ResourceKind::VirtualTransaction);

    let adv = parse_resource("advisory lock [16385,0,42,1]").unwrap();
    assert_eq!(adv.name, "16385,0,42,1");

    assert!(parse_resource("the moon").is_none());
  }
}
