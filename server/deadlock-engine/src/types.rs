//! Core types for the deadlock engine (JSON contracts + pipeline records).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// ---------------------------------------------------------------------------
// Inbound types (JSON contract: what the caller sends)
// ---------------------------------------------------------------------------

/// Whether to keep query text and per-process lock detail in the output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
  #[default]
  Standard,
  Enhanced,
}

impl AnalysisMode {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Standard => "standard",
      Self::Enhanced => "enhanced",
    }
  }

  pub fn is_enhanced(self) -> bool {
    self == Self::Enhanced
  }
}

/// One analysis request. Unknown fields are silently ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub text: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub structured: Option<Map<String, Value>>,
  #[serde(default)]
  pub mode: AnalysisMode,
}

impl AnalysisRequest {
  pub fn from_text(text: impl Into<String>, mode: AnalysisMode) -> Self {
    Self {
      text: Some(text.into()),
      structured: None,
      mode,
    }
  }

  pub fn raw(&self) -> RawReport {
    RawReport {
      text: self.text.clone(),
      structured: self.structured.clone(),
    }
  }
}

/// Opaque report input: free-form text and/or a partially structured payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawReport {
  pub text: Option<String>,
  pub structured: Option<Map<String, Value>>,
}

impl RawReport {
  pub fn from_text(text: impl Into<String>) -> Self {
    Self {
      text: Some(text.into()),
      structured: None,
    }
  }

  /// Pre-split report lines, carried as a structured `lines` array.
  pub fn from_lines<I, S>(lines: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let lines = lines
      .into_iter()
      .map(|l| Value::String(l.into()))
      .collect::<Vec<_>>();
    let mut structured = Map::new();
    structured.insert("lines".into(), Value::Array(lines));
    Self {
      text: None,
      structured: Some(structured),
    }
  }
}

// ---------------------------------------------------------------------------
// Normalized token stream
// ---------------------------------------------------------------------------

/// Semantic role of one normalized report line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineRole {
  WaitsFor,
  Query,
  Context,
  Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
  pub role: LineRole,
  pub text: String,
}

/// Per-process metadata supplied outside the report text (structured payloads).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessHint {
  pub id: ProcessId,
  pub transaction_id: Option<String>,
  pub application_name: Option<String>,
  pub query: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenStream {
  pub tokens: Vec<Token>,
  pub hints: Vec<ProcessHint>,
  pub warnings: Vec<String>,
}

impl TokenStream {
  /// Token texts in order; feeding them back through the normalizer is a no-op.
  pub fn lines(&self) -> Vec<String> {
    self.tokens.iter().map(|t| t.text.clone()).collect()
  }

  pub fn count(&self, role: LineRole) -> usize {
    self.tokens.iter().filter(|t| t.role == role).count()
  }
}

// ---------------------------------------------------------------------------
// Processes, lock modes, resources
// ---------------------------------------------------------------------------

/// Backend-assigned PID (or transaction identifier) naming one process.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub String);

impl ProcessId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for ProcessId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for ProcessId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
  pub id: ProcessId,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub transaction_id: Option<String>,
  /// Enhanced mode only.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub query: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub application_name: Option<String>,
  /// Enhanced mode only: locks this process holds or requests.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub locks: Vec<LockRequest>,
}

impl Process {
  /// Minimal node for an id seen without any metadata.
  pub fn stub(id: ProcessId) -> Self {
    Self {
      id,
      transaction_id: None,
      query: None,
      application_name: None,
      locks: Vec::new(),
    }
  }
}

/// Table-level lock modes of the source database engine, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LockMode {
  AccessShareLock,
  RowShareLock,
  RowExclusiveLock,
  ShareUpdateExclusiveLock,
  ShareLock,
  ShareRowExclusiveLock,
  ExclusiveLock,
  AccessExclusiveLock,
  #[serde(rename = "unknown")]
  Unknown,
}

impl LockMode {
  /// Exact vocabulary match (case-insensitive); anything else is `None`.
  pub fn from_name(s: &str) -> Option<Self> {
    match s.to_ascii_lowercase().as_str() {
      "accesssharelock" => Some(Self::AccessShareLock),
      "rowsharelock" => Some(Self::RowShareLock),
      "rowexclusivelock" => Some(Self::RowExclusiveLock),
      "shareupdateexclusivelock" => Some(Self::ShareUpdateExclusiveLock),
      "sharelock" => Some(Self::ShareLock),
      "sharerowexclusivelock" => Some(Self::ShareRowExclusiveLock),
      "exclusivelock" => Some(Self::ExclusiveLock),
      "accessexclusivelock" => Some(Self::AccessExclusiveLock),
      _ => None,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::AccessShareLock => "AccessShareLock",
      Self::RowShareLock => "RowShareLock",
      Self::RowExclusiveLock => "RowExclusiveLock",
      Self::ShareUpdateExclusiveLock => "ShareUpdateExclusiveLock",
      Self::ShareLock => "ShareLock",
      Self::ShareRowExclusiveLock => "ShareRowExclusiveLock",
      Self::ExclusiveLock => "ExclusiveLock",
      Self::AccessExclusiveLock => "AccessExclusiveLock",
      Self::Unknown => "unknown",
    }
  }

  /// Exclusivity class: 0 = shared read, 1 = row-write / unknown, 2 = share, 3 = exclusive.
  pub fn exclusivity(self) -> u8 {
    match self {
      Self::AccessShareLock | Self::RowShareLock => 0,
      Self::RowExclusiveLock | Self::ShareUpdateExclusiveLock | Self::Unknown => 1,
      Self::ShareLock | Self::ShareRowExclusiveLock => 2,
      Self::ExclusiveLock | Self::AccessExclusiveLock => 3,
    }
  }

  pub fn is_exclusive(self) -> bool {
    self.exclusivity() == 3
  }
}

impl fmt::Display for LockMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
  Table,
  Relation,
  Tuple,
  Page,
  Index,
  Transaction,
  VirtualTransaction,
  Advisory,
  Other,
}

impl ResourceKind {
  fn label(self) -> &'static str {
    match self {
      Self::Table => "table",
      Self::Relation => "relation",
      Self::Tuple => "tuple",
      Self::Page => "page",
      Self::Index => "index",
      Self::Transaction => "transaction",
      Self::VirtualTransaction => "virtual transaction",
      Self::Advisory => "advisory lock",
      Self::Other => "",
    }
  }

  /// Whole-table (or whole-relation) lock target.
  pub fn is_table_level(self) -> bool {
    matches!(self, Self::Table | Self::Relation)
  }
}

/// The object a lock is taken on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
  pub kind: ResourceKind,
  pub name: String,
  /// Relation this resource lives in, when the report names one.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub relation: Option<String>,
}

impl Resource {
  pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
    Self {
      kind,
      name: name.into(),
      relation: None,
    }
  }

  pub fn in_relation(mut self, relation: impl Into<String>) -> Self {
    self.relation = Some(relation.into());
    self
  }
}

impl fmt::Display for Resource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.kind {
      ResourceKind::Other => f.write_str(&self.name),
      ResourceKind::Advisory => write!(f, "advisory lock [{}]", self.name),
      kind => write!(f, "{} {}", kind.label(), self.name),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRequest {
  pub holder: ProcessId,
  pub mode: LockMode,
  pub resource: Resource,
  pub granted: bool,
}

// ---------------------------------------------------------------------------
// Wait-for graph
// ---------------------------------------------------------------------------

/// `from` waits for a lock on `resource` held by `to`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitEdge {
  pub from: ProcessId,
  pub to: ProcessId,
  pub resource: Resource,
  pub mode: LockMode,
}

/// Nodes sorted by id, edges sorted by `(from, to, resource)`; no dangling edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitGraph {
  pub nodes: Vec<Process>,
  pub edges: Vec<WaitEdge>,
}

impl WaitGraph {
  pub fn node(&self, id: &ProcessId) -> Option<&Process> {
    self
      .nodes
      .binary_search_by(|p| p.id.cmp(id))
      .ok()
      .map(|i| &self.nodes[i])
  }

  pub fn contains_node(&self, id: &ProcessId) -> bool {
    self.node(id).is_some()
  }

  /// All edges `from -> to` (one per resource).
  pub fn edges_between<'a>(
    &'a self,
    from: &'a ProcessId,
    to: &'a ProcessId,
  ) -> impl Iterator<Item = &'a WaitEdge> + 'a {
    self.edges.iter().filter(move |e| &e.from == from && &e.to == to)
  }

  pub fn contains_edge(&self, from: &ProcessId, to: &ProcessId) -> bool {
    self.edges.iter().any(|e| &e.from == from && &e.to == to)
  }
}

/// Closed loop of process ids: first == last, length >= 3 (two participants + closure).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cycle(pub Vec<ProcessId>);

impl Cycle {
  /// Participants without the closing repeat.
  pub fn participants(&self) -> &[ProcessId] {
    match self.0.split_last() {
      Some((_, rest)) => rest,
      None => &[],
    }
  }

  pub fn is_closed(&self) -> bool {
    self.0.len() >= 3 && self.0.first() == self.0.last()
  }

  /// Consecutive `(waiter, holder)` pairs around the loop.
  pub fn pairs(&self) -> impl Iterator<Item = (&ProcessId, &ProcessId)> + '_ {
    self.0.windows(2).map(|w| (&w[0], &w[1]))
  }
}

impl fmt::Display for Cycle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let ids: Vec<&str> = self.0.iter().map(ProcessId::as_str).collect();
    f.write_str(&ids.join(" -> "))
  }
}

// ---------------------------------------------------------------------------
// Severity + recommendations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityLevel {
  Low,
  Medium,
  High,
  Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Severity {
  pub level: SeverityLevel,
  /// 0-100.
  pub score: u8,
  /// One line per non-zero contribution to `score`.
  pub factors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecommendationCategory {
  LockOrder,
  Indexing,
  TransactionScope,
  IsolationLevel,
  Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
  Low,
  Medium,
  High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
  pub category: RecommendationCategory,
  pub message: String,
  pub affected_resources: Vec<Resource>,
  pub confidence: Confidence,
}

// ---------------------------------------------------------------------------
// Output types (JSON contract: what we emit)
// ---------------------------------------------------------------------------

/// Immutable result of one analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlockReport {
  pub cycles: Vec<Cycle>,
  /// Waiters queued behind the deadlock but not part of any cycle.
  pub residual: Vec<ProcessId>,
  pub graph: WaitGraph,
  pub severity: Severity,
  pub recommendations: Vec<Recommendation>,
  pub mode: AnalysisMode,
  pub warnings: Vec<String>,
}
