//! Structured error types for the deadlock engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal analysis failures. Non-fatal anomalies travel as report warnings instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
  /// Empty, oversized, or unreadable input.
  #[error("malformed input: {message}")]
  MalformedInput {
    message: String,
    details: Option<String>,
  },

  /// No wait-for relationship could be derived.
  #[error("unparseable report: {message}")]
  Unparseable {
    message: String,
    details: Option<String>,
  },

  /// The wait-for graph is acyclic, so the input is not a deadlock.
  #[error("no cycle found: {message}")]
  NoCycleFound {
    message: String,
    details: Option<String>,
  },

  /// An invariant broke inside graph building or cycle analysis.
  #[error("internal analysis error: {message}")]
  Internal {
    message: String,
    details: Option<String>,
  },
}

impl AnalysisError {
  pub fn malformed(msg: impl Into<String>) -> Self {
    Self::MalformedInput {
      message: msg.into(),
      details: None,
    }
  }

  pub fn unparseable(msg: impl Into<String>) -> Self {
    Self::Unparseable {
      message: msg.into(),
      details: None,
    }
  }

  pub fn no_cycle(msg: impl Into<String>) -> Self {
    Self::NoCycleFound {
      message: msg.into(),
      details: None,
    }
  }

  pub fn internal(msg: impl Into<String>) -> Self {
    Self::Internal {
      message: msg.into(),
      details: None,
    }
  }

  /// Attach free-form details (e.g. the offending edge or counts).
  pub fn with_details(mut self, detail: impl Into<String>) -> Self {
    match &mut self {
      Self::MalformedInput { details, .. }
      | Self::Unparseable { details, .. }
      | Self::NoCycleFound { details, .. }
      | Self::Internal { details, .. } => *details = Some(detail.into()),
    }
    self
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::MalformedInput { .. } => ErrorKind::MalformedInput,
      Self::Unparseable { .. } => ErrorKind::Unparseable,
      Self::NoCycleFound { .. } => ErrorKind::NoCycleFound,
      Self::Internal { .. } => ErrorKind::InternalAnalysisError,
    }
  }

  pub fn message(&self) -> &str {
    match self {
      Self::MalformedInput { message, .. }
      | Self::Unparseable { message, .. }
      | Self::NoCycleFound { message, .. }
      | Self::Internal { message, .. } => message,
    }
  }

  pub fn details(&self) -> Option<&str> {
    match self {
      Self::MalformedInput { details, .. }
      | Self::Unparseable { details, .. }
      | Self::NoCycleFound { details, .. }
      | Self::Internal { details, .. } => details.as_deref(),
    }
  }
}

/// Wire name of an error class (`errorKind` in the envelope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
  MalformedInput,
  Unparseable,
  NoCycleFound,
  InternalAnalysisError,
}

impl ErrorKind {
  /// Client/data errors map to 4xx; everything else is a 5xx.
  pub fn is_client_error(self) -> bool {
    !matches!(self, Self::InternalAnalysisError)
  }
}

/// Structured error envelope for callers: `{ errorKind, message, details? }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
  pub error_kind: ErrorKind,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub details: Option<String>,
}

impl ErrorEnvelope {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      error_kind: kind,
      message: message.into(),
      details: None,
    }
  }

  pub fn with_details(mut self, details: impl Into<String>) -> Self {
    self.details = Some(details.into());
    self
  }
}

impl From<&AnalysisError> for ErrorEnvelope {
  fn from(err: &AnalysisError) -> Self {
    Self {
      error_kind: err.kind(),
      message: err.message().to_string(),
      details: err.details().map(str::to_string),
    }
  }
}
