//! Normalize raw report input into a canonical, role-tagged token stream.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::config::Config;
use crate::error::AnalysisError;
use crate::types::*;

/// Max characters of an offending line quoted in a warning.
const EXCERPT_CHARS: usize = 80;

/// Start of a report line: `Process N waits for` or `Process N:`.
fn re_marker() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"(?i)\bprocess\s+\d+(?:\s+waits\s+for\b|:)").unwrap())
}

/// Server log severity labels (`DETAIL:`, `HINT:`, ...).
fn re_label() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| {
    Regex::new(r"(?i)\b(?:ERROR|DETAIL|HINT|CONTEXT|STATEMENT|LOG|WARNING|NOTICE|FATAL):").unwrap()
  })
}

/// Split raw input into role-tagged tokens.
///
/// Fails only when the input is empty (or over the size ceiling) or when no
/// line has a recognizable role. Everything else becomes a warning.
pub fn normalize(raw: &RawReport, config: &Config) -> Result<TokenStream, AnalysisError> {
  let size = input_size(raw);
  if size > config.max_input_bytes {
    return Err(
      AnalysisError::malformed("report exceeds input size limit")
        .with_details(format!("{} bytes > {} bytes", size, config.max_input_bytes)),
    );
  }

  let mut warnings = Vec::new();

  // Text is primary; structured payload supplies lines only when text is absent.
  let lines: Vec<String> = match raw.text.as_deref().filter(|t| !t.trim().is_empty()) {
    Some(text) => vec![text.to_string()],
    None => raw
      .structured
      .as_ref()
      .map(|m| structured_lines(m, &mut warnings))
      .unwrap_or_default(),
  };

  let hints = raw
    .structured
    .as_ref()
    .map(|m| process_hints(m, &mut warnings))
    .unwrap_or_default();

  let tokens = tokenize(&lines, &mut warnings);

  if tokens.is_empty() {
    return Err(AnalysisError::malformed("report is empty"));
  }
  if tokens.iter().all(|t| t.role == LineRole::Unknown) {
    return Err(
      AnalysisError::malformed("no recognizable report lines")
        .with_details(format!("{} unrecognized lines", tokens.len())),
    );
  }

  let stream = TokenStream {
    tokens,
    hints,
    warnings,
  };
  tracing::debug!(
    tokens = stream.tokens.len(),
    waits_for = stream.count(LineRole::WaitsFor),
    queries = stream.count(LineRole::Query),
    hints = stream.hints.len(),
    "normalized report"
  );
  Ok(stream)
}

fn input_size(raw: &RawReport) -> usize {
  let text = raw.text.as_ref().map_or(0, String::len);
  let structured = raw
    .structured
    .as_ref()
    .and_then(|m| serde_json::to_vec(m).ok())
    .map_or(0, |v| v.len());
  text + structured
}

/// Tag each report line with its role. Physical lines may hold several report lines.
fn tokenize(lines: &[String], warnings: &mut Vec<String>) -> Vec<Token> {
  let mut tokens: Vec<Token> = Vec::new();

  for block in lines {
    let block = block.replace("\r\n", "\n").replace('\r', "\n");
    for physical in block.split('\n') {
      let line = collapse_whitespace(physical);
      if line.is_empty() {
        continue;
      }

      let markers: Vec<(usize, LineRole)> = re_marker()
        .find_iter(&line)
        .map(|m| {
          let role = if m.as_str().ends_with(':') {
            LineRole::Query
          } else {
            LineRole::WaitsFor
          };
          (m.start(), role)
        })
        .collect();

      let first = markers.first().map_or(line.len(), |m| m.0);
      let lead = line[..first].trim();
      if !lead.is_empty() && !(first < line.len() && is_label_only(lead)) {
        push_loose(&mut tokens, lead, warnings);
      }

      for (i, &(start, role)) in markers.iter().enumerate() {
        if role == LineRole::Query {
          // SQL runs to the end of the physical line; markers inside it are literal text.
          push_marked(&mut tokens, role, &line[start..]);
          break;
        }
        let end = markers.get(i + 1).map_or(line.len(), |m| m.0);
        let segment = &line[start..end];
        let Some(label) = re_label().find(segment) else {
          push_marked(&mut tokens, role, segment);
          continue;
        };
        push_marked(&mut tokens, role, &segment[..label.start()]);
        let tail = segment[label.start()..].trim();
        if !(end < line.len() && is_label_only(tail)) {
          push_loose(&mut tokens, tail, warnings);
        }
      }
    }
  }

  tokens
}

fn push_marked(tokens: &mut Vec<Token>, role: LineRole, text: &str) {
  tokens.push(Token {
    role,
    text: text.trim().to_string(),
  });
}

/// Marker-less text: context, query continuation, or unknown.
fn push_loose(tokens: &mut Vec<Token>, text: &str, warnings: &mut Vec<String>) {
  if is_context(text) {
    tokens.push(Token {
      role: LineRole::Context,
      text: text.to_string(),
    });
    return;
  }

  if let Some(last) = tokens.last_mut() {
    if last.role == LineRole::Query {
      last.text.push(' ');
      last.text.push_str(text);
      return;
    }
  }

  warnings.push(format!("unrecognized report line ignored: {}", excerpt(text)));
  tokens.push(Token {
    role: LineRole::Unknown,
    text: text.to_string(),
  });
}

fn is_context(text: &str) -> bool {
  re_label().is_match(text) || text.to_ascii_lowercase().contains("deadlock detected")
}

/// Text that is nothing but a log prefix ending in a label, e.g. `... [42] DETAIL:`.
fn is_label_only(text: &str) -> bool {
  re_label()
    .find_iter(text)
    .last()
    .is_some_and(|m| m.end() == text.len())
}

fn collapse_whitespace(s: &str) -> String {
  s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn excerpt(s: &str) -> String {
  if s.chars().count() <= EXCERPT_CHARS {
    return s.to_string();
  }
  let mut out: String = s.chars().take(EXCERPT_CHARS).collect();
  out.push('…');
  out
}

// ---------------------------------------------------------------------------
// Structured payloads
// ---------------------------------------------------------------------------

/// Report lines from a structured payload, first matching source wins:
/// `lines`, `detail`, `message`, `logentry.formatted`, `exception.values[].value`.
fn structured_lines(map: &Map<String, Value>, warnings: &mut Vec<String>) -> Vec<String> {
  if let Some(value) = map.get("lines") {
    let Value::Array(items) = value else {
      warnings.push("structured.lines is not an array; ignored".into());
      return Vec::new();
    };
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
      match item {
        Value::String(s) => out.push(s.clone()),
        _ => warnings.push(format!("structured.lines[{}] is not a string; skipped", i)),
      }
    }
    return out;
  }

  for key in ["detail", "message"] {
    if let Some(Value::String(s)) = map.get(key) {
      return vec![s.clone()];
    }
  }

  if let Some(Value::String(s)) = map.get("logentry").and_then(|l| l.get("formatted")) {
    return vec![s.clone()];
  }

  if let Some(Value::Array(values)) = map.get("exception").and_then(|e| e.get("values")) {
    return values
      .iter()
      .filter_map(|v| v.get("value").and_then(Value::as_str))
      .map(str::to_string)
      .collect();
  }

  Vec::new()
}

/// Per-process metadata from a structured `processes` array.
fn process_hints(map: &Map<String, Value>, warnings: &mut Vec<String>) -> Vec<ProcessHint> {
  let Some(value) = map.get("processes") else {
    return Vec::new();
  };
  let Value::Array(items) = value else {
    warnings.push("structured.processes is not an array; ignored".into());
    return Vec::new();
  };

  let mut hints = Vec::new();
  for (i, item) in items.iter().enumerate() {
    let Some(id) = field(item, &["id", "pid"]) else {
      warnings.push(format!("structured.processes[{}] has no id; skipped", i));
      continue;
    };
    hints.push(ProcessHint {
      id: ProcessId(id),
      transaction_id: field(item, &["transactionId", "transaction_id"]),
      application_name: field(item, &["applicationName", "application_name"]),
      query: field(item, &["query"]).map(|q| collapse_whitespace(&q)),
    });
  }
  hints
}

/// First present key as a string (numbers are stringified).
fn field(item: &Value, keys: &[&str]) -> Option<String> {
  keys.iter().find_map(|k| match item.get(*k)? {
    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  })
}
