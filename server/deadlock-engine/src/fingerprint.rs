//! Stable content hash of an analysis request, used as the report cache key.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::AnalysisRequest;

/// 32 hex chars identifying one request's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

/// Hash mode + text + structured payload.
///
/// Object keys are hashed in sorted order so the key does not depend on the
/// payload's field order.
pub fn content_hash(request: &AnalysisRequest) -> ContentHash {
  let mut hasher = blake3::Hasher::new();
  hasher.update(request.mode.as_str().as_bytes());
  hasher.update(b"|");
  match &request.text {
    Some(text) => {
      hasher.update(b"t:");
      hash_str(&mut hasher, text);
    }
    None => {
      hasher.update(b"-");
    }
  }
  hasher.update(b"|");
  match &request.structured {
    Some(map) => hash_object(&mut hasher, map),
    None => {
      hasher.update(b"-");
    }
  }

  let hex = hasher.finalize().to_hex();
  ContentHash(hex[..32].to_string())
}

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
  hasher.update(&(s.len() as u64).to_le_bytes());
  hasher.update(s.as_bytes());
}

fn hash_value(hasher: &mut blake3::Hasher, value: &Value) {
  match value {
    Value::Null => {
      hasher.update(b"n");
    }
    Value::Bool(b) => {
      hasher.update(if *b { b"T" } else { b"F" });
    }
    Value::Number(n) => {
      hasher.update(b"#");
      hash_str(hasher, &n.to_string());
    }
    Value::String(s) => {
      hasher.update(b"s");
      hash_str(hasher, s);
    }
    Value::Array(items) => {
      hasher.update(b"[");
      for item in items {
        hash_value(hasher, item);
      }
      hasher.update(b"]");
    }
    Value::Object(map) => hash_object(hasher, map),
  }
}

fn hash_object(hasher: &mut blake3::Hasher, map: &Map<String, Value>) {
  let mut keys: Vec<&String> = map.keys().collect();
  keys.sort();
  hasher.update(b"{");
  for k in keys {
    hash_str(hasher, k);
    hash_value(hasher, &map[k]);
  }
  hasher.update(b"}");
}
