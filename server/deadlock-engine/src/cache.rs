//! Injectable cache of finished analyses, keyed by request content hash.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::error::AnalysisError;
use crate::fingerprint::ContentHash;
use crate::types::DeadlockReport;

pub type CachedResult = Result<Arc<DeadlockReport>, AnalysisError>;

/// A content-hash → report cache. Entries are immutable once computed.
pub trait ReportCache: Send + Sync {
  /// Return the cached result for `key`, computing it with `compute` at most once.
  fn get_or_compute(
    &self,
    key: &ContentHash,
    compute: &mut dyn FnMut() -> CachedResult,
  ) -> CachedResult;
}

type Slot = Arc<OnceLock<CachedResult>>;

/// In-memory cache with a fixed number of slots.
///
/// Each key owns a `OnceLock`, so concurrent requests for the same content
/// wait on one computation instead of repeating it. Once `capacity` keys are
/// stored, new keys are computed without being cached.
pub struct MemoryCache {
  capacity: usize,
  slots: Mutex<HashMap<ContentHash, Slot>>,
}

impl MemoryCache {
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity,
      slots: Mutex::new(HashMap::new()),
    }
  }

  pub fn len(&self) -> usize {
    self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn slot(&self, key: &ContentHash) -> Option<Slot> {
    let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(slot) = slots.get(key) {
      return Some(Arc::clone(slot));
    }
    if slots.len() >= self.capacity {
      return None;
    }
    let slot = Slot::default();
    slots.insert(key.clone(), Arc::clone(&slot));
    Some(slot)
  }
}

impl ReportCache for MemoryCache {
  fn get_or_compute(
    &self,
    key: &ContentHash,
    compute: &mut dyn FnMut() -> CachedResult,
  ) -> CachedResult {
    match self.slot(key) {
      Some(slot) => {
        if slot.get().is_some() {
          tracing::debug!(key = %key.0, "report cache hit");
        }
        slot.get_or_init(|| compute()).clone()
      }
      None => {
        tracing::debug!(key = %key.0, capacity = self.capacity, "report cache full; computing uncached");
        compute()
      }
    }
  }
}
