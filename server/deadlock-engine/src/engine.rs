//! Core engine: runs the analysis pipeline, optionally behind a report cache.

use std::sync::Arc;

use crate::assemble::{self, Parts};
use crate::cache::ReportCache;
use crate::config::Config;
use crate::cycles;
use crate::error::AnalysisError;
use crate::fingerprint;
use crate::graph;
use crate::normalize;
use crate::parse::{self, ParsedReport};
use crate::recommend;
use crate::score;
use crate::types::*;

/// The deadlock diagnostic engine. Holds only configuration and an optional
/// cache; every analysis is independent, so one engine can serve many threads.
#[derive(Clone)]
pub struct Engine {
  config: Config,
  cache: Option<Arc<dyn ReportCache>>,
}

impl Engine {
  pub fn new(config: Config) -> Self {
    Self {
      config,
      cache: None,
    }
  }

  pub fn with_defaults() -> Self {
    Self::new(Config::default())
  }

  /// Install a report cache used by [`Engine::analyze_cached`].
  pub fn with_cache(mut self, cache: Arc<dyn ReportCache>) -> Self {
    self.cache = Some(cache);
    self
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Analyze one report: Normalizer → Parser → Graph Builder → Cycle Analyzer
  /// → Scorer → Recommender → Assembler.
  #[tracing::instrument(skip_all, fields(mode = request.mode.as_str()))]
  pub fn analyze(&self, request: &AnalysisRequest) -> Result<DeadlockReport, AnalysisError> {
    let tokens = normalize::normalize(&request.raw(), &self.config)?;
    let ParsedReport {
      processes,
      locks,
      edges,
      warnings,
    } = parse::parse(tokens, request.mode)?;

    let graph = graph::build(processes, edges);
    graph::verify(&graph)?;

    let analysis = cycles::find_cycles(&graph, &self.config)?;
    let severity = score::score(&graph, &analysis, &self.config);
    let recommendations = recommend::recommend(&graph, &analysis, &severity);

    let report = assemble::assemble(Parts {
      mode: request.mode,
      graph,
      locks,
      analysis,
      severity,
      recommendations,
      warnings,
    });

    for warning in &report.warnings {
      tracing::debug!(warning = %warning, "analysis warning");
    }
    tracing::debug!(
      cycles = report.cycles.len(),
      residual = report.residual.len(),
      score = report.severity.score,
      "deadlock analyzed"
    );
    Ok(report)
  }

  /// Like [`Engine::analyze`], but identical requests share one immutable result
  /// when a cache is installed.
  pub fn analyze_cached(&self, request: &AnalysisRequest) -> Result<Arc<DeadlockReport>, AnalysisError> {
    match &self.cache {
      Some(cache) => {
        let key = fingerprint::content_hash(request);
        cache.get_or_compute(&key, &mut || self.analyze(request).map(Arc::new))
      }
      None => self.analyze(request).map(Arc::new),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryCache;

  const TWO_WAY: &str = "Process 100 waits for ExclusiveLock on table orders; blocked by process 101\n\
    Process 101 waits for ExclusiveLock on table customers; blocked by process 100";

  #[test]
  fn two_process_deadlock_end_to_end() {
    let engine = Engine::with_defaults();
    let report = engine
      .analyze(&AnalysisRequest::from_text(TWO_WAY, AnalysisMode::Standard))
      .unwrap();
    assert_eq!(report.cycles.len(), 1);
    assert_eq!(report.cycles[0].to_string(), "100 -> 101 -> 100");
    assert!(report.severity.level >= SeverityLevel::Medium);
    assert!(report
      .recommendations
      .iter()
      .any(|r| r.category == RecommendationCategory::LockOrder));
    assert!(report.warnings.is_empty());
  }

  #[test]
  fn cached_analysis_returns_shared_report() {
    let engine = Engine::with_defaults().with_cache(Arc::new(MemoryCache::new(4)));
    let req = AnalysisRequest::from_text(TWO_WAY, AnalysisMode::Standard);
    let a = engine.analyze_cached(&req).unwrap();
    let b = engine.analyze_cached(&req).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
  }

  #[test]
  fn uncached_engine_still_answers() {
    let engine = Engine::with_defaults();
    let req = AnalysisRequest::from_text(TWO_WAY, AnalysisMode::Enhanced);
    let report = engine.analyze_cached(&req).unwrap();
    assert_eq!(report.mode, AnalysisMode::Enhanced);
  }

  #[test]
  fn errors_propagate_by_kind() {
    let engine = Engine::with_defaults();
    let err = engine
      .analyze(&AnalysisRequest::from_text("", AnalysisMode::Standard))
      .unwrap_err();
    assert!(matches!(err, AnalysisError::MalformedInput { .. }));
  }
}
