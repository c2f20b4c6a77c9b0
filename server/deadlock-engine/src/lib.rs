//! PushLog Deadlock Diagnostic Engine: deterministic, rule-based.
//!
//! Turns a database deadlock report captured inside an error event into a
//! verified wait-for graph, the deadlock cycle(s), a severity score and
//! remediation hints.
//!
//! No DB connection, no network; pure computation on in-memory input.

pub mod assemble;
pub mod cache;
pub mod config;
pub mod cycles;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod normalize;
pub mod parse;
pub mod recommend;
pub mod score;
pub mod types;

pub use cache::{MemoryCache, ReportCache};
pub use config::Config;
pub use engine::Engine;
pub use error::{AnalysisError, ErrorEnvelope, ErrorKind};
pub use types::{AnalysisMode, AnalysisRequest, DeadlockReport, RawReport};
