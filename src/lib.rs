//! Accessly: accessibility audits of a single URL with AI-written fix suggestions.
//!
//! [`analysis::AnalysisService`] runs the pipeline. `server` exposes it over HTTP and
//! `cli` from the command line.

pub mod analysis;
pub mod audit;
pub mod cli;
pub mod config;
pub mod enricher;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod score;
pub mod server;

pub use accessly_core_types::{AnalysisResult, AuditOutcome, Impact, Issue, Screenshot, SuggestionMap};
pub use analysis::AnalysisService;
pub use errors::AnalyzeError;
