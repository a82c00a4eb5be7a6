#![forbid(unsafe_code)]
//! Scores inference events, persists the verdicts and feeds the alert engine.

mod error;
mod orchestrator;
mod verdict;

pub use error::{PipelineError, PipelineErrorCode};
pub use orchestrator::{EvaluationReport, Orchestrator};
pub use verdict::build_result;

pub const CRATE_NAME: &str = "evalwatch-pipeline";
