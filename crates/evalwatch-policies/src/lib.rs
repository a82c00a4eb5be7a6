#![forbid(unsafe_code)]

mod evaluation;
mod limits;
mod schema;
mod validate;

pub use evaluation::{evaluate, Verdict};
pub use limits::{
    DEFAULT_COOLDOWN_SECONDS, DEFAULT_FAILURES_TO_ALERT, DEFAULT_JUDGE_MAX_RETRIES,
    DEFAULT_JUDGE_TIMEOUT_MS, DEFAULT_MAX_CONCURRENT_EVENTS, DEFAULT_NOTIFY_BASE_BACKOFF_MS,
    DEFAULT_NOTIFY_MAX_ATTEMPTS, DEFAULT_SCORER_TIMEOUT_MS, MAX_SCHEMA_VERSION, MIN_SCHEMA_VERSION,
};
pub use schema::{AlertPolicy, MetricPolicy, NotifySettings, PipelineSettings, ThresholdDocument};
pub use validate::{
    canonical_document_json, document_fingerprint, validate_document, PolicyValidationError,
};

pub const CRATE_NAME: &str = "evalwatch-policies";
