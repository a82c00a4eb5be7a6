#![forbid(unsafe_code)]
//! Evaluation pipeline data model.

mod alert;
mod event;
mod ids;
mod result;
mod score;
mod threshold;

pub use alert::{AlertEvent, AlertKey, AlertKind, AlertState, AlertStatus, Severity};
pub use event::{
    InferenceEvent, METADATA_MAX_ENTRIES, PROMPT_MAX_BYTES, RESPONSE_MAX_BYTES,
};
pub use ids::{
    AlertId, EventId, MetricName, ModelId, ResultId, ValidationError, EVENT_ID_MAX_LEN,
    METRIC_NAME_MAX_LEN, MODEL_ID_MAX_LEN,
};
pub use result::{EvaluationResult, ResultOutcome};
pub use score::{Score, ScoreResult, StructuredScore};
pub use threshold::{Comparator, ThresholdConfig};

pub const CRATE_NAME: &str = "evalwatch-model";
