use evalwatch_model::{ScoreResult, ThresholdConfig};
use serde::{Deserialize, Serialize};

use crate::validate::PolicyValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    pub observed: Option<f64>,
    /// Set when the scorer declined; such verdicts pass but are reported.
    pub not_applicable: bool,
}

impl Verdict {
    const fn not_applicable() -> Self {
        Self {
            passed: true,
            observed: None,
            not_applicable: true,
        }
    }
}

/// Applies `config` to a scorer outcome.
///
/// Structured scores are compared on `config.field` when set, otherwise on
/// the field the scorer declared primary. A field that is absent from the
/// score is a configuration mismatch and is reported as an error.
pub fn evaluate(score: &ScoreResult, config: &ThresholdConfig) -> Result<Verdict, PolicyValidationError> {
    match score {
        ScoreResult::NotApplicable { .. } => Ok(Verdict::not_applicable()),
        ScoreResult::Error { .. } => Ok(Verdict {
            passed: false,
            observed: None,
            not_applicable: false,
        }),
        ScoreResult::Scored(score) => {
            let observed = score.select(config.field.as_deref()).ok_or_else(|| {
                PolicyValidationError(format!(
                    "metric {} has no field `{}`",
                    config.metric_name,
                    config.field.as_deref().unwrap_or("<primary>")
                ))
            })?;
            Ok(Verdict {
                passed: config.comparator.passes(observed, config.bound),
                observed: Some(observed),
                not_applicable: false,
            })
        }
    }
}
