// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A multi-field score. `primary` names the field thresholds apply to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredScore {
    pub primary: String,
    pub fields: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl StructuredScore {
    #[must_use]
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            fields: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: f64) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Score {
    Value { value: f64 },
    Structured(StructuredScore),
}

impl Score {
    #[must_use]
    pub fn value(value: f64) -> Self {
        Self::Value { value }
    }

    /// The value a threshold compares against. `field` overrides the declared
    /// primary field of a structured score and is ignored for plain values.
    #[must_use]
    pub fn select(&self, field: Option<&str>) -> Option<f64> {
        match self {
            Self::Value { value } => Some(*value),
            Self::Structured(s) => s.get(field.unwrap_or(&s.primary)),
        }
    }

    /// Name of the first NaN or infinite field, `value` for a plain score.
    #[must_use]
    pub fn non_finite_field(&self) -> Option<&str> {
        match self {
            Self::Value { value } => (!value.is_finite()).then_some("value"),
            Self::Structured(s) => s
                .fields
                .iter()
                .find(|(_, v)| !v.is_finite())
                .map(|(name, _)| name.as_str()),
        }
    }
}

/// What a scorer hands back for one (event, metric).
#[derive(Debug, Clone, PartialEq)]
pub enum ScoreResult {
    Scored(Score),
    NotApplicable { reason: String },
    Error { message: String },
}

impl ScoreResult {
    #[must_use]
    pub fn value(value: f64) -> Self {
        Self::Scored(Score::value(value))
    }

    #[must_use]
    pub fn structured(score: StructuredScore) -> Self {
        Self::Scored(Score::Structured(score))
    }

    #[must_use]
    pub fn not_applicable(reason: impl Into<String>) -> Self {
        Self::NotApplicable {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_not_applicable(&self) -> bool {
        matches!(self, Self::NotApplicable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_selects_primary_or_override() {
        let score = Score::Structured(
            StructuredScore::new("f1")
                .field("f1", 0.8)
                .field("precision", 0.5),
        );
        assert_eq!(score.select(None), Some(0.8));
        assert_eq!(score.select(Some("precision")), Some(0.5));
        assert_eq!(score.select(Some("missing")), None);
        assert_eq!(Score::value(3.0).select(Some("f1")), Some(3.0));
    }

    #[test]
    fn score_json_is_tagged() {
        let json = serde_json::to_value(Score::value(0.25)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "value", "value": 0.25}));
        let structured = Score::Structured(StructuredScore::new("max").field("max", 0.1));
        let json = serde_json::to_value(&structured).unwrap();
        assert_eq!(json["kind"], "structured");
        assert_eq!(json["primary"], "max");
        let back: Score = serde_json::from_value(json).unwrap();
        assert_eq!(back, structured);
    }

    #[test]
    fn non_finite_fields_are_named() {
        assert_eq!(Score::value(f64::NAN).non_finite_field(), Some("value"));
        assert_eq!(Score::value(0.4).non_finite_field(), None);
        let structured = Score::Structured(
            StructuredScore::new("f1")
                .field("f1", 0.5)
                .field("recall", f64::INFINITY),
        );
        assert_eq!(structured.non_finite_field(), Some("recall"));
    }
}
