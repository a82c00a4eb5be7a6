// SPDX-License-Identifier: Apache-2.0

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use evalwatch_core::{sha256_parts_hex, TimestampMs};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError(pub String);

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ValidationError {}

pub const EVENT_ID_MAX_LEN: usize = 128;
pub const MODEL_ID_MAX_LEN: usize = 100;
pub const METRIC_NAME_MAX_LEN: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventId(String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelId(String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MetricName(String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResultId(String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AlertId(String);

impl EventId {
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        validate_token("event_id", &value, EVENT_ID_MAX_LEN, |c| {
            c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
        })?;
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ModelId {
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        validate_token("model_id", &value, MODEL_ID_MAX_LEN, |c| {
            c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '/')
        })?;
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl MetricName {
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        validate_token("metric_name", &value, METRIC_NAME_MAX_LEN, |c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'
        })?;
        if value.starts_with('_') || value.ends_with('_') || value.contains("__") {
            return Err(ValidationError(format!(
                "metric_name `{value}` must not start/end with '_' or contain '__'"
            )));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ResultId {
    /// One result per (event, metric): the id is a pure function of that pair.
    #[must_use]
    pub fn derive(event_id: &EventId, metric_name: &MetricName) -> Self {
        Self(sha256_parts_hex(&[event_id.as_str(), metric_name.as_str()]))
    }

    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        validate_digest("result_id", &value)?;
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AlertId {
    #[must_use]
    pub fn derive(
        metric_name: &MetricName,
        model_id: &ModelId,
        at: TimestampMs,
        triggering_result_id: &ResultId,
        kind: &str,
    ) -> Self {
        let at = at.as_millis().to_string();
        Self(sha256_parts_hex(&[
            metric_name.as_str(),
            model_id.as_str(),
            &at,
            triggering_result_id.as_str(),
            kind,
        ]))
    }

    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        validate_digest("alert_id", &value)?;
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_token(
    kind: &'static str,
    value: &str,
    max_len: usize,
    allowed: impl Fn(char) -> bool,
) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError(format!("{kind} must not be empty")));
    }
    if value.len() > max_len {
        return Err(ValidationError(format!(
            "{kind} exceeds max length {max_len}"
        )));
    }
    if let Some(bad) = value.chars().find(|c| !allowed(*c)) {
        return Err(ValidationError(format!(
            "{kind} `{value}` contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

fn validate_digest(kind: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.len() != 64
        || !value
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        return Err(ValidationError(format!(
            "{kind} must be 64 lowercase hex characters"
        )));
    }
    Ok(())
}

macro_rules! impl_id_traits {
    ($name:ident) => {
        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, ValidationError> {
                Self::new(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = ValidationError;

            fn try_from(value: &str) -> Result<Self, ValidationError> {
                Self::new(value)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, ValidationError> {
                Self::new(s)
            }
        }
    };
}

impl_id_traits!(EventId);
impl_id_traits!(ModelId);
impl_id_traits!(MetricName);
impl_id_traits!(ResultId);
impl_id_traits!(AlertId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_snake_case() {
        assert!(MetricName::new("ioc_extraction").is_ok());
        assert!(MetricName::new("Toxicity").is_err());
        assert!(MetricName::new("_latency").is_err());
        assert!(MetricName::new("a__b").is_err());
        assert!(MetricName::new("").is_err());
    }

    #[test]
    fn model_ids_allow_provider_paths() {
        assert!(ModelId::new("openai/gpt-4o-mini").is_ok());
        assert!(ModelId::new("model with space").is_err());
        assert!(ModelId::new("m".repeat(MODEL_ID_MAX_LEN + 1)).is_err());
    }

    #[test]
    fn result_id_is_stable_per_pair() {
        let event = EventId::new("evt-1").unwrap();
        let tox = MetricName::new("toxicity").unwrap();
        let lat = MetricName::new("latency").unwrap();
        let a = ResultId::derive(&event, &tox);
        assert_eq!(a, ResultId::derive(&event, &tox));
        assert_ne!(a, ResultId::derive(&event, &lat));
        assert!(ResultId::new(a.as_str()).is_ok());
        assert!(ResultId::new("not-a-digest").is_err());
    }

    #[test]
    fn ids_reject_invalid_json() {
        let err = serde_json::from_str::<EventId>("\"bad id\"");
        assert!(err.is_err());
        let ok: EventId = serde_json::from_str("\"evt:2024.1\"").unwrap();
        assert_eq!(ok.as_str(), "evt:2024.1");
    }
}
