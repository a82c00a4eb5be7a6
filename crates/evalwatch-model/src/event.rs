// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use evalwatch_core::TimestampMs;
use serde::{Deserialize, Serialize};

use crate::ids::{EventId, ModelId, ValidationError};

pub const PROMPT_MAX_BYTES: usize = 1 << 20;
pub const RESPONSE_MAX_BYTES: usize = 1 << 20;
pub const METADATA_MAX_ENTRIES: usize = 64;

/// One model invocation as captured upstream. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InferenceEvent {
    pub id: EventId,
    pub timestamp: TimestampMs,
    pub model_id: ModelId,
    pub prompt: String,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Expected answer used by reference-based scorers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Indicators the response is expected to mention.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub golden_iocs: Option<Vec<String>>,
}

impl InferenceEvent {
    #[must_use]
    pub fn new(
        id: EventId,
        timestamp: TimestampMs,
        model_id: ModelId,
        prompt: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            id,
            timestamp,
            model_id,
            prompt: prompt.into(),
            response: response.into(),
            latency_ms: None,
            metadata: BTreeMap::new(),
            reference: None,
            golden_iocs: None,
        }
    }

    #[must_use]
    pub fn with_latency_ms(mut self, latency_ms: f64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    #[must_use]
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    #[must_use]
    pub fn with_golden_iocs<I, S>(mut self, iocs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.golden_iocs = Some(iocs.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Size limits for untrusted input. Ids are validated on construction.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.prompt.len() > PROMPT_MAX_BYTES {
            return Err(ValidationError(format!(
                "event {}: prompt exceeds {PROMPT_MAX_BYTES} bytes",
                self.id
            )));
        }
        if self.response.len() > RESPONSE_MAX_BYTES {
            return Err(ValidationError(format!(
                "event {}: response exceeds {RESPONSE_MAX_BYTES} bytes",
                self.id
            )));
        }
        if self.metadata.len() > METADATA_MAX_ENTRIES {
            return Err(ValidationError(format!(
                "event {}: metadata exceeds {METADATA_MAX_ENTRIES} entries",
                self.id
            )));
        }
        if let Some(latency) = self.latency_ms {
            if latency.is_nan() {
                return Err(ValidationError(format!(
                    "event {}: latency_ms must be a number",
                    self.id
                )));
            }
        }
        Ok(())
    }

    /// Ordering key used wherever events must be serialized.
    #[must_use]
    pub fn order_key(&self) -> (TimestampMs, &EventId) {
        (self.timestamp, &self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InferenceEvent {
        InferenceEvent::new(
            EventId::new("evt-1").unwrap(),
            TimestampMs(1_000),
            ModelId::new("mock-model").unwrap(),
            "What is 2+2?",
            "4",
        )
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let raw = r#"{"id":"e1","timestamp":1,"model_id":"m","prompt":"p","response":"r","extra":1}"#;
        assert!(serde_json::from_str::<InferenceEvent>(raw).is_err());
    }

    #[test]
    fn optional_fields_default() {
        let raw = r#"{"id":"e1","timestamp":1,"model_id":"m","prompt":"p","response":"r"}"#;
        let event: InferenceEvent = serde_json::from_str(raw).unwrap();
        assert!(event.latency_ms.is_none());
        assert!(event.metadata.is_empty());
        assert!(event.golden_iocs.is_none());
    }

    #[test]
    fn validate_rejects_nan_latency() {
        let event = sample().with_latency_ms(f64::NAN);
        assert!(event.validate().is_err());
        assert!(sample().with_latency_ms(12.0).validate().is_ok());
    }
}
