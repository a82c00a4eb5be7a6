use std::path::Path;

use evalwatch_core::canonical::{stable_json_bytes, stable_json_hash_hex};
use evalwatch_core::env::{env_string, env_u64};
use evalwatch_core::{ENV_EVALWATCH_ENV, ENV_EVALWATCH_JUDGE_TIMEOUT_MS, ENV_EVALWATCH_SCORER_TIMEOUT_MS};
use evalwatch_model::{Comparator, MetricName, ThresholdConfig};
use tracing::info;

use crate::limits::{
    MAX_CONCURRENT_EVENTS_HARD, MAX_COOLDOWN_SECONDS, MAX_FAILURES_TO_ALERT, MAX_SCHEMA_VERSION,
    MIN_SCHEMA_VERSION,
};
use crate::schema::{AlertPolicy, MetricPolicy, ThresholdDocument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyValidationError(pub String);

impl std::fmt::Display for PolicyValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for PolicyValidationError {}

impl ThresholdDocument {
    /// Defaults used when no document is supplied.
    #[must_use]
    pub fn builtin() -> Self {
        let mut metrics = std::collections::BTreeMap::new();
        let mut latency = MetricPolicy::new(Comparator::Lt, 2000.0);
        latency.field = Some("latency_ms".to_string());
        metrics.insert("latency".to_string(), latency);
        metrics.insert(
            "toxicity".to_string(),
            MetricPolicy::new(Comparator::Lt, 0.7),
        );
        metrics.insert(
            "factuality".to_string(),
            MetricPolicy::new(Comparator::Gte, 0.8),
        );
        let mut ioc = MetricPolicy::new(Comparator::Gte, 0.8);
        ioc.field = Some("f1".to_string());
        metrics.insert("ioc_extraction".to_string(), ioc);
        metrics.insert(
            "exact_match".to_string(),
            MetricPolicy::new(Comparator::Gte, 1.0),
        );
        Self {
            schema_version: MIN_SCHEMA_VERSION,
            environment: None,
            metrics,
            pipeline: Default::default(),
            notify: Default::default(),
        }
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, PolicyValidationError> {
        let doc: Self = serde_yaml::from_str(raw)
            .map_err(|e| PolicyValidationError(format!("threshold document parse failed: {e}")))?;
        validate_document(&doc)?;
        Ok(doc)
    }

    /// Reads, validates and applies env overrides. Call again to reload.
    pub fn load(path: &Path) -> Result<Self, PolicyValidationError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PolicyValidationError(format!("read {} failed: {e}", path.display()))
        })?;
        let doc = Self::from_yaml_str(&raw)?.with_env_overrides();
        validate_document(&doc)?;
        info!(
            path = %path.display(),
            metrics = doc.metrics.len(),
            fingerprint = %document_fingerprint(&doc)?,
            "threshold document loaded"
        );
        Ok(doc)
    }

    /// The builtin thresholds with env overrides applied, validated the same
    /// way a loaded document is.
    pub fn builtin_with_env() -> Result<Self, PolicyValidationError> {
        let doc = Self::builtin().with_env_overrides();
        validate_document(&doc)?;
        info!(
            metrics = doc.metrics.len(),
            fingerprint = %document_fingerprint(&doc)?,
            "builtin thresholds in use"
        );
        Ok(doc)
    }

    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.pipeline.scorer_timeout_ms =
            env_u64(ENV_EVALWATCH_SCORER_TIMEOUT_MS, self.pipeline.scorer_timeout_ms);
        self.pipeline.judge_timeout_ms =
            env_u64(ENV_EVALWATCH_JUDGE_TIMEOUT_MS, self.pipeline.judge_timeout_ms);
        if let Some(env) = env_string(ENV_EVALWATCH_ENV) {
            self.environment = Some(env);
        }
        self
    }

    #[must_use]
    pub fn threshold_for(&self, metric: &MetricName) -> Option<ThresholdConfig> {
        self.metrics
            .get(metric.as_str())
            .map(|policy| policy.threshold(metric.clone()))
    }

    #[must_use]
    pub fn alert_policy_for(&self, metric: &MetricName) -> AlertPolicy {
        self.metrics
            .get(metric.as_str())
            .map(MetricPolicy::alerting)
            .unwrap_or_default()
    }

    /// Configured metric names; names were checked by validation.
    #[must_use]
    pub fn metric_names(&self) -> Vec<MetricName> {
        self.metrics
            .keys()
            .filter_map(|name| MetricName::new(name.clone()).ok())
            .collect()
    }
}

pub fn validate_document(doc: &ThresholdDocument) -> Result<(), PolicyValidationError> {
    if !(MIN_SCHEMA_VERSION..=MAX_SCHEMA_VERSION).contains(&doc.schema_version) {
        return Err(PolicyValidationError(format!(
            "unsupported schema_version {} (supported {MIN_SCHEMA_VERSION}..={MAX_SCHEMA_VERSION})",
            doc.schema_version
        )));
    }
    if doc.metrics.is_empty() {
        return Err(PolicyValidationError(
            "metrics must declare at least one metric".to_string(),
        ));
    }
    for (name, policy) in &doc.metrics {
        MetricName::new(name.clone())
            .map_err(|e| PolicyValidationError(format!("metrics.{name}: {e}")))?;
        validate_metric_policy(name, policy)?;
    }
    let p = &doc.pipeline;
    if p.scorer_timeout_ms == 0 || p.judge_timeout_ms == 0 {
        return Err(PolicyValidationError(
            "pipeline timeouts must be > 0".to_string(),
        ));
    }
    if p.max_concurrent_events == 0 || p.max_concurrent_events > MAX_CONCURRENT_EVENTS_HARD {
        return Err(PolicyValidationError(format!(
            "pipeline.max_concurrent_events must be in 1..={MAX_CONCURRENT_EVENTS_HARD}"
        )));
    }
    if doc.notify.max_attempts == 0 {
        return Err(PolicyValidationError(
            "notify.max_attempts must be >= 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_metric_policy(name: &str, policy: &MetricPolicy) -> Result<(), PolicyValidationError> {
    if !policy.bound.is_finite() {
        return Err(PolicyValidationError(format!(
            "metrics.{name}.bound must be finite"
        )));
    }
    if policy.failures_to_alert == 0 || policy.failures_to_alert > MAX_FAILURES_TO_ALERT {
        return Err(PolicyValidationError(format!(
            "metrics.{name}.failures_to_alert must be in 1..={MAX_FAILURES_TO_ALERT}"
        )));
    }
    if policy.cooldown_seconds > MAX_COOLDOWN_SECONDS {
        return Err(PolicyValidationError(format!(
            "metrics.{name}.cooldown_seconds must be <= {MAX_COOLDOWN_SECONDS}"
        )));
    }
    if let Some(field) = &policy.field {
        if field.trim().is_empty() {
            return Err(PolicyValidationError(format!(
                "metrics.{name}.field must not be empty"
            )));
        }
    }
    Ok(())
}

pub fn canonical_document_json(doc: &ThresholdDocument) -> Result<String, PolicyValidationError> {
    let bytes = stable_json_bytes(doc)
        .map_err(|e| PolicyValidationError(format!("canonical encode failed: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| PolicyValidationError(format!("canonical encode produced non-utf8: {e}")))
}

/// Stable hash of the document, logged on load and recorded by runs.
pub fn document_fingerprint(doc: &ThresholdDocument) -> Result<String, PolicyValidationError> {
    stable_json_hash_hex(doc)
        .map_err(|e| PolicyValidationError(format!("fingerprint failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_document_is_valid() {
        let doc = ThresholdDocument::builtin();
        validate_document(&doc).unwrap();
        let latency = MetricName::new("latency").unwrap();
        let cfg = doc.threshold_for(&latency).unwrap();
        assert_eq!(cfg.comparator, Comparator::Lt);
        assert_eq!(cfg.field.as_deref(), Some("latency_ms"));
    }

    #[test]
    fn unknown_metrics_fall_back_to_default_alerting() {
        let doc = ThresholdDocument::builtin();
        let other = MetricName::new("nonexistent").unwrap();
        assert!(doc.threshold_for(&other).is_none());
        assert_eq!(doc.alert_policy_for(&other), AlertPolicy::default());
    }

    #[test]
    fn fingerprint_ignores_map_order() {
        let a = ThresholdDocument::builtin();
        let mut b = ThresholdDocument::builtin();
        let entry = b.metrics.remove("toxicity").unwrap();
        b.metrics.insert("toxicity".to_string(), entry);
        assert_eq!(
            document_fingerprint(&a).unwrap(),
            document_fingerprint(&b).unwrap()
        );
    }
}
