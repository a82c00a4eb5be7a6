#![forbid(unsafe_code)]
//! Metric scorers and the registry that resolves them by metric name.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use evalwatch_model::{InferenceEvent, MetricName, ScoreResult};
use evalwatch_policies::PipelineSettings;

mod exact_match;
mod factuality;
mod http_judge;
mod ioc;
mod latency;
mod toxicity;

pub use exact_match::{normalize_for_match, ExactMatchScorer};
pub use factuality::{
    extract_judge_score, render_judge_prompt, FactualityScorer, Judge, JudgeError,
    SimilarityModel, TokenCosineSimilarity, DEFAULT_JUDGE_PROMPT,
};
pub use http_judge::HttpJudge;
pub use ioc::{ioc_metrics, IocExtractor, IocKind, IocMetrics, IocScorer};
pub use latency::{latency_bucket, LatencyScorer, LATENCY_TIERS_MS};
pub use toxicity::{
    KeywordClassifier, ToxicityClassifier, ToxicityScorer, TOXICITY_CATEGORIES,
};

pub const CRATE_NAME: &str = "evalwatch-scorers";

pub const METRIC_LATENCY: &str = "latency";
pub const METRIC_TOXICITY: &str = "toxicity";
pub const METRIC_FACTUALITY: &str = "factuality";
pub const METRIC_IOC_EXTRACTION: &str = "ioc_extraction";
pub const METRIC_EXACT_MATCH: &str = "exact_match";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScorerBuildError(pub String);

impl std::fmt::Display for ScorerBuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ScorerBuildError {}

/// One metric dimension. Implementations report inability to score through
/// `ScoreResult::NotApplicable` and computation failures through
/// `ScoreResult::Error`; they should not panic.
#[async_trait]
pub trait Scorer: Send + Sync {
    fn metric_name(&self) -> &MetricName;

    /// False when repeated calls on the same event may yield different scores.
    fn is_deterministic(&self) -> bool {
        true
    }

    async fn score(&self, event: &InferenceEvent) -> ScoreResult;
}

/// Scorers keyed by metric name. Registering under an existing name replaces it.
#[derive(Clone, Default)]
pub struct ScorerRegistry {
    scorers: BTreeMap<MetricName, Arc<dyn Scorer>>,
}

impl ScorerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latency, toxicity, factuality, IOC extraction and exact match.
    pub fn standard(
        settings: &PipelineSettings,
        judge: Option<Arc<dyn Judge>>,
    ) -> Result<Self, ScorerBuildError> {
        let mut registry = Self::new();
        registry.register(Arc::new(LatencyScorer::new(metric(METRIC_LATENCY)?)));
        registry.register(Arc::new(ToxicityScorer::new(
            metric(METRIC_TOXICITY)?,
            Arc::new(KeywordClassifier::default()),
        )));
        registry.register(Arc::new(FactualityScorer::new(
            metric(METRIC_FACTUALITY)?,
            judge,
            Arc::new(TokenCosineSimilarity),
            settings,
        )));
        registry.register(Arc::new(IocScorer::new(
            metric(METRIC_IOC_EXTRACTION)?,
            IocExtractor::new()?,
        )));
        registry.register(Arc::new(ExactMatchScorer::new(metric(METRIC_EXACT_MATCH)?)));
        Ok(registry)
    }

    pub fn register(&mut self, scorer: Arc<dyn Scorer>) {
        self.scorers.insert(scorer.metric_name().clone(), scorer);
    }

    #[must_use]
    pub fn get(&self, metric: &MetricName) -> Option<Arc<dyn Scorer>> {
        self.scorers.get(metric).cloned()
    }

    #[must_use]
    pub fn names(&self) -> Vec<MetricName> {
        self.scorers.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scorers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scorers.is_empty()
    }

    /// Scores `event` for `metric`, or reports the metric as unknown.
    pub async fn score(&self, event: &InferenceEvent, metric: &MetricName) -> ScoreResult {
        match self.scorers.get(metric) {
            Some(scorer) => scorer.score(event).await,
            None => ScoreResult::error(format!("no scorer registered for metric `{metric}`")),
        }
    }
}

fn metric(name: &str) -> Result<MetricName, ScorerBuildError> {
    MetricName::new(name).map_err(|e| ScorerBuildError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalwatch_core::TimestampMs;
    use evalwatch_model::{EventId, ModelId};

    #[tokio::test]
    async fn standard_registry_covers_builtin_metrics() {
        let registry = ScorerRegistry::standard(&PipelineSettings::default(), None).unwrap();
        let names: Vec<String> = registry.names().iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            vec!["exact_match", "factuality", "ioc_extraction", "latency", "toxicity"]
        );
    }

    #[tokio::test]
    async fn unknown_metric_is_an_error_result() {
        let registry = ScorerRegistry::new();
        let event = InferenceEvent::new(
            EventId::new("e1").unwrap(),
            TimestampMs(0),
            ModelId::new("m").unwrap(),
            "p",
            "r",
        );
        let out = registry
            .score(&event, &MetricName::new("bleu").unwrap())
            .await;
        assert!(matches!(out, ScoreResult::Error { .. }));
    }
}
