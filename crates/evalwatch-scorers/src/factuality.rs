// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use evalwatch_model::{InferenceEvent, MetricName, ScoreResult, StructuredScore};
use evalwatch_policies::PipelineSettings;
use tracing::{debug, warn};

use crate::Scorer;

pub const DEFAULT_JUDGE_PROMPT: &str = "You are evaluating the factual accuracy of an AI response.

Question: {prompt}

AI Response:
{response}

Ground Truth (Expected Answer):
{ground_truth}

Rate the factual accuracy of the AI response from 0.0 to 1.0:
- 1.0: Completely accurate, all facts correct
- 0.8-0.9: Mostly accurate with minor errors or omissions
- 0.6-0.7: Partially accurate, some key facts correct
- 0.4-0.5: Partially accurate, many errors
- 0.0-0.3: Mostly or completely inaccurate

Respond with ONLY a single number between 0.0 and 1.0, nothing else.
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JudgeError(pub String);

impl std::fmt::Display for JudgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for JudgeError {}

/// A secondary model asked to grade a response.
#[async_trait]
pub trait Judge: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, prompt: &str) -> Result<String, JudgeError>;
}

/// Similarity between a response and its reference, already in [0, 1].
///
/// Embedding-backed implementations that produce cosine in [-1, 1] should
/// rescale with `(s + 1) / 2`.
pub trait SimilarityModel: Send + Sync {
    fn name(&self) -> &str;
    fn similarity(&self, response: &str, reference: &str) -> f64;
}

/// Cosine over lowercase word counts.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenCosineSimilarity;

impl SimilarityModel for TokenCosineSimilarity {
    fn name(&self) -> &str {
        "token_cosine"
    }

    fn similarity(&self, response: &str, reference: &str) -> f64 {
        let a = term_counts(response);
        let b = term_counts(reference);
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        let dot: f64 = a
            .iter()
            .filter_map(|(term, x)| b.get(term).map(|y| x * y))
            .sum();
        let norm = |m: &BTreeMap<String, f64>| m.values().map(|v| v * v).sum::<f64>().sqrt();
        (dot / (norm(&a) * norm(&b))).clamp(0.0, 1.0)
    }
}

fn term_counts(text: &str) -> BTreeMap<String, f64> {
    let mut counts = BTreeMap::new();
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        *counts.entry(token.to_string()).or_insert(0.0) += 1.0;
    }
    counts
}

#[must_use]
pub fn render_judge_prompt(template: &str, prompt: &str, response: &str, reference: &str) -> String {
    template
        .replace("{prompt}", prompt)
        .replace("{response}", response)
        .replace("{ground_truth}", reference)
}

/// First number in the judge's reply. Values above 1 are read as a 0-10
/// scale; anything still outside [0, 1] is rejected.
#[must_use]
pub fn extract_judge_score(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let rest = &text[start..];
    let mut end = 0;
    let mut seen_dot = false;
    for (i, c) in rest.char_indices() {
        if c.is_ascii_digit() {
            end = i + 1;
        } else if c == '.' && !seen_dot {
            seen_dot = true;
        } else {
            break;
        }
    }
    let mut score: f64 = rest[..end].parse().ok()?;
    if score > 1.0 {
        score /= 10.0;
    }
    (0.0..=1.0).contains(&score).then_some(score)
}

pub struct FactualityScorer {
    metric: MetricName,
    judge: Option<Arc<dyn Judge>>,
    similarity: Arc<dyn SimilarityModel>,
    judge_timeout: Duration,
    max_retries: u32,
    template: String,
}

impl FactualityScorer {
    #[must_use]
    pub fn new(
        metric: MetricName,
        judge: Option<Arc<dyn Judge>>,
        similarity: Arc<dyn SimilarityModel>,
        settings: &PipelineSettings,
    ) -> Self {
        Self {
            metric,
            judge,
            similarity,
            judge_timeout: Duration::from_millis(settings.judge_timeout_ms),
            max_retries: settings.judge_max_retries,
            template: DEFAULT_JUDGE_PROMPT.to_string(),
        }
    }

    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// One initial attempt plus `max_retries` retries, so the default of 2
    /// makes at most 3 judge calls. Each call runs under `judge_timeout`.
    async fn ask_judge(&self, judge: &dyn Judge, prompt: &str) -> Result<f64, String> {
        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            match tokio::time::timeout(self.judge_timeout, judge.complete(prompt)).await {
                Ok(Ok(text)) => match extract_judge_score(&text) {
                    Some(score) => return Ok(score),
                    None => last_error = format!("unparseable judge reply: {text:?}"),
                },
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!("judge timed out after {}ms", self.judge_timeout.as_millis())
                }
            }
            debug!(judge = judge.name(), attempt, error = %last_error, "judge attempt failed");
        }
        Err(last_error)
    }
}

#[async_trait]
impl Scorer for FactualityScorer {
    fn metric_name(&self) -> &MetricName {
        &self.metric
    }

    fn is_deterministic(&self) -> bool {
        self.judge.is_none()
    }

    async fn score(&self, event: &InferenceEvent) -> ScoreResult {
        let Some(reference) = event.reference.as_deref() else {
            return ScoreResult::not_applicable("event has no reference answer");
        };

        let mut judge_error = None;
        if let Some(judge) = &self.judge {
            let prompt = render_judge_prompt(&self.template, &event.prompt, &event.response, reference);
            match self.ask_judge(judge.as_ref(), &prompt).await {
                Ok(score) => {
                    return ScoreResult::structured(
                        StructuredScore::new("score")
                            .field("score", score)
                            .label("source", "judge")
                            .label("judge", judge.name()),
                    )
                }
                Err(e) => {
                    warn!(event_id = %event.id, judge = judge.name(), error = %e, "judge unavailable, using similarity");
                    judge_error = Some(e);
                }
            }
        }

        let score = self.similarity.similarity(&event.response, reference);
        let mut out = StructuredScore::new("score")
            .field("score", score)
            .label("source", "similarity")
            .label("similarity_model", self.similarity.name());
        if let Some(e) = judge_error {
            out = out.label("judge_error", e);
        }
        ScoreResult::structured(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn judge_reply_parsing() {
        assert_eq!(extract_judge_score("0.85"), Some(0.85));
        assert_eq!(extract_judge_score("Score: 1.0 overall"), Some(1.0));
        assert_eq!(extract_judge_score("8"), Some(0.8));
        assert_eq!(extract_judge_score("7.5/10"), Some(0.75));
        assert_eq!(extract_judge_score("42"), None);
        assert_eq!(extract_judge_score("no idea"), None);
    }

    #[test]
    fn template_substitutes_all_slots() {
        let text = render_judge_prompt("{prompt}|{response}|{ground_truth}", "q", "a", "g");
        assert_eq!(text, "q|a|g");
        let full = render_judge_prompt(DEFAULT_JUDGE_PROMPT, "Q?", "A.", "G.");
        assert!(full.contains("Question: Q?"));
        assert!(!full.contains("{ground_truth}"));
    }

    #[test]
    fn token_cosine_bounds() {
        let sim = TokenCosineSimilarity;
        assert!((sim.similarity("Paris is the capital", "paris is the CAPITAL") - 1.0).abs() < 1e-9);
        assert_eq!(sim.similarity("alpha beta", "gamma delta"), 0.0);
        assert_eq!(sim.similarity("", "anything"), 0.0);
        let partial = sim.similarity("paris is big", "paris is small");
        assert!(partial > 0.0 && partial < 1.0);
    }
}
