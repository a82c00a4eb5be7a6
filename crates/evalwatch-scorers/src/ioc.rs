// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use evalwatch_model::{InferenceEvent, MetricName, ScoreResult, StructuredScore};
use regex::{Regex, RegexBuilder};

use crate::{Scorer, ScorerBuildError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IocKind {
    Ipv4,
    Domain,
    Md5,
    Sha256,
    Cve,
    Email,
}

impl IocKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ipv4 => "ipv4",
            Self::Domain => "domain",
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
            Self::Cve => "cve",
            Self::Email => "email",
        }
    }
}

struct IocRule {
    kind: IocKind,
    pattern: &'static str,
}

const IOC_RULES: [IocRule; 6] = [
    IocRule {
        kind: IocKind::Ipv4,
        pattern: r"\b(?:\d{1,3}\.){3}\d{1,3}\b",
    },
    IocRule {
        kind: IocKind::Domain,
        pattern: r"\b[a-z0-9](?:[a-z0-9\-]{0,61}[a-z0-9])?(?:\.[a-z]{2,})+\b",
    },
    IocRule {
        kind: IocKind::Md5,
        pattern: r"\b[a-f0-9]{32}\b",
    },
    IocRule {
        kind: IocKind::Sha256,
        pattern: r"\b[a-f0-9]{64}\b",
    },
    IocRule {
        kind: IocKind::Cve,
        pattern: r"\bcve-\d{4}-\d{4,7}\b",
    },
    IocRule {
        kind: IocKind::Email,
        pattern: r"\b[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}\b",
    },
];

/// Pattern-rule indicator extraction. Matching is case-insensitive and
/// candidates are reported lowercased.
pub struct IocExtractor {
    rules: Vec<(IocKind, Regex)>,
}

impl IocExtractor {
    pub fn new() -> Result<Self, ScorerBuildError> {
        let mut rules = Vec::with_capacity(IOC_RULES.len());
        for rule in &IOC_RULES {
            let re = RegexBuilder::new(rule.pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| ScorerBuildError(format!("ioc rule {}: {e}", rule.kind.as_str())))?;
            rules.push((rule.kind, re));
        }
        Ok(Self { rules })
    }

    #[must_use]
    pub fn extract(&self, text: &str) -> BTreeMap<IocKind, BTreeSet<String>> {
        let mut found: BTreeMap<IocKind, BTreeSet<String>> = BTreeMap::new();
        for (kind, re) in &self.rules {
            for m in re.find_iter(text) {
                let candidate = m.as_str().to_lowercase();
                if *kind == IocKind::Ipv4 && !valid_octets(&candidate) {
                    continue;
                }
                found.entry(*kind).or_default().insert(candidate);
            }
        }
        // The host part of an email is not a separate indicator.
        if let Some(emails) = found.get(&IocKind::Email) {
            let hosts: BTreeSet<String> = emails
                .iter()
                .filter_map(|e| e.split_once('@').map(|(_, host)| host.to_string()))
                .collect();
            if let Some(domains) = found.get_mut(&IocKind::Domain) {
                domains.retain(|d| !hosts.contains(d));
                if domains.is_empty() {
                    found.remove(&IocKind::Domain);
                }
            }
        }
        found
    }
}

fn valid_octets(candidate: &str) -> bool {
    candidate.split('.').all(|o| o.parse::<u8>().is_ok())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IocMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub true_positives: usize,
}

/// Precision/recall/F1 of `extracted` against `golden`; an empty extraction scores zero.
#[must_use]
pub fn ioc_metrics(extracted: &BTreeSet<String>, golden: &BTreeSet<String>) -> IocMetrics {
    if extracted.is_empty() {
        return IocMetrics {
            precision: 0.0,
            recall: 0.0,
            f1: 0.0,
            true_positives: 0,
        };
    }
    let tp = extracted.intersection(golden).count();
    let precision = tp as f64 / extracted.len() as f64;
    let recall = if golden.is_empty() {
        0.0
    } else {
        tp as f64 / golden.len() as f64
    };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    IocMetrics {
        precision,
        recall,
        f1,
        true_positives: tp,
    }
}

pub struct IocScorer {
    metric: MetricName,
    extractor: IocExtractor,
}

impl IocScorer {
    #[must_use]
    pub fn new(metric: MetricName, extractor: IocExtractor) -> Self {
        Self { metric, extractor }
    }

    /// Explicit golden indicators win; otherwise indicators found in the reference answer.
    fn golden_set(&self, event: &InferenceEvent) -> Option<BTreeSet<String>> {
        if let Some(golden) = &event.golden_iocs {
            return Some(
                golden
                    .iter()
                    .map(|g| g.trim().to_lowercase())
                    .filter(|g| !g.is_empty())
                    .collect(),
            );
        }
        event
            .reference
            .as_deref()
            .map(|r| self.extractor.extract(r).into_values().flatten().collect())
    }
}

#[async_trait]
impl Scorer for IocScorer {
    fn metric_name(&self) -> &MetricName {
        &self.metric
    }

    async fn score(&self, event: &InferenceEvent) -> ScoreResult {
        let by_kind = self.extractor.extract(&event.response);
        let extracted: BTreeSet<String> = by_kind.values().flatten().cloned().collect();
        let Some(golden) = self.golden_set(event) else {
            let breakdown: Vec<String> = by_kind
                .iter()
                .map(|(k, v)| format!("{}={}", k.as_str(), v.len()))
                .collect();
            return ScoreResult::not_applicable(format!(
                "no golden indicators; extracted {} ({})",
                extracted.len(),
                breakdown.join(",")
            ));
        };
        let m = ioc_metrics(&extracted, &golden);
        let kinds: Vec<&str> = by_kind.keys().map(|k| k.as_str()).collect();
        ScoreResult::structured(
            StructuredScore::new("f1")
                .field("f1", m.f1)
                .field("precision", m.precision)
                .field("recall", m.recall)
                .field("true_positives", m.true_positives as f64)
                .field("extracted", extracted.len() as f64)
                .field("golden", golden.len() as f64)
                .label("kinds", kinds.join(",")),
        )
    }
}
