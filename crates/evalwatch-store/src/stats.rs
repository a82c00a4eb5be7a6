// SPDX-License-Identifier: Apache-2.0

use evalwatch_model::MetricName;
use serde::{Deserialize, Serialize};

/// Nearest-rank percentile of ascending `sorted`, `pct` in [0, 1].
#[must_use]
pub fn nearest_rank_percentile(sorted: &[f64], pct: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pct = pct.clamp(0.0, 1.0);
    let idx = ((sorted.len() - 1) as f64 * pct).round() as usize;
    sorted.get(idx.min(sorted.len() - 1)).copied()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub n: usize,
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
}

impl LatencyStats {
    /// `None` when there are no values.
    #[must_use]
    pub fn from_values(mut values: Vec<f64>) -> Option<Self> {
        values.retain(|v| v.is_finite());
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);
        let n = values.len();
        let mean = values.iter().sum::<f64>() / n as f64;
        Some(Self {
            n,
            mean,
            p50: nearest_rank_percentile(&values, 0.50)?,
            p95: nearest_rank_percentile(&values, 0.95)?,
            p99: nearest_rank_percentile(&values, 0.99)?,
            min: values[0],
            max: values[n - 1],
        })
    }

    /// Statistic by name, for thresholding an aggregate (`p50`, `p95`, `p99`, `mean`, `min`, `max`).
    #[must_use]
    pub fn get(&self, stat: &str) -> Option<f64> {
        match stat {
            "p50" => Some(self.p50),
            "p95" => Some(self.p95),
            "p99" => Some(self.p99),
            "mean" => Some(self.mean),
            "min" => Some(self.min),
            "max" => Some(self.max),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub metric_name: MetricName,
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_uses_rounded_rank() {
        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        assert_eq!(nearest_rank_percentile(&values, 0.5), Some(6.0));
        assert_eq!(nearest_rank_percentile(&values, 0.95), Some(10.0));
        assert_eq!(nearest_rank_percentile(&values, 0.0), Some(1.0));
        assert_eq!(nearest_rank_percentile(&[], 0.5), None);
    }

    #[test]
    fn stats_over_unsorted_input() {
        let stats = LatencyStats::from_values(vec![300.0, 100.0, 200.0]).unwrap();
        assert_eq!(stats.n, 3);
        assert_eq!(stats.min, 100.0);
        assert_eq!(stats.max, 300.0);
        assert_eq!(stats.p50, 200.0);
        assert!((stats.mean - 200.0).abs() < 1e-9);
        assert_eq!(stats.get("p95"), Some(300.0));
        assert_eq!(stats.get("p42"), None);
    }

    #[test]
    fn empty_or_non_finite_input_has_no_stats() {
        assert!(LatencyStats::from_values(Vec::new()).is_none());
        assert!(LatencyStats::from_values(vec![f64::NAN]).is_none());
    }
}
