// SPDX-License-Identifier: Apache-2.0

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ids::{MetricName, ValidationError};

/// Which side of the bound counts as good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Comparator {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
        }
    }

    /// True when `value` is on the good side of `bound`. NaN never passes.
    #[must_use]
    pub fn passes(self, value: f64, bound: f64) -> bool {
        match self {
            Self::Lt => value < bound,
            Self::Lte => value <= bound,
            Self::Gt => value > bound,
            Self::Gte => value >= bound,
        }
    }
}

impl Display for Comparator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Comparator {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "lt" => Ok(Self::Lt),
            "lte" => Ok(Self::Lte),
            "gt" => Ok(Self::Gt),
            "gte" => Ok(Self::Gte),
            other => Err(ValidationError(format!(
                "unknown comparator `{other}` (expected lt, lte, gt, gte)"
            ))),
        }
    }
}

/// The pass/fail rule for one metric, frozen into each result it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdConfig {
    pub metric_name: MetricName,
    pub comparator: Comparator,
    pub bound: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ThresholdConfig {
    #[must_use]
    pub fn new(metric_name: MetricName, comparator: Comparator, bound: f64) -> Self {
        Self {
            metric_name,
            comparator,
            bound,
            field: None,
        }
    }

    #[must_use]
    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl Display for ThresholdConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(
                f,
                "{}.{field} {} {}",
                self.metric_name, self.comparator, self.bound
            ),
            None => write!(f, "{} {} {}", self.metric_name, self.comparator, self.bound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_to_bound_follows_strictness() {
        assert!(!Comparator::Lt.passes(0.7, 0.7));
        assert!(Comparator::Lte.passes(0.7, 0.7));
        assert!(!Comparator::Gt.passes(0.8, 0.8));
        assert!(Comparator::Gte.passes(0.8, 0.8));
    }

    #[test]
    fn nan_never_passes() {
        for cmp in [Comparator::Lt, Comparator::Lte, Comparator::Gt, Comparator::Gte] {
            assert!(!cmp.passes(f64::NAN, 1.0), "{cmp}");
        }
    }

    #[test]
    fn comparator_parses_and_serializes() {
        assert_eq!("gte".parse::<Comparator>().unwrap(), Comparator::Gte);
        assert!("ge".parse::<Comparator>().is_err());
        assert_eq!(serde_json::to_string(&Comparator::Lt).unwrap(), "\"lt\"");
    }
}
