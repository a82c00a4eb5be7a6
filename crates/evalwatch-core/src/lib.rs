#![forbid(unsafe_code)]

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub mod env;
pub mod logging;
pub mod time;

pub use time::{Clock, ManualClock, SystemClock, TimestampMs};

pub const CRATE_NAME: &str = "evalwatch-core";

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    Usage = 2,
    Validation = 3,
    DependencyFailure = 4,
    Internal = 10,
}

pub const ENV_EVALWATCH_LOG: &str = "EVALWATCH_LOG";
pub const ENV_EVALWATCH_LOG_JSON: &str = "EVALWATCH_LOG_JSON";
pub const ENV_EVALWATCH_ENV: &str = "EVALWATCH_ENV";
pub const ENV_EVALWATCH_SCORER_TIMEOUT_MS: &str = "EVALWATCH_SCORER_TIMEOUT_MS";
pub const ENV_EVALWATCH_JUDGE_TIMEOUT_MS: &str = "EVALWATCH_JUDGE_TIMEOUT_MS";
pub const ENV_EVALWATCH_JUDGE_URL: &str = "EVALWATCH_JUDGE_URL";
pub const ENV_EVALWATCH_JUDGE_MODEL: &str = "EVALWATCH_JUDGE_MODEL";
pub const ENV_EVALWATCH_JUDGE_API_KEY: &str = "EVALWATCH_JUDGE_API_KEY";

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hash of `parts` joined with a unit separator so that `("ab", "c")` and
/// `("a", "bc")` never collide.
#[must_use]
pub fn sha256_parts_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl MachineError {
    #[must_use]
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            details: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_detail(mut self, key: &str, value: &str) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

pub mod canonical {
    use serde::Serialize;
    use serde_json::{Map, Value};

    pub fn stable_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
        let raw = serde_json::to_value(value)?;
        let normalized = normalize_json_value(raw);
        serde_json::to_vec(&normalized)
    }

    pub fn stable_json_hash_hex<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
        let bytes = stable_json_bytes(value)?;
        Ok(super::sha256_hex(&bytes))
    }

    fn normalize_json_value(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(String, Value)> = map
                    .into_iter()
                    .map(|(k, v)| (k, normalize_json_value(v)))
                    .collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                let mut sorted = Map::new();
                for (k, v) in entries {
                    sorted.insert(k, v);
                }
                Value::Object(sorted)
            }
            Value::Array(items) => {
                Value::Array(items.into_iter().map(normalize_json_value).collect())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_hash_is_separator_aware() {
        assert_ne!(sha256_parts_hex(&["ab", "c"]), sha256_parts_hex(&["a", "bc"]));
        assert_eq!(sha256_parts_hex(&["x"]), sha256_hex(b"x"));
    }

    #[test]
    fn canonical_hash_ignores_key_order() {
        let a = serde_json::json!({"b": 1, "a": {"y": 2, "x": 1}});
        let b = serde_json::json!({"a": {"x": 1, "y": 2}, "b": 1});
        assert_eq!(
            canonical::stable_json_hash_hex(&a).unwrap(),
            canonical::stable_json_hash_hex(&b).unwrap()
        );
    }

    #[test]
    fn machine_error_details_are_sorted() {
        let err = MachineError::new("store_write", "disk full")
            .with_detail("z", "1")
            .with_detail("a", "2");
        let keys: Vec<_> = err.details.keys().cloned().collect();
        assert_eq!(keys, vec!["a".to_string(), "z".to_string()]);
    }
}
