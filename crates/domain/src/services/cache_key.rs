//! Cache key derivation.
//!
//! A key is `{kind}:{sha256(canonical filters)}`. Canonical form sorts object
//! keys and scalar arrays, so semantically equal filter states always map to
//! the same key no matter how they were assembled.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::models::{ChartKind, FilterState};
use shared::crypto::sha256_hex;

/// Stable identifier for one (chart kind, filter state) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for a chart query.
    pub fn derive(kind: ChartKind, filters: &FilterState) -> Self {
        // FilterState serialization is infallible: no maps with non-string keys
        let value = serde_json::to_value(filters).unwrap_or(Value::Null);
        Self::from_parts(kind.as_str(), &value)
    }

    /// Derives a key from a raw JSON parameter object.
    pub fn from_parts(kind: &str, params: &Value) -> Self {
        let canonical = canonicalize(params);
        CacheKey(format!("{}:{}", kind, sha256_hex(&canonical.to_string())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The query kind portion of the key.
    pub fn kind(&self) -> &str {
        self.0.split_once(':').map(|(k, _)| k).unwrap_or(&self.0)
    }

    pub fn is_kind(&self, kind: ChartKind) -> bool {
        self.kind() == kind.as_str()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns a canonical copy of `value`: object keys sorted, arrays of scalars
/// sorted and deduplicated, nulls dropped from objects.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> =
                map.iter().filter(|(_, v)| !v.is_null()).collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => {
            let mut items: Vec<Value> = items.iter().map(canonicalize).collect();
            if items.iter().all(is_scalar) {
                items.sort_by_key(|v| v.to_string());
                items.dedup();
            }
            Value::Array(items)
        }
        other => other.clone(),
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}
