//! Canonical cache keys for API requests.
//!
//! A key is the request path followed by its non-null parameters, sorted by
//! name and form-urlencoded. The same pairs double as the outbound query
//! string, so the key and the request on the wire never disagree.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Canonical string identifying a logical request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Flatten typed request parameters into sorted `(name, value)` pairs.
///
/// Null values are dropped. Strings are taken verbatim, numbers and booleans
/// use their display form, arrays and objects become compact JSON. Anything
/// that does not serialize to a JSON object yields no pairs.
pub fn canonical_params<P: Serialize + ?Sized>(params: &P) -> Vec<(String, String)> {
    let value = match serde_json::to_value(params) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!("request params not serializable, keying on path only: {}", e);
            return Vec::new();
        }
    };

    let Value::Object(map) = value else {
        return Vec::new();
    };

    let sorted: BTreeMap<String, String> = map
        .into_iter()
        .filter_map(|(name, value)| stringify(value).map(|v| (name, v)))
        .collect();

    sorted.into_iter().collect()
}

fn stringify(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Encode canonical pairs as a query string (without the leading `?`).
pub fn encode_query(pairs: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish()
}

/// Compute the cache key for `path` and its typed parameters.
///
/// Requests without parameters key on the bare path.
pub fn cache_key<P: Serialize + ?Sized>(path: &str, params: &P) -> CacheKey {
    key_from_pairs(path, &canonical_params(params))
}

/// Compute the cache key from already-canonical pairs.
pub fn key_from_pairs(path: &str, pairs: &[(String, String)]) -> CacheKey {
    if pairs.is_empty() {
        CacheKey(path.to_string())
    } else {
        CacheKey(format!("{}?{}", path, encode_query(pairs)))
    }
}
