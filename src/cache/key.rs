//! Content-addressed cache keys
//!
//! Raw request input is reduced to a [`CanonicalValue`] before hashing so that
//! irrelevant variation (list order, display-only fields, explicit nulls) maps
//! to the same key:
//!
//! - scalars are kept verbatim
//! - sequences are canonicalized element-wise, then sorted by encoded form
//! - mappings keep their keys (sorted), minus the category's ignored fields
//!   and minus null values; non-string keys use their canonical text
//! - NaN and infinities are numbers named `NaN`, `inf` and `-inf`
//! - a subvalue that cannot be serialized becomes an opaque placeholder
//!   carrying its type and error text, the rest of the input is kept
//!
//! The key is `<category>:<hex prefix of SHA-256>`. The prefix length is a
//! tunable: a shorter prefix raises the chance that two inputs of the *same*
//! category collide (and one returns the other's analysis). The category
//! prefix makes cross-category collisions impossible.

use crate::cache::canonical;
use crate::cache::category::AnalysisCategory;
use crate::cache::policy::PolicyRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Default number of hex characters kept from the digest
pub const DEFAULT_KEY_HASH_LEN: usize = 16;

/// Shortest accepted digest prefix
pub const MIN_KEY_HASH_LEN: usize = 8;

/// Full SHA-256 digest length in hex characters
pub const MAX_KEY_HASH_LEN: usize = 64;

/// Opaque, fixed-length identifier of a (category, canonical input) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an existing key string (e.g. one logged earlier)
    pub fn from_raw(raw: impl Into<String>) -> Self {
        CacheKey(raw.into())
    }

    /// Key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Category prefix of the key
    pub fn category_prefix(&self) -> &str {
        self.0.split_once(':').map(|(prefix, _)| prefix).unwrap_or("")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Leaf value of a canonical tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scalar {
    /// Null sentinel
    Null,
    Bool(bool),
    /// Numbers keep their textual form
    Number(String),
    Text(String),
}

/// Normalized shape of arbitrary nested input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalValue {
    Scalar(Scalar),
    Sequence(Vec<CanonicalValue>),
    Mapping(BTreeMap<String, CanonicalValue>),
    /// Fallback for a value that could not be serialized: type name and error text
    Opaque(String),
}

impl CanonicalValue {
    /// Canonicalize a JSON tree, dropping mapping keys for which `ignore` returns true
    pub fn from_json(value: &Value, ignore: &dyn Fn(&str) -> bool) -> Self {
        match value {
            Value::Null => CanonicalValue::Scalar(Scalar::Null),
            Value::Bool(b) => CanonicalValue::Scalar(Scalar::Bool(*b)),
            Value::Number(n) => CanonicalValue::Scalar(Scalar::Number(n.to_string())),
            Value::String(s) => CanonicalValue::Scalar(Scalar::Text(s.clone())),
            Value::Array(items) => {
                let mut encoded: Vec<(String, CanonicalValue)> = items
                    .iter()
                    .map(|item| {
                        let canonical = CanonicalValue::from_json(item, ignore);
                        (canonical.encoded(), canonical)
                    })
                    .collect();
                encoded.sort_by(|a, b| a.0.cmp(&b.0));
                CanonicalValue::Sequence(encoded.into_iter().map(|(_, v)| v).collect())
            }
            Value::Object(map) => CanonicalValue::Mapping(
                map.iter()
                    .filter(|(key, val)| !val.is_null() && !ignore(key.as_str()))
                    .map(|(key, val)| (key.clone(), CanonicalValue::from_json(val, ignore)))
                    .collect(),
            ),
        }
    }

    /// Canonicalize any serializable value. Never fails: only the subvalues
    /// whose `Serialize` impl errors degrade to [`CanonicalValue::Opaque`].
    pub fn from_serialize<T>(value: &T, ignore: &dyn Fn(&str) -> bool) -> Self
    where
        T: Serialize + ?Sized,
    {
        match canonical::to_canonical(value) {
            Ok(raw) => raw.normalize(ignore),
            Err(err) => canonical::opaque::<T>(&err),
        }
    }

    /// Drop ignored fields and null values from mappings, sort sequences
    pub fn normalize(self, ignore: &dyn Fn(&str) -> bool) -> Self {
        match self {
            CanonicalValue::Mapping(map) => CanonicalValue::Mapping(
                map.into_iter()
                    .filter(|(key, val)| {
                        !matches!(val, CanonicalValue::Scalar(Scalar::Null)) && !ignore(key.as_str())
                    })
                    .map(|(key, val)| (key, val.normalize(ignore)))
                    .collect(),
            ),
            CanonicalValue::Sequence(items) => {
                let mut encoded: Vec<(String, CanonicalValue)> = items
                    .into_iter()
                    .map(|item| {
                        let canonical = item.normalize(ignore);
                        (canonical.encoded(), canonical)
                    })
                    .collect();
                encoded.sort_by(|a, b| a.0.cmp(&b.0));
                CanonicalValue::Sequence(encoded.into_iter().map(|(_, v)| v).collect())
            }
            other => other,
        }
    }

    /// Deterministic text encoding with sorted mapping keys
    pub fn encode(&self, out: &mut String) {
        match self {
            CanonicalValue::Scalar(Scalar::Null) => out.push_str("null"),
            CanonicalValue::Scalar(Scalar::Bool(b)) => out.push_str(if *b { "true" } else { "false" }),
            CanonicalValue::Scalar(Scalar::Number(n)) => out.push_str(n),
            CanonicalValue::Scalar(Scalar::Text(s)) => push_quoted(out, s),
            CanonicalValue::Sequence(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.encode(out);
                }
                out.push(']');
            }
            CanonicalValue::Mapping(map) => {
                out.push('{');
                for (i, (key, val)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    push_quoted(out, key);
                    out.push(':');
                    val.encode(out);
                }
                out.push('}');
            }
            CanonicalValue::Opaque(text) => {
                out.push_str("<opaque:");
                out.push_str(text);
                out.push('>');
            }
        }
    }

    /// Encoded form as an owned string
    pub fn encoded(&self) -> String {
        let mut out = String::new();
        self.encode(&mut out);
        out
    }
}

fn push_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

/// Derives cache keys from (category, input, call params)
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    policies: PolicyRegistry,
    hash_len: usize,
}

impl Default for CacheKeyBuilder {
    fn default() -> Self {
        Self::new(PolicyRegistry::default(), DEFAULT_KEY_HASH_LEN)
    }
}

impl CacheKeyBuilder {
    /// Create a builder; `hash_len` is clamped to the supported range
    pub fn new(policies: PolicyRegistry, hash_len: usize) -> Self {
        Self {
            policies,
            hash_len: hash_len.clamp(MIN_KEY_HASH_LEN, MAX_KEY_HASH_LEN),
        }
    }

    /// Number of digest hex characters in derived keys
    pub fn hash_len(&self) -> usize {
        self.hash_len
    }

    /// Canonical form of request input for a category
    pub fn canonicalize<T>(&self, category: AnalysisCategory, input: &T) -> CanonicalValue
    where
        T: Serialize + ?Sized,
    {
        let ignore = |field: &str| self.policies.is_ignored_field(category, field);
        CanonicalValue::from_serialize(input, &ignore)
    }

    /// Derive the cache key. Total: never fails for any input shape.
    pub fn derive_key<I, P>(&self, category: AnalysisCategory, input: &I, call_params: &P) -> CacheKey
    where
        I: Serialize + ?Sized,
        P: Serialize + ?Sized,
    {
        let input = self.canonicalize(category, input).encoded();
        let params = CanonicalValue::from_serialize(call_params, &|_| false).encoded();

        let mut hasher = Sha256::new();
        hasher.update(category.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(input.as_bytes());
        hasher.update(b"\0");
        hasher.update(params.as_bytes());
        let digest = hex::encode(hasher.finalize());

        CacheKey(format!("{}:{}", category, &digest[..self.hash_len]))
    }
}
