//! Query signatures group recurring query shapes for performance tracking.
//!
//! Signatures are persisted, so the hash must not depend on the process
//! (no `RandomState`, no std `DefaultHasher`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized text is capped at this many characters before hashing.
pub const SIGNATURE_TEXT_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuerySignature(String);

impl QuerySignature {
    pub fn of(query: &str) -> Self {
        let normalized = normalize(query);

        // 31-multiplier rolling hash over UTF-16 units, wrapped to 32 bits
        let hash = normalized
            .encode_utf16()
            .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32));

        Self(format!("q_{}", hash.unsigned_abs()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuerySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for QuerySignature {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Lower-case, collapse whitespace runs, trim, cap length.
pub fn normalize(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .chars()
        .take(SIGNATURE_TEXT_LIMIT)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(normalize("  SELECT *\n\tFROM   Accounts "), "select * from accounts");
        assert_eq!(normalize(&"x".repeat(500)).len(), SIGNATURE_TEXT_LIMIT);
    }

    #[test]
    fn test_signature_is_shape_based() {
        let a = QuerySignature::of("SELECT * FROM accounts");
        let b = QuerySignature::of("select  *  from\naccounts");
        let c = QuerySignature::of("SELECT * FROM customers");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("q_"));
    }

    #[test]
    fn test_signature_is_stable() {
        // Fixed value; persisted profiles depend on it
        assert_eq!(QuerySignature::of("a").as_str(), "q_97");
        assert_eq!(QuerySignature::of("ab").as_str(), "q_3105");
    }

    #[test]
    fn test_long_queries_share_prefix_signature() {
        let prefix = "x".repeat(SIGNATURE_TEXT_LIMIT);
        assert_eq!(
            QuerySignature::of(&format!("{}tail one", prefix)),
            QuerySignature::of(&format!("{}tail two", prefix))
        );
    }
}
