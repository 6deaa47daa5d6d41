//! Query Classifier - Determines which query-language family a text is written in
//!
//! Precedence is fixed: document call syntax, then relational keywords, then
//! key-value verbs. Anything else is treated as relational.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

lazy_static! {
    /// `db.accounts.find(...)`, `store.collection.op(...)`
    static ref DOCUMENT_CALL: Regex = Regex::new(r"^\s*\w+\.\w+\.\w+\s*\(").unwrap();
    static ref RELATIONAL_PREFIX: Regex =
        Regex::new(r"(?i)^\s*(SELECT|INSERT|UPDATE|DELETE|WITH)\b").unwrap();
    static ref KEY_VALUE_PREFIX: Regex =
        Regex::new(r"(?i)^\s*(GET|SET|KEYS|HGETALL|LPUSH|RPUSH|SADD)\b").unwrap();
}

/// Query-language family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Relational,
    Document,
    KeyValue,
}

impl Dialect {
    pub const ALL: [Dialect; 3] = [Dialect::Relational, Dialect::Document, Dialect::KeyValue];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Relational => "relational",
            Dialect::Document => "document",
            Dialect::KeyValue => "key_value",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relational" | "sql" => Ok(Dialect::Relational),
            "document" | "doc" => Ok(Dialect::Document),
            "key_value" | "keyvalue" | "kv" => Ok(Dialect::KeyValue),
            other => Err(format!("unknown dialect '{}'", other)),
        }
    }
}

/// Classify query text into exactly one dialect.
///
/// Never fails: unmatched text is an ambiguous classification and defaults to
/// [`Dialect::Relational`].
pub fn classify(query: &str) -> Dialect {
    if DOCUMENT_CALL.is_match(query) {
        Dialect::Document
    } else if RELATIONAL_PREFIX.is_match(query) {
        Dialect::Relational
    } else if KEY_VALUE_PREFIX.is_match(query) {
        Dialect::KeyValue
    } else {
        debug!("Ambiguous classification, defaulting to relational: {:?}", query);
        Dialect::Relational
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_call_syntax() {
        assert_eq!(classify("db.accounts.find({})"), Dialect::Document);
        assert_eq!(classify("  bank.customers.aggregate([])"), Dialect::Document);
    }

    #[test]
    fn test_relational_keywords_case_insensitive() {
        for q in [
            "SELECT * FROM accounts",
            "select id from customers",
            "Insert into t values (1)",
            "UPDATE accounts SET balance = 1",
            "delete from accounts",
            "WITH x AS (SELECT 1) SELECT * FROM x",
        ] {
            assert_eq!(classify(q), Dialect::Relational, "{}", q);
        }
    }

    #[test]
    fn test_key_value_verbs() {
        for q in ["GET account:ACC001", "set k v", "KEYS account:*", "HGETALL user:1", "LPUSH q 1", "RPUSH q 2", "SADD s a"] {
            assert_eq!(classify(q), Dialect::KeyValue, "{}", q);
        }
    }

    #[test]
    fn test_unmatched_defaults_to_relational() {
        assert_eq!(classify(""), Dialect::Relational);
        assert_eq!(classify("show me the money"), Dialect::Relational);
        // Verb must be a whole word
        assert_eq!(classify("GETTER foo"), Dialect::Relational);
    }

    #[test]
    fn test_document_syntax_wins_over_keywords() {
        // A collection named like a verb still reads as a document call
        assert_eq!(classify("db.get.find({})"), Dialect::Document);
    }
}
