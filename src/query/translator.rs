//! Query Translator - Best-effort relational → document rewrite
//!
//! Covers exactly `SELECT * FROM <name> [WHERE <cond> [AND <cond>]*] [LIMIT <n>]`.
//! Anything outside that grammar is returned untouched; the target store is
//! left to report the syntax failure.

use crate::error::{MediatorError, Result};
use crate::query::classifier::{classify, Dialect};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use tracing::debug;

lazy_static! {
    static ref SELECT_STAR: Regex = Regex::new(
        r"(?is)^\s*SELECT\s+\*\s+FROM\s+(\w+)(?:\s+WHERE\s+(.+?))?(?:\s+LIMIT\s+(\d+))?\s*;?\s*$"
    )
    .unwrap();
    static ref CONDITION: Regex =
        Regex::new(r"(?s)^(\w+)\s*(>=|<=|!=|=|>|<)\s*([^=<>!\s].*)$").unwrap();
}

/// Comparison operator in a WHERE condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparator {
    fn from_sql(symbol: &str) -> Option<Self> {
        match symbol {
            "=" => Some(Comparator::Eq),
            "!=" => Some(Comparator::Ne),
            ">" => Some(Comparator::Gt),
            ">=" => Some(Comparator::Gte),
            "<" => Some(Comparator::Lt),
            "<=" => Some(Comparator::Lte),
            _ => None,
        }
    }

    pub fn from_operator_key(key: &str) -> Option<Self> {
        match key {
            "$eq" => Some(Comparator::Eq),
            "$ne" => Some(Comparator::Ne),
            "$gt" => Some(Comparator::Gt),
            "$gte" => Some(Comparator::Gte),
            "$lt" => Some(Comparator::Lt),
            "$lte" => Some(Comparator::Lte),
            _ => None,
        }
    }

    /// Document-store operator key (`$gt`, ...)
    pub fn operator_key(&self) -> &'static str {
        match self {
            Comparator::Eq => "$eq",
            Comparator::Ne => "$ne",
            Comparator::Gt => "$gt",
            Comparator::Gte => "$gte",
            Comparator::Lt => "$lt",
            Comparator::Lte => "$lte",
        }
    }

    /// `ordering` is how the stored value compares to the literal; `None` when
    /// the two are not comparable.
    fn accepts(&self, ordering: Option<Ordering>) -> bool {
        match self {
            Comparator::Eq => ordering == Some(Ordering::Equal),
            Comparator::Ne => ordering != Some(Ordering::Equal),
            Comparator::Gt => ordering == Some(Ordering::Greater),
            Comparator::Gte => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            Comparator::Lt => ordering == Some(Ordering::Less),
            Comparator::Lte => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        }
    }
}

/// Literal on the right-hand side of a condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Literal {
    /// Quoted → string; numeric-looking → number; true/false → boolean; else raw string.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if trimmed.len() >= 2
            && ((trimmed.starts_with('\'') && trimmed.ends_with('\''))
                || (trimmed.starts_with('"') && trimmed.ends_with('"')))
        {
            return Literal::Str(trimmed[1..trimmed.len() - 1].to_string());
        }

        if let Ok(i) = trimmed.parse::<i64>() {
            return Literal::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            if f.is_finite() {
                return Literal::Float(f);
            }
        }

        if trimmed.eq_ignore_ascii_case("true") {
            return Literal::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Literal::Bool(false);
        }

        Literal::Str(trimmed.to_string())
    }

    /// Scalars only; arrays, objects and null have no literal form.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Literal::Str(s.clone())),
            Value::Bool(b) => Some(Literal::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Literal::Int)
                .or_else(|| n.as_f64().map(Literal::Float)),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Literal::Str(s) => Value::String(s.clone()),
            Literal::Int(i) => Value::from(*i),
            Literal::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Literal::Bool(b) => Value::Bool(*b),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Literal::Int(i) => Some(*i as f64),
            Literal::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// How `actual` compares to this literal.
    fn compare(&self, actual: &Value) -> Option<Ordering> {
        match (actual, self) {
            (Value::Number(n), lit) => n.as_f64()?.partial_cmp(&lit.as_f64()?),
            (Value::String(s), Literal::Str(lit)) => Some(s.as_str().cmp(lit.as_str())),
            (Value::Bool(b), Literal::Bool(lit)) => Some(b.cmp(lit)),
            _ => None,
        }
    }
}

/// One `field <op> literal` constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub comparator: Comparator,
    pub value: Literal,
}

impl Condition {
    fn parse(text: &str) -> Result<Self> {
        let caps = CONDITION
            .captures(text.trim())
            .ok_or_else(|| MediatorError::TranslationUnsupported(format!("condition '{}'", text.trim())))?;

        let comparator = Comparator::from_sql(&caps[2])
            .ok_or_else(|| MediatorError::TranslationUnsupported(format!("operator '{}'", &caps[2])))?;

        Ok(Self {
            field: caps[1].to_string(),
            comparator,
            value: Literal::parse(&caps[3]),
        })
    }

    /// Evaluate against a row/document. A missing or null field only satisfies `!=`.
    pub fn matches(&self, row: &Map<String, Value>) -> bool {
        match row.get(&self.field) {
            None | Some(Value::Null) => self.comparator == Comparator::Ne,
            Some(actual) => self.comparator.accepts(self.value.compare(actual)),
        }
    }
}

/// Parsed form of the supported SELECT subset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectQuery {
    pub source: String,
    pub conditions: Vec<Condition>,
    pub limit: Option<u64>,
}

impl SelectQuery {
    pub fn parse(query: &str) -> Result<Self> {
        let caps = SELECT_STAR
            .captures(query)
            .ok_or_else(|| MediatorError::TranslationUnsupported("not a SELECT * query".to_string()))?;

        let source = caps[1].to_string();

        let conditions = match caps.get(2) {
            Some(clause) => split_conjunction(clause.as_str())?
                .into_iter()
                .map(Condition::parse)
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let limit = match caps.get(3) {
            Some(n) => Some(
                n.as_str()
                    .parse::<u64>()
                    .map_err(|e| MediatorError::TranslationUnsupported(format!("limit: {}", e)))?,
            ),
            None => None,
        };

        Ok(Self {
            source,
            conditions,
            limit,
        })
    }

    /// Document filter; several constraints on one field merge into one operator object.
    ///
    /// A repeated operator on the same field has no single-object form and is
    /// rejected rather than letting the later constraint replace the earlier one.
    pub fn filter(&self) -> Result<Value> {
        let mut filter = Map::new();

        for condition in &self.conditions {
            let value = condition.value.to_json();
            let key = condition.comparator.operator_key();
            let merged = match (filter.remove(&condition.field), condition.comparator) {
                (None, Comparator::Eq) => value,
                (None, _) => {
                    let mut ops = Map::new();
                    ops.insert(key.to_string(), value);
                    Value::Object(ops)
                }
                (Some(existing), _) => {
                    let mut ops = into_operator_object(existing);
                    if ops.contains_key(key) {
                        return Err(MediatorError::TranslationUnsupported(format!(
                            "repeated {} on '{}'",
                            key, condition.field
                        )));
                    }
                    ops.insert(key.to_string(), value);
                    Value::Object(ops)
                }
            };
            filter.insert(condition.field.clone(), merged);
        }

        Ok(Value::Object(filter))
    }

    pub fn to_document_query(&self) -> Result<String> {
        let mut out = format!("db.{}.find({})", self.source, self.filter()?);
        if let Some(limit) = self.limit {
            out.push_str(&format!(".limit({})", limit));
        }
        Ok(out)
    }

    pub fn matches(&self, row: &Map<String, Value>) -> bool {
        self.conditions.iter().all(|c| c.matches(row))
    }
}

fn into_operator_object(existing: Value) -> Map<String, Value> {
    match existing {
        Value::Object(map) if map.keys().all(|k| k.starts_with('$')) => map,
        other => {
            let mut ops = Map::new();
            ops.insert(Comparator::Eq.operator_key().to_string(), other);
            ops
        }
    }
}

/// Inverse of [`SelectQuery::filter`]: read a document filter back into conditions.
pub fn conditions_from_filter(filter: &Value) -> Option<Vec<Condition>> {
    let object = filter.as_object()?;
    let mut conditions = Vec::new();

    for (field, spec) in object {
        match spec {
            Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) => {
                for (key, value) in ops {
                    conditions.push(Condition {
                        field: field.clone(),
                        comparator: Comparator::from_operator_key(key)?,
                        value: Literal::from_json(value)?,
                    });
                }
            }
            scalar => conditions.push(Condition {
                field: field.clone(),
                comparator: Comparator::Eq,
                value: Literal::from_json(scalar)?,
            }),
        }
    }

    Some(conditions)
}

/// Split a WHERE clause on top-level `AND`. Quoted text is opaque; `OR` or a
/// parenthesis outside quotes makes the clause unsupported.
fn split_conjunction(clause: &str) -> Result<Vec<&str>> {
    let bytes = clause.as_bytes();
    let mut parts = Vec::new();
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'(' | b')' => {
                    return Err(MediatorError::TranslationUnsupported(
                        "grouping is not supported".to_string(),
                    ))
                }
                _ if b.is_ascii_whitespace() => {
                    let rest = &clause[i..];
                    let word = rest.trim_start();
                    let gap = rest.len() - word.len();
                    if let Some(len) = keyword_at(word, "and") {
                        parts.push(&clause[start..i]);
                        start = i + gap + len;
                        i = start;
                        continue;
                    }
                    if keyword_at(word, "or").is_some() {
                        return Err(MediatorError::TranslationUnsupported(
                            "disjunction is not supported".to_string(),
                        ));
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }

    if quote.is_some() {
        return Err(MediatorError::TranslationUnsupported(
            "unterminated string literal".to_string(),
        ));
    }
    parts.push(&clause[start..]);

    let parts: Vec<&str> = parts.into_iter().map(str::trim).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(MediatorError::TranslationUnsupported(
            "empty condition".to_string(),
        ));
    }
    Ok(parts)
}

/// Length of `keyword` when `text` starts with it as a whole word.
fn keyword_at(text: &str, keyword: &str) -> Option<usize> {
    let head = text.get(..keyword.len())?;
    let terminated = text
        .as_bytes()
        .get(keyword.len())
        .map_or(true, |b| b.is_ascii_whitespace());
    (head.eq_ignore_ascii_case(keyword) && terminated).then_some(keyword.len())
}

/// Rewrite a relational query into document-store call syntax.
///
/// Fail-open: non-relational text and anything outside the supported grammar
/// come back unchanged.
pub fn translate_to_document(query: &str) -> String {
    if classify(query) != Dialect::Relational {
        return query.to_string();
    }

    match SelectQuery::parse(query).and_then(|select| select.to_document_query()) {
        Ok(translated) => {
            debug!("Translated relational query to document form: {}", translated);
            translated
        }
        Err(e) => {
            debug!("Leaving query untranslated ({}): {}", e, query);
            query.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter_of(document_query: &str) -> Value {
        let open = document_query.find("find(").unwrap() + "find(".len();
        let close = document_query[open..].find(')').unwrap() + open;
        serde_json::from_str(&document_query[open..close]).unwrap()
    }

    #[test]
    fn test_simple_select() {
        assert_eq!(translate_to_document("SELECT * FROM accounts"), "db.accounts.find({})");
        assert_eq!(translate_to_document("select * from accounts;"), "db.accounts.find({})");
    }

    #[test]
    fn test_greater_than() {
        let out = translate_to_document("SELECT * FROM accounts WHERE balance > 5000");
        assert!(out.starts_with("db.accounts.find("));
        assert_eq!(filter_of(&out), json!({"balance": {"$gt": 5000}}));
    }

    #[test]
    fn test_conjunction_holds_both_constraints() {
        let out = translate_to_document(
            "SELECT * FROM accounts WHERE balance > 5000 AND account_type = 'Checking'",
        );
        assert_eq!(
            filter_of(&out),
            json!({"account_type": "Checking", "balance": {"$gt": 5000}})
        );
    }

    #[test]
    fn test_all_comparators() {
        let select = SelectQuery::parse(
            "SELECT * FROM t WHERE a = 1 AND b != 2 AND c > 3 AND d >= 4 AND e < 5 AND f <= 6",
        )
        .unwrap();
        assert_eq!(
            select.filter().unwrap(),
            json!({
                "a": 1,
                "b": {"$ne": 2},
                "c": {"$gt": 3},
                "d": {"$gte": 4},
                "e": {"$lt": 5},
                "f": {"$lte": 6}
            })
        );
    }

    #[test]
    fn test_range_on_one_field_merges() {
        let select = SelectQuery::parse("SELECT * FROM t WHERE x >= 10 AND x < 20").unwrap();
        assert_eq!(select.filter().unwrap(), json!({"x": {"$gte": 10, "$lt": 20}}));

        let select = SelectQuery::parse("SELECT * FROM t WHERE x = 10 AND x != 11").unwrap();
        assert_eq!(select.filter().unwrap(), json!({"x": {"$eq": 10, "$ne": 11}}));
    }

    #[test]
    fn test_repeated_operator_on_one_field_is_not_translated() {
        for q in [
            "SELECT * FROM accounts WHERE balance > 20000 AND balance > 1000",
            "SELECT * FROM t WHERE x = 1 AND x = 2",
            "SELECT * FROM t WHERE x >= 1 AND x < 5 AND x >= 3",
        ] {
            assert!(SelectQuery::parse(q).unwrap().filter().is_err(), "{}", q);
            assert_eq!(translate_to_document(q), q);
        }
    }

    #[test]
    fn test_limit() {
        assert_eq!(
            translate_to_document("SELECT * FROM accounts LIMIT 5"),
            "db.accounts.find({}).limit(5)"
        );
        let out = translate_to_document("SELECT * FROM accounts WHERE active = TRUE LIMIT 2");
        assert!(out.ends_with(".limit(2)"));
        assert_eq!(filter_of(&out), json!({"active": true}));
    }

    #[test]
    fn test_literal_parsing() {
        assert_eq!(Literal::parse("'x'"), Literal::Str("x".into()));
        assert_eq!(Literal::parse("\"x y\""), Literal::Str("x y".into()));
        assert_eq!(Literal::parse("42"), Literal::Int(42));
        assert_eq!(Literal::parse("-1.5"), Literal::Float(-1.5));
        assert_eq!(Literal::parse("False"), Literal::Bool(false));
        assert_eq!(Literal::parse("Checking"), Literal::Str("Checking".into()));
        assert_eq!(Literal::parse("NaN"), Literal::Str("NaN".into()));
    }

    #[test]
    fn test_quoted_and_is_not_a_separator() {
        let select = SelectQuery::parse("SELECT * FROM t WHERE name = 'Tom AND Jerry'").unwrap();
        assert_eq!(select.filter().unwrap(), json!({"name": "Tom AND Jerry"}));
    }

    #[test]
    fn test_unsupported_is_identity() {
        for q in [
            "SELECT id FROM accounts",
            "SELECT * FROM accounts WHERE a = 1 OR b = 2",
            "SELECT * FROM accounts WHERE (a = 1)",
            "SELECT * FROM accounts ORDER BY id",
            "SELECT * FROM accounts WHERE a <> 1",
            "SELECT * FROM accounts WHERE a = 1 AND",
            "UPDATE accounts SET balance = 0",
        ] {
            assert_eq!(translate_to_document(q), q, "{}", q);
        }
    }

    #[test]
    fn test_document_query_is_identity() {
        let q = "db.accounts.find({\"balance\": {\"$gt\": 1}})";
        assert_eq!(translate_to_document(q), q);
        assert_eq!(translate_to_document("GET account:ACC001"), "GET account:ACC001");
    }

    #[test]
    fn test_condition_matching() {
        let select = SelectQuery::parse(
            "SELECT * FROM accounts WHERE balance >= 5000 AND account_type != 'Savings'",
        )
        .unwrap();
        let row = |balance: f64, kind: &str| {
            json!({"balance": balance, "account_type": kind})
                .as_object()
                .unwrap()
                .clone()
        };
        assert!(select.matches(&row(5000.0, "Checking")));
        assert!(!select.matches(&row(4999.99, "Checking")));
        assert!(!select.matches(&row(9000.0, "Savings")));
    }

    #[test]
    fn test_filter_reads_back_into_conditions() {
        let select = SelectQuery::parse("SELECT * FROM t WHERE x >= 10 AND x < 20 AND k = 'v'").unwrap();
        let conditions = conditions_from_filter(&select.filter().unwrap()).unwrap();
        assert_eq!(conditions.len(), 3);
        assert!(conditions.iter().any(|c| c.field == "k" && c.comparator == Comparator::Eq));

        assert!(conditions_from_filter(&json!({"x": {"$regex": "a"}})).is_none());
        assert!(conditions_from_filter(&json!([1, 2])).is_none());
    }
}
