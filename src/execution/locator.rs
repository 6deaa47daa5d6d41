//! Data Locator - which candidate stores actually hold the addressed data
//!
//! Each candidate is probed with `has_data(identifier)` concurrently. A probe
//! that errors, times out, or whose identifier cannot be extracted counts as
//! "not present". Dropping the `locate` future aborts outstanding probes.

use crate::query::Dialect;
use crate::store::DataStore;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

lazy_static! {
    static ref RELATIONAL_TARGET: Regex =
        Regex::new(r#"(?i)\b(?:FROM|INTO|UPDATE)\s+["`]?([A-Za-z_][\w.]*)"#).unwrap();
    static ref DOCUMENT_COLLECTION: Regex = Regex::new(r"^\s*\w+\.(\w+)\.\w+\s*\(").unwrap();
    static ref KEY_VALUE_ARGUMENT: Regex = Regex::new(r"^\s*\w+\s+(\S+)").unwrap();
}

/// Object addressed by a query: table, collection or key.
pub fn extract_identifier(dialect: Dialect, query: &str) -> Option<String> {
    let pattern: &Regex = match dialect {
        Dialect::Relational => &RELATIONAL_TARGET,
        Dialect::Document => &DOCUMENT_COLLECTION,
        Dialect::KeyValue => &KEY_VALUE_ARGUMENT,
    };
    pattern
        .captures(query)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// A store together with the query text it would run, in that store's dialect
#[derive(Clone)]
pub struct Candidate {
    pub store: Arc<dyn DataStore>,
    pub query: String,
    pub dialect: Dialect,
    /// `query` is a translation of the caller's text
    pub translated: bool,
}

impl Candidate {
    pub fn name(&self) -> &str {
        self.store.name()
    }
}

#[derive(Debug, Clone)]
pub struct DataLocator {
    timeout: Duration,
}

impl DataLocator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Candidates whose store reports the data present, in input order.
    pub async fn locate(&self, candidates: &[Candidate]) -> Vec<Candidate> {
        let mut probes = JoinSet::new();

        for (index, candidate) in candidates.iter().enumerate() {
            let Some(identifier) = extract_identifier(candidate.dialect, &candidate.query) else {
                debug!(
                    "No {} identifier in query for '{}', treating as absent",
                    candidate.dialect,
                    candidate.name()
                );
                continue;
            };

            let store = candidate.store.clone();
            let timeout = self.timeout;
            probes.spawn(async move {
                let present = match tokio::time::timeout(timeout, store.has_data(&identifier)).await {
                    Ok(Ok(present)) => present,
                    Ok(Err(e)) => {
                        warn!("Probe of '{}' for '{}' failed: {}", store.name(), identifier, e);
                        false
                    }
                    Err(_) => {
                        warn!(
                            "Probe of '{}' for '{}' timed out after {:?}",
                            store.name(),
                            identifier,
                            timeout
                        );
                        false
                    }
                };
                (index, present)
            });
        }

        let mut present = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((index, true)) => present.push(index),
                Ok((_, false)) => {}
                Err(e) => warn!("Probe task aborted: {}", e),
            }
        }
        present.sort_unstable();

        let located: Vec<Candidate> = present.into_iter().map(|i| candidates[i].clone()).collect();
        info!(
            "Data located in {}/{} candidate store(s): [{}]",
            located.len(),
            candidates.len(),
            located.iter().map(Candidate::name).collect::<Vec<_>>().join(", ")
        );
        located
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{banking_registry, MemoryKeyValueStore};
    use serde_json::json;

    #[test]
    fn test_extract_identifier() {
        let rel = |q| extract_identifier(Dialect::Relational, q);
        assert_eq!(rel("SELECT * FROM accounts WHERE id = 1").as_deref(), Some("accounts"));
        assert_eq!(rel("insert into ledger values (1)").as_deref(), Some("ledger"));
        assert_eq!(rel("UPDATE customers SET x = 1").as_deref(), Some("customers"));
        assert_eq!(rel("SELECT 1"), None);

        assert_eq!(
            extract_identifier(Dialect::Document, r#"db.accounts.find({"a": 1})"#).as_deref(),
            Some("accounts")
        );
        assert_eq!(extract_identifier(Dialect::Document, "accounts.find()"), None);

        assert_eq!(
            extract_identifier(Dialect::KeyValue, "HGETALL account:ACC001").as_deref(),
            Some("account:ACC001")
        );
        assert_eq!(extract_identifier(Dialect::KeyValue, "GET"), None);
    }

    fn candidate(store: Arc<dyn DataStore>, query: &str) -> Candidate {
        let dialect = store.descriptor().primary_dialect();
        Candidate {
            store,
            query: query.to_string(),
            dialect,
            translated: false,
        }
    }

    #[tokio::test]
    async fn test_locate_keeps_only_stores_with_data() {
        let registry = banking_registry().unwrap();
        let candidates = vec![
            candidate(registry.get("postgres").unwrap(), "SELECT * FROM transactions"),
            candidate(registry.get("mongo").unwrap(), "db.transactions.find({})"),
        ];

        let located = DataLocator::new(Duration::from_secs(1)).locate(&candidates).await;
        assert_eq!(located.len(), 1);
        assert_eq!(located[0].name(), "postgres");
    }

    #[tokio::test]
    async fn test_locate_fails_closed() {
        let slow = Arc::new(
            MemoryKeyValueStore::new("slow")
                .with_entry("k", json!(1))
                .with_delay(Duration::from_millis(500)),
        );
        let offline = Arc::new(MemoryKeyValueStore::new("offline").with_entry("k", json!(1)));
        offline.set_online(false);
        let healthy = Arc::new(MemoryKeyValueStore::new("healthy").with_entry("k", json!(1)));

        let candidates = vec![
            candidate(slow, "GET k"),
            candidate(offline, "GET k"),
            candidate(healthy.clone(), "GET"),
            candidate(healthy, "GET k"),
        ];

        let located = DataLocator::new(Duration::from_millis(50)).locate(&candidates).await;
        assert_eq!(located.len(), 1);
        assert_eq!(located[0].name(), "healthy");
        assert_eq!(located[0].query, "GET k");
    }
}
