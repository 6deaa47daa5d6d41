//! In-memory stores
//!
//! Seeded stand-ins for the relational, document and key-value drivers. They
//! evaluate the same bounded grammar the translator emits, can simulate a
//! per-call delay, and can be switched offline to exercise fail-closed paths.

use crate::error::{MediatorError, Result};
use crate::query::translator::conditions_from_filter;
use crate::query::{Dialect, SelectQuery};
use crate::store::{DataStore, StoreDescriptor, StoreRegistry, StoreResponse};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

lazy_static! {
    static ref FIND_CALL: Regex = Regex::new(
        r"(?s)^\s*\w+\.(\w+)\.find\s*\(\s*(.*?)\s*\)(?:\s*\.limit\s*\(\s*(\d+)\s*\))?\s*;?\s*$"
    )
    .unwrap();
}

type Row = Map<String, Value>;

/// Online switch, simulated delay and call counter shared by all in-memory stores
#[derive(Debug, Default)]
struct Behaviour {
    offline: AtomicBool,
    delay: Duration,
    calls: AtomicU64,
}

impl Behaviour {
    async fn enter(&self, store: &str) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(MediatorError::StoreUnavailable(format!("{} is offline", store)));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }

    fn connect(&self, store: &str) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(MediatorError::Connection(format!("{} is offline", store)))
        } else {
            Ok(())
        }
    }
}

macro_rules! behaviour_controls {
    ($store:ty) => {
        impl $store {
            /// Simulated per-call delay for queries and probes.
            pub fn with_delay(mut self, delay: Duration) -> Self {
                self.behaviour.delay = delay;
                self
            }

            pub fn set_online(&self, online: bool) {
                self.behaviour.offline.store(!online, Ordering::SeqCst);
            }

            /// Number of queries and probes served.
            pub fn calls(&self) -> u64 {
                self.behaviour.calls.load(Ordering::SeqCst)
            }
        }
    };
}

fn limited(rows: impl Iterator<Item = Row>, limit: Option<u64>) -> Vec<Value> {
    let limit = limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
    rows.take(limit).map(Value::Object).collect()
}

fn rows_from(values: Vec<Value>) -> Vec<Row> {
    values
        .into_iter()
        .filter_map(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}

/// Relational store over named tables; serves `SELECT * ...` only
pub struct MemoryRelationalStore {
    descriptor: StoreDescriptor,
    tables: RwLock<HashMap<String, Vec<Row>>>,
    behaviour: Behaviour,
}

behaviour_controls!(MemoryRelationalStore);

impl MemoryRelationalStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            descriptor: StoreDescriptor::new(name, Dialect::Relational),
            tables: RwLock::new(HashMap::new()),
            behaviour: Behaviour::default(),
        }
    }

    pub fn with_table(mut self, table: &str, rows: Vec<Value>) -> Self {
        self.tables.get_mut().insert(table.to_string(), rows_from(rows));
        self
    }
}

#[async_trait]
impl DataStore for MemoryRelationalStore {
    fn descriptor(&self) -> &StoreDescriptor {
        &self.descriptor
    }

    async fn connect(&self) -> Result<()> {
        self.behaviour.connect(self.name())
    }

    async fn execute_query(&self, query: &str) -> Result<StoreResponse> {
        self.behaviour.enter(self.name()).await?;

        let select = match SelectQuery::parse(query) {
            Ok(select) => select,
            Err(e) => {
                debug!("{} rejected query: {}", self.name(), e);
                return Ok(StoreResponse::failed(format!(
                    "syntax error: statement not supported by {}",
                    self.name()
                )));
            }
        };

        let tables = self.tables.read().await;
        let Some(rows) = tables.get(&select.source) else {
            return Ok(StoreResponse::failed(format!(
                "relation \"{}\" does not exist",
                select.source
            )));
        };

        let matching = rows.iter().filter(|row| select.matches(row)).cloned();
        Ok(StoreResponse::ok(limited(matching, select.limit)))
    }

    async fn has_data(&self, identifier: &str) -> Result<bool> {
        self.behaviour.enter(self.name()).await?;
        let tables = self.tables.read().await;
        Ok(tables.get(identifier).map_or(false, |rows| !rows.is_empty()))
    }
}

/// Document store over named collections; serves `db.<collection>.find(<json>)[.limit(n)]`
pub struct MemoryDocumentStore {
    descriptor: StoreDescriptor,
    collections: RwLock<HashMap<String, Vec<Row>>>,
    behaviour: Behaviour,
}

behaviour_controls!(MemoryDocumentStore);

impl MemoryDocumentStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            descriptor: StoreDescriptor::new(name, Dialect::Document),
            collections: RwLock::new(HashMap::new()),
            behaviour: Behaviour::default(),
        }
    }

    pub fn with_collection(mut self, collection: &str, documents: Vec<Value>) -> Self {
        self.collections
            .get_mut()
            .insert(collection.to_string(), rows_from(documents));
        self
    }
}

#[async_trait]
impl DataStore for MemoryDocumentStore {
    fn descriptor(&self) -> &StoreDescriptor {
        &self.descriptor
    }

    async fn connect(&self) -> Result<()> {
        self.behaviour.connect(self.name())
    }

    async fn execute_query(&self, query: &str) -> Result<StoreResponse> {
        self.behaviour.enter(self.name()).await?;

        let Some(caps) = FIND_CALL.captures(query) else {
            return Ok(StoreResponse::failed(
                "invalid query format, expected db.<collection>.find({...})",
            ));
        };

        let filter_text = caps.get(2).map_or("", |m| m.as_str());
        let filter: Value = if filter_text.is_empty() {
            json!({})
        } else {
            match serde_json::from_str(filter_text) {
                Ok(filter) => filter,
                Err(e) => return Ok(StoreResponse::failed(format!("invalid filter: {}", e))),
            }
        };
        let Some(conditions) = conditions_from_filter(&filter) else {
            return Ok(StoreResponse::failed("unsupported filter operator"));
        };
        let limit = caps.get(3).and_then(|m| m.as_str().parse::<u64>().ok());

        let collections = self.collections.read().await;
        let documents = collections.get(&caps[1]).map(Vec::as_slice).unwrap_or_default();
        let matching = documents
            .iter()
            .filter(|doc| conditions.iter().all(|c| c.matches(doc)))
            .cloned();

        Ok(StoreResponse::ok(limited(matching, limit)))
    }

    async fn has_data(&self, identifier: &str) -> Result<bool> {
        self.behaviour.enter(self.name()).await?;
        let collections = self.collections.read().await;
        Ok(collections.get(identifier).map_or(false, |docs| !docs.is_empty()))
    }
}

/// Key-value store; serves GET, SET, KEYS and HGETALL
pub struct MemoryKeyValueStore {
    descriptor: StoreDescriptor,
    entries: RwLock<BTreeMap<String, Value>>,
    behaviour: Behaviour,
}

behaviour_controls!(MemoryKeyValueStore);

impl MemoryKeyValueStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            descriptor: StoreDescriptor::new(name, Dialect::KeyValue),
            entries: RwLock::new(BTreeMap::new()),
            behaviour: Behaviour::default(),
        }
    }

    pub fn with_entry(mut self, key: &str, value: Value) -> Self {
        self.entries.get_mut().insert(key.to_string(), value);
        self
    }
}

/// `*` matches any run of characters.
fn glob_matches(pattern: &str, key: &str) -> bool {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    Regex::new(&format!("^{}$", escaped.join(".*")))
        .map(|re| re.is_match(key))
        .unwrap_or(false)
}

#[async_trait]
impl DataStore for MemoryKeyValueStore {
    fn descriptor(&self) -> &StoreDescriptor {
        &self.descriptor
    }

    async fn connect(&self) -> Result<()> {
        self.behaviour.connect(self.name())
    }

    async fn execute_query(&self, query: &str) -> Result<StoreResponse> {
        self.behaviour.enter(self.name()).await?;

        let mut parts = query.split_whitespace();
        let command = parts.next().unwrap_or_default().to_ascii_uppercase();
        let Some(key) = parts.next() else {
            return Ok(StoreResponse::failed("key-value query requires a key"));
        };

        match command.as_str() {
            "GET" => {
                let entries = self.entries.read().await;
                Ok(StoreResponse::ok(
                    entries
                        .get(key)
                        .map(|value| vec![json!({"key": key, "value": value})])
                        .unwrap_or_default(),
                ))
            }
            "HGETALL" => {
                let entries = self.entries.read().await;
                Ok(StoreResponse::ok(
                    entries
                        .get(key)
                        .filter(|value| value.is_object())
                        .cloned()
                        .into_iter()
                        .collect(),
                ))
            }
            "KEYS" => {
                let entries = self.entries.read().await;
                Ok(StoreResponse::ok(
                    entries
                        .keys()
                        .filter(|k| glob_matches(key, k))
                        .map(|k| json!({"value": k}))
                        .collect(),
                ))
            }
            "SET" => {
                let value = parts.collect::<Vec<_>>().join(" ");
                if value.is_empty() {
                    return Ok(StoreResponse::failed("SET requires a value"));
                }
                let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
                self.entries.write().await.insert(key.to_string(), value);
                Ok(StoreResponse::ok(vec![json!({"value": "OK"})]))
            }
            other => Ok(StoreResponse::failed(format!(
                "command {} not supported by {}",
                other,
                self.name()
            ))),
        }
    }

    async fn has_data(&self, identifier: &str) -> Result<bool> {
        self.behaviour.enter(self.name()).await?;
        let entries = self.entries.read().await;
        if identifier.contains('*') {
            Ok(entries.keys().any(|k| glob_matches(identifier, k)))
        } else {
            Ok(entries.contains_key(identifier))
        }
    }
}

/// Banking sample data: accounts and customers in the relational and document
/// stores, per-entity keys in the key-value store.
pub fn banking_registry() -> Result<StoreRegistry> {
    let accounts = vec![
        json!({"id": "ACC001", "customer_id": "CUST001", "account_type": "Checking", "balance": 5250.75}),
        json!({"id": "ACC002", "customer_id": "CUST001", "account_type": "Savings", "balance": 25000.00}),
        json!({"id": "ACC003", "customer_id": "CUST002", "account_type": "Checking", "balance": 3500.50}),
        json!({"id": "ACC004", "customer_id": "CUST002", "account_type": "Business", "balance": 150000.00}),
        json!({"id": "ACC005", "customer_id": "CUST003", "account_type": "Checking", "balance": 1200.25}),
    ];
    let customers = vec![
        json!({"id": "CUST001", "name": "John Smith", "email": "john@example.com", "country": "USA"}),
        json!({"id": "CUST002", "name": "Sarah Johnson", "email": "sarah@example.com", "country": "USA"}),
        json!({"id": "CUST003", "name": "Michael Brown", "email": "michael@example.com", "country": "USA"}),
    ];
    let transactions = vec![
        json!({"id": "TXN001", "account_id": "ACC001", "type": "Debit", "amount": 120.00}),
        json!({"id": "TXN002", "account_id": "ACC002", "type": "Credit", "amount": 5000.00}),
        json!({"id": "TXN003", "account_id": "ACC004", "type": "Debit", "amount": 20000.00}),
    ];

    let relational = MemoryRelationalStore::new("postgres")
        .with_table("accounts", accounts.clone())
        .with_table("customers", customers.clone())
        .with_table("transactions", transactions);

    let document = MemoryDocumentStore::new("mongo")
        .with_collection("accounts", accounts.clone())
        .with_collection("customers", customers.clone());

    let key_value = accounts
        .iter()
        .chain(customers.iter())
        .fold(MemoryKeyValueStore::new("redis"), |store, entity| {
            let id = entity["id"].as_str().unwrap_or_default();
            let prefix = if id.starts_with("ACC") { "account" } else { "customer" };
            store.with_entry(&format!("{}:{}", prefix, id), entity.clone())
        });

    StoreRegistry::new()
        .with(Arc::new(relational))?
        .with(Arc::new(document))?
        .with(Arc::new(key_value))
}
