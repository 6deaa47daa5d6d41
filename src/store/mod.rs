//! Store Contract - Narrow capability interface every backing store exposes
//!
//! Stores are pluggable collaborators: the mediator only needs to connect,
//! execute a query text, and ask whether an object (table, collection, key)
//! is present. Drivers must fail closed instead of panicking when unavailable.

pub mod memory;
pub mod registry;

use crate::error::Result;
use crate::query::Dialect;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use registry::StoreRegistry;

/// Store capabilities - coarse feature flags used for reporting and priors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreCapabilities {
    /// Cheap exact-key reads
    pub point_lookups: bool,

    /// Arbitrary predicates over fields
    pub ad_hoc_filters: bool,

    /// Joins across objects
    pub joins: bool,

    /// Multi-statement transactions
    pub transactions: bool,
}

impl StoreCapabilities {
    pub fn relational() -> Self {
        Self {
            point_lookups: false,
            ad_hoc_filters: true,
            joins: true,
            transactions: true,
        }
    }

    pub fn document() -> Self {
        Self {
            point_lookups: false,
            ad_hoc_filters: true,
            joins: false,
            transactions: false,
        }
    }

    pub fn key_value() -> Self {
        Self {
            point_lookups: true,
            ad_hoc_filters: false,
            joins: false,
            transactions: false,
        }
    }

    pub fn for_dialect(dialect: Dialect) -> Self {
        match dialect {
            Dialect::Relational => Self::relational(),
            Dialect::Document => Self::document(),
            Dialect::KeyValue => Self::key_value(),
        }
    }
}

/// Static description of a registered store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreDescriptor {
    pub name: String,

    /// Dialects the store natively serves; the first is its primary dialect
    pub dialects: Vec<Dialect>,

    pub capabilities: StoreCapabilities,
}

impl StoreDescriptor {
    pub fn new(name: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            name: name.into(),
            dialects: vec![dialect],
            capabilities: StoreCapabilities::for_dialect(dialect),
        }
    }

    pub fn primary_dialect(&self) -> Dialect {
        self.dialects.first().copied().unwrap_or(Dialect::Relational)
    }

    pub fn serves(&self, dialect: Dialect) -> bool {
        self.dialects.contains(&dialect)
    }
}

/// Raw store response, before metrics are attached
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreResponse {
    pub success: bool,
    pub data: Vec<serde_json::Value>,
    pub error: Option<String>,
}

impl StoreResponse {
    pub fn ok(data: Vec<serde_json::Value>) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Store trait - all backing store drivers implement this
#[async_trait]
pub trait DataStore: Send + Sync {
    fn descriptor(&self) -> &StoreDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Establish (or verify) the connection. Fails with `MediatorError::Connection`.
    async fn connect(&self) -> Result<()>;

    /// Run a query written in one of the store's dialects.
    ///
    /// Query-level problems (bad syntax, missing object) come back as a
    /// `StoreResponse` with `success = false`; `Err` is reserved for the store
    /// itself being unreachable or broken.
    async fn execute_query(&self, query: &str) -> Result<StoreResponse>;

    /// Whether the addressed table / collection / key holds data.
    async fn has_data(&self, identifier: &str) -> Result<bool>;
}
