//! Query Result - what one store returned for one query, with its cost

use crate::execution::recorder::{ExecutionMetrics, Measurement};
use crate::query::Dialect;
use serde::{Deserialize, Serialize};

/// Standardized result from any store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Store that executed the query
    pub store: String,

    pub success: bool,

    pub data: Vec<serde_json::Value>,

    pub row_count: usize,

    pub error: Option<String>,

    pub metrics: ExecutionMetrics,

    /// Text the store actually ran
    pub executed_query: String,

    /// Dialect of `executed_query`
    pub dialect: Dialect,

    /// Set when `executed_query` is a translation of the caller's text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converted_query: Option<String>,

    /// The store could not be reached for this call
    #[serde(default)]
    pub unavailable: bool,
}

impl QueryResult {
    pub fn from_measurement(
        store: impl Into<String>,
        executed_query: impl Into<String>,
        dialect: Dialect,
        translated: bool,
        measurement: Measurement,
    ) -> Self {
        let executed_query = executed_query.into();
        let Measurement {
            response,
            metrics,
            unavailable,
        } = measurement;

        Self {
            store: store.into(),
            success: response.success,
            row_count: response.data.len(),
            data: response.data,
            error: response.error,
            metrics,
            converted_query: translated.then(|| executed_query.clone()),
            executed_query,
            dialect,
            unavailable,
        }
    }
}
