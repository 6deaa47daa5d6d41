//! Execution Record - one immutable entry of the execution log

use crate::execution::{ExecutionMetrics, QueryResult};
use crate::learning::MetricSample;
use crate::query::{Dialect, QuerySignature};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the execution came about. Audit only; every origin feeds the model alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOrigin {
    /// Store picked by the selection policy
    Routed,
    /// Store named by the caller
    Forced,
    /// Part of a compare fan-out
    Comparison,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub row_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub signature: QuerySignature,
    /// Text as submitted by the caller
    pub query_text: String,
    /// Text the store ran (differs from `query_text` when translated)
    pub executed_query: String,
    pub store: String,
    pub dialect: Dialect,
    pub origin: ExecutionOrigin,
    #[serde(default)]
    pub metrics: ExecutionMetrics,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn from_result(query_text: &str, result: &QueryResult, origin: ExecutionOrigin) -> Self {
        Self {
            id: Uuid::new_v4(),
            signature: QuerySignature::of(query_text),
            query_text: query_text.to_string(),
            executed_query: result.executed_query.clone(),
            store: result.store.clone(),
            dialect: result.dialect,
            origin,
            metrics: result.metrics,
            outcome: Outcome {
                success: result.success,
                error: result.error.clone(),
                row_count: result.row_count,
            },
            timestamp: Utc::now(),
        }
    }

    /// The sample this record contributes to its (signature, store) profile.
    pub fn sample(&self) -> MetricSample {
        self.metrics.to_sample(self.outcome.success, self.timestamp)
    }
}
