//! Mediator - routes each query to the store predicted to run it fastest
//!
//! request → classify → candidates (+ translation) → locate → select →
//! execute (measured) → record + learn → response
//!
//! The compare path fans a query out to every compatible store at once; its
//! samples feed the model exactly like routed executions.

use crate::config::MediatorConfig;
use crate::error::{MediatorError, Result};
use crate::execution::{Candidate, DataLocator, Measurement, MetricsRecorder, QueryResult};
use crate::history::{ExecutionOrigin, ExecutionRecord, HistoryFilter, HistoryStats, HistoryStore};
use crate::learning::PerformanceModel;
use crate::mediator::policy::{Selection, SelectionPolicy, SelectionState};
use crate::query::{classify, Dialect, QuerySignature};
use crate::store::StoreRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

/// Where a query should run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Target {
    /// Let the selection policy decide
    #[default]
    Auto,
    /// Run on the named store
    Store(String),
}

impl Target {
    pub fn from_option(store: Option<String>) -> Self {
        store.map_or(Target::Auto, Target::Store)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub signature: QuerySignature,
    pub dialect: Dialect,
    /// Recommended store
    pub recommendation: String,
    /// Text that would run on the recommended store
    pub executed_query: String,
    /// Percent
    pub confidence: f64,
    pub reason: String,
    pub state: SelectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scores: Option<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_execution_time_ms: Option<f64>,
    /// Stores that reported holding the data
    pub located: Vec<String>,
    /// Total samples recorded for this signature
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResponse {
    #[serde(flatten)]
    pub result: QueryResult,
    pub signature: QuerySignature,
    pub record_id: Uuid,
    pub state: SelectionState,
    pub reason: String,
    /// Stores that reported holding the data (empty when forced)
    pub located: Vec<String>,
    /// Other stores run alongside while exploring
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compared_with: Vec<String>,
}

pub struct Mediator {
    registry: StoreRegistry,
    history: Arc<HistoryStore>,
    policy: SelectionPolicy,
    locator: DataLocator,
    recorder: MetricsRecorder,
    compare_while_exploring: bool,
}

impl Mediator {
    pub fn new(config: MediatorConfig, registry: StoreRegistry) -> Result<Self> {
        config.validate()?;
        if registry.is_empty() {
            return Err(MediatorError::Config("no stores registered".to_string()));
        }

        let model = Arc::new(PerformanceModel::new(
            config.window_capacity,
            config.confidence_saturation,
        ));
        let history = match &config.data_dir {
            Some(dir) => HistoryStore::open(dir, model, config.history_limit),
            None => HistoryStore::in_memory(model, config.history_limit),
        };

        info!(
            "Mediator ready with {} store(s): [{}]",
            registry.len(),
            registry.names().join(", ")
        );

        Ok(Self {
            policy: SelectionPolicy::new(
                config.confidence_threshold,
                config.priors,
                config.default_stores.clone(),
                config.translate_for_routing,
            ),
            locator: DataLocator::new(config.store_timeout()),
            recorder: MetricsRecorder::new(config.latency_ratio, config.store_timeout()),
            compare_while_exploring: config.compare_while_exploring,
            registry,
            history: Arc::new(history),
        })
    }

    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    pub fn model(&self) -> &PerformanceModel {
        self.history.model()
    }

    pub fn is_degraded(&self) -> bool {
        self.history.is_degraded()
    }

    /// Connect every registered store; failures are reported, not fatal.
    pub async fn connect_stores(&self) -> Vec<(String, MediatorError)> {
        self.registry.connect_all().await
    }

    async fn select(&self, query: &str) -> Result<Selection> {
        let dialect = classify(query);
        let candidates = self.policy.candidates(&self.registry, query, dialect);
        let located = self.locator.locate(&candidates).await;
        self.policy
            .select(&self.registry, self.model(), query, dialect, &located)
    }

    /// Which store `query` would be routed to, without running it.
    pub async fn recommend(&self, query: &str) -> Result<Recommendation> {
        let signature = QuerySignature::of(query);
        let selection = self.select(query).await?;
        let prediction = self.model().predict(&signature);
        let samples = self.model().sample_count(&signature);

        Ok(Recommendation {
            signature,
            dialect: classify(query),
            reason: selection.explanation(samples),
            recommendation: selection.store,
            executed_query: selection.query,
            confidence: selection.confidence,
            state: selection.state,
            scores: (!selection.scores.is_empty()).then_some(selection.scores),
            expected_execution_time_ms: prediction.map(|p| p.expected_execution_time_ms),
            located: selection.located,
            samples,
        })
    }

    /// Run `query` on one store, chosen automatically or named by the caller.
    pub async fn execute(&self, query: &str, target: Target) -> Result<ExecutionResponse> {
        let dialect = classify(query);
        let selection = match &target {
            Target::Store(name) => self.policy.forced(&self.registry, query, dialect, name)?,
            Target::Auto => self.select(query).await?,
        };

        let exploring = matches!(selection.state, SelectionState::NoHistory | SelectionState::Exploring);
        if self.compare_while_exploring && exploring && selection.located.len() > 1 {
            return self.explore(query, selection).await;
        }

        let store = self.registry.get(&selection.store)?;
        let measurement = self.recorder.measure(store.as_ref(), &selection.query).await;
        let result = QueryResult::from_measurement(
            &selection.store,
            &selection.query,
            selection.dialect,
            selection.translated,
            measurement,
        );

        let origin = match target {
            Target::Store(_) => ExecutionOrigin::Forced,
            Target::Auto => ExecutionOrigin::Routed,
        };
        let record = ExecutionRecord::from_result(query, &result, origin);
        let record_id = record.id;
        self.record(vec![record]).await;

        let samples = self.model().sample_count(&QuerySignature::of(query));
        Ok(ExecutionResponse {
            signature: QuerySignature::of(query),
            record_id,
            state: selection.state,
            reason: selection.explanation(samples),
            located: selection.located,
            compared_with: Vec::new(),
            result,
        })
    }

    /// Run the located candidates side by side, record all of them, and answer
    /// with the selected store's result.
    async fn explore(&self, query: &str, selection: Selection) -> Result<ExecutionResponse> {
        let dialect = classify(query);
        let located: Vec<Candidate> = self
            .policy
            .candidates(&self.registry, query, dialect)
            .into_iter()
            .filter(|c| selection.located.contains(&c.store.name().to_string()))
            .collect();

        let results = self.fan_out(&located).await;
        let mut chosen = None;
        let mut compared_with = Vec::new();
        let mut records = Vec::with_capacity(results.len());

        for result in results {
            if result.store == selection.store {
                let record = ExecutionRecord::from_result(query, &result, ExecutionOrigin::Routed);
                chosen = Some((result, record.id));
                records.push(record);
            } else {
                records.push(ExecutionRecord::from_result(query, &result, ExecutionOrigin::Comparison));
                compared_with.push(result.store);
            }
        }
        self.record(records).await;

        let (result, record_id) = chosen.ok_or_else(|| {
            MediatorError::StoreExecution(format!("'{}' missing from exploration", selection.store))
        })?;
        let samples = self.model().sample_count(&QuerySignature::of(query));

        Ok(ExecutionResponse {
            signature: QuerySignature::of(query),
            record_id,
            state: selection.state,
            reason: selection.explanation(samples),
            located: selection.located,
            compared_with,
            result,
        })
    }

    /// Run `query` on every compatible store concurrently, translating where
    /// needed. One store's failure never affects the others.
    pub async fn execute_all(&self, query: &str) -> Result<Vec<QueryResult>> {
        let dialect = classify(query);
        let candidates = self.policy.candidates(&self.registry, query, dialect);
        if candidates.is_empty() {
            return Err(MediatorError::NoStoreForDialect(dialect.to_string()));
        }

        let results = self.fan_out(&candidates).await;
        let records = results
            .iter()
            .map(|result| ExecutionRecord::from_result(query, result, ExecutionOrigin::Comparison))
            .collect();
        self.record(records).await;
        Ok(results)
    }

    /// Concurrent measured execution, results in candidate order. Dropping the
    /// returned future aborts every outstanding store call.
    async fn fan_out(&self, candidates: &[Candidate]) -> Vec<QueryResult> {
        let mut tasks = JoinSet::new();
        for (index, candidate) in candidates.iter().enumerate() {
            let candidate = candidate.clone();
            let recorder = self.recorder.clone();
            tasks.spawn(async move {
                let measurement = recorder.measure(candidate.store.as_ref(), &candidate.query).await;
                let result = QueryResult::from_measurement(
                    candidate.name(),
                    &candidate.query,
                    candidate.dialect,
                    candidate.translated,
                    measurement,
                );
                (index, result)
            });
        }

        let mut slots: Vec<Option<QueryResult>> = candidates.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!("Store task failed: {}", e),
            }
        }

        // A task that panicked still answers, as a failure of its store
        candidates
            .iter()
            .zip(slots)
            .map(|(candidate, slot)| {
                slot.unwrap_or_else(|| {
                    let error = MediatorError::StoreExecution(format!(
                        "'{}' did not complete the query",
                        candidate.name()
                    ));
                    QueryResult::from_measurement(
                        candidate.name(),
                        &candidate.query,
                        candidate.dialect,
                        candidate.translated,
                        Measurement::failed(&error),
                    )
                })
            })
            .collect()
    }

    /// Append records off the async workers; the log and profile writes block.
    async fn record(&self, records: Vec<ExecutionRecord>) {
        if records.is_empty() {
            return;
        }
        let history = Arc::clone(&self.history);
        match tokio::task::spawn_blocking(move || history.append_all(records)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to record execution: {}", e),
            Err(e) => warn!("Recording task failed: {}", e),
        }
    }

    /// Execution records matching `filter`, newest first.
    pub fn history(&self, filter: &HistoryFilter) -> Result<Vec<ExecutionRecord>> {
        self.history.query(filter)
    }

    /// Aggregates over the whole log, or one store's records.
    pub fn stats(&self, store: Option<&str>) -> Result<HistoryStats> {
        let mut filter = HistoryFilter::default();
        if let Some(store) = store {
            filter = filter.store(store);
        }
        self.history.stats(&filter)
    }

    /// Empty the execution log and every learned profile.
    pub fn clear_history(&self) -> Result<()> {
        self.history.clear()
    }
}
