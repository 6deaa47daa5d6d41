//! History Store - append-only execution log plus the model it feeds
//!
//! Appending a record also folds its sample into the performance model, so
//! the two never drift apart. Appends share a gate that `clear` takes
//! exclusively: a clear never interleaves with a half-applied append.
//!
//! Persistence is best-effort. The first persistence failure is logged and
//! the store continues in memory only (degraded mode).
//!
//! Every record reaches the SQLite log as it is appended. `profiles.json` is a
//! snapshot written every [`PROFILE_SAVE_INTERVAL`] records, on `flush` and on
//! drop; on open, log records newer than a profile's latest sample are
//! replayed on top of it.

use crate::error::{MediatorError, Result};
use crate::history::profile_document::ProfileFile;
use crate::history::record::ExecutionRecord;
use crate::history::sqlite_log::SqliteLog;
use crate::learning::{MetricAggregate, PerformanceModel};
use crate::query::QuerySignature;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{info, warn};

/// Default number of records retained
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Records appended between two `profiles.json` snapshots
pub const PROFILE_SAVE_INTERVAL: usize = 64;

/// Retrieval filter; every set field must match
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryFilter {
    /// Case-insensitive substring of the caller's query text
    pub contains: Option<String>,
    /// Exact store name
    pub store: Option<String>,
    /// Only records at or after this instant
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn contains(mut self, text: impl Into<String>) -> Self {
        self.contains = Some(text.into());
        self
    }

    pub fn store(mut self, store: impl Into<String>) -> Self {
        self.store = Some(store.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &ExecutionRecord) -> bool {
        if let Some(store) = &self.store {
            if &record.store != store {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.timestamp < since {
                return false;
            }
        }
        if let Some(needle) = &self.contains {
            if !record
                .query_text
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

/// Aggregate over a set of records. Execution-time figures cover successful
/// records only; failures carry zeroed metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub count: usize,
    pub successes: usize,
    pub success_rate: f64,
    pub avg_execution_time_ms: f64,
    pub min_execution_time_ms: f64,
    pub max_execution_time_ms: f64,
}

impl StoreStats {
    fn from_records<'a>(records: impl IntoIterator<Item = &'a ExecutionRecord>) -> Self {
        let mut count = 0;
        let mut times = Vec::new();
        for record in records {
            count += 1;
            if record.outcome.success {
                times.push(record.metrics.execution_time_ms);
            }
        }

        let aggregate = MetricAggregate::from_values(&times);
        Self {
            count,
            successes: times.len(),
            success_rate: if count == 0 {
                0.0
            } else {
                times.len() as f64 / count as f64
            },
            avg_execution_time_ms: aggregate.mean,
            min_execution_time_ms: aggregate.min,
            max_execution_time_ms: aggregate.max,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub overall: StoreStats,
    pub per_store: BTreeMap<String, StoreStats>,
}

struct Persistence {
    log: SqliteLog,
    profiles: ProfileFile,
    /// Records appended since the last snapshot
    unsaved: AtomicUsize,
}

pub struct HistoryStore {
    records: Mutex<VecDeque<ExecutionRecord>>,
    model: Arc<PerformanceModel>,
    limit: usize,
    gate: RwLock<()>,
    persistence: Option<Persistence>,
    degraded: AtomicBool,
}

impl HistoryStore {
    /// History kept in memory only; lost on restart.
    pub fn in_memory(model: Arc<PerformanceModel>, limit: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            model,
            limit: limit.max(1),
            gate: RwLock::new(()),
            persistence: None,
            degraded: AtomicBool::new(false),
        }
    }

    /// History persisted under `dir`. Previously stored records and profiles
    /// are loaded into memory and into `model`.
    ///
    /// Never fails: if the directory cannot be used the store starts degraded.
    pub fn open(dir: impl AsRef<Path>, model: Arc<PerformanceModel>, limit: usize) -> Self {
        let dir = dir.as_ref();
        let mut store = Self::in_memory(model, limit);

        let log = match SqliteLog::open(dir) {
            Ok(log) => log,
            Err(e) => {
                warn!("Execution log unavailable in {}: {}", dir.display(), e);
                store.degraded.store(true, Ordering::SeqCst);
                return store;
            }
        };
        let persistence = Persistence {
            log,
            profiles: ProfileFile::new(dir),
            unsaved: AtomicUsize::new(0),
        };

        match persistence.log.load(store.limit) {
            Ok(records) => {
                if let Ok(guard) = store.records.get_mut() {
                    guard.extend(records);
                }
            }
            Err(e) => {
                warn!("Failed to load execution log: {}", e);
                store.degraded.store(true, Ordering::SeqCst);
                return store;
            }
        }

        match persistence.profiles.load() {
            Ok(document) => store.model.restore(document),
            Err(e) => {
                warn!(
                    "Unreadable {}, rebuilding profiles from the execution log: {}",
                    persistence.profiles.path().display(),
                    e
                );
                store.model.clear();
            }
        }
        let replayed = store.catch_up_from_log();
        persistence.unsaved.store(replayed, Ordering::SeqCst);

        store.persistence = Some(persistence);
        info!(
            "History store opened at {} ({} record(s))",
            dir.display(),
            store.len()
        );
        store
    }

    /// Observe the loaded records the restored profiles have not seen yet.
    fn catch_up_from_log(&mut self) -> usize {
        let Ok(records) = self.records.get_mut() else {
            return 0;
        };

        let mut seen: HashMap<(QuerySignature, String), Option<DateTime<Utc>>> = HashMap::new();
        let mut replayed = 0;
        for record in records.iter() {
            let latest = *seen
                .entry((record.signature.clone(), record.store.clone()))
                .or_insert_with(|| self.model.latest_sample_at(&record.signature, &record.store));
            if latest.map_or(true, |at| record.timestamp > at) {
                self.model.observe(&record.signature, &record.store, record.sample());
                replayed += 1;
            }
        }
        if replayed > 0 {
            info!("Replayed {} execution record(s) into the performance model", replayed);
        }
        replayed
    }

    pub fn model(&self) -> &Arc<PerformanceModel> {
        &self.model
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn is_persistent(&self) -> bool {
        self.persistence.is_some() && !self.is_degraded()
    }

    fn records(&self) -> Result<MutexGuard<'_, VecDeque<ExecutionRecord>>> {
        self.records
            .lock()
            .map_err(|_| MediatorError::Persistence("history lock poisoned".to_string()))
    }

    fn active_persistence(&self) -> Option<&Persistence> {
        self.persistence.as_ref().filter(|_| !self.is_degraded())
    }

    fn degrade(&self, what: &str, error: &MediatorError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(
                "Persistence failed ({}): {}. Continuing in memory only",
                what, error
            );
        }
    }

    /// Append a record and fold its sample into the model, exactly once.
    pub fn append(&self, record: ExecutionRecord) -> Result<()> {
        self.append_all(vec![record])
    }

    /// Append several records under one log transaction.
    ///
    /// Blocks on disk I/O when persistent; async callers should run it on the
    /// blocking pool.
    pub fn append_all(&self, records: Vec<ExecutionRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let _gate = self
            .gate
            .read()
            .map_err(|_| MediatorError::Persistence("history gate poisoned".to_string()))?;

        for record in &records {
            self.model
                .observe(&record.signature, &record.store, record.sample());
        }

        if let Some(persistence) = self.active_persistence() {
            match persistence.log.append_all(&records, self.limit) {
                Ok(()) => {
                    let unsaved = persistence.unsaved.fetch_add(records.len(), Ordering::SeqCst)
                        + records.len();
                    if unsaved >= PROFILE_SAVE_INTERVAL {
                        // A failed snapshot has already degraded the store
                        let _ = self.save_profiles(persistence);
                    }
                }
                Err(e) => self.degrade("append", &e),
            }
        }

        let mut retained = self.records()?;
        retained.extend(records);
        while retained.len() > self.limit {
            retained.pop_front();
        }
        Ok(())
    }

    fn save_profiles(&self, persistence: &Persistence) -> Result<()> {
        persistence.unsaved.store(0, Ordering::SeqCst);
        persistence
            .profiles
            .save_with(|| self.model.snapshot())
            .map_err(|e| {
                self.degrade("profile snapshot", &e);
                e
            })
    }

    /// Write `profiles.json` if records were appended since the last snapshot.
    pub fn flush(&self) -> Result<()> {
        let _gate = self
            .gate
            .read()
            .map_err(|_| MediatorError::Persistence("history gate poisoned".to_string()))?;

        match self.active_persistence() {
            Some(persistence) if persistence.unsaved.load(Ordering::SeqCst) > 0 => {
                self.save_profiles(persistence)
            }
            _ => Ok(()),
        }
    }

    /// Matching records, newest first.
    pub fn query(&self, filter: &HistoryFilter) -> Result<Vec<ExecutionRecord>> {
        let records = self.records()?;
        let matching = records
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(matching)
    }

    /// Aggregates over the records matching `filter` (its `limit` is ignored).
    pub fn stats(&self, filter: &HistoryFilter) -> Result<HistoryStats> {
        let records = self.records()?;
        let matching: Vec<&ExecutionRecord> = records.iter().filter(|r| filter.matches(r)).collect();

        let mut by_store: BTreeMap<String, Vec<&ExecutionRecord>> = BTreeMap::new();
        for record in matching.iter().copied() {
            by_store.entry(record.store.clone()).or_default().push(record);
        }

        Ok(HistoryStats {
            overall: StoreStats::from_records(matching.iter().copied()),
            per_store: by_store
                .into_iter()
                .map(|(store, records)| (store, StoreStats::from_records(records)))
                .collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty the log and the performance model as one step.
    pub fn clear(&self) -> Result<()> {
        let _gate = self
            .gate
            .write()
            .map_err(|_| MediatorError::Persistence("history gate poisoned".to_string()))?;

        self.records()?.clear();
        self.model.clear();

        if let Some(persistence) = self.active_persistence() {
            persistence.unsaved.store(0, Ordering::SeqCst);
            let cleared = persistence
                .log
                .clear()
                .and_then(|_| persistence.profiles.remove());
            if let Err(e) = cleared {
                self.degrade("clear", &e);
            }
        }

        info!("History and performance profiles cleared");
        Ok(())
    }
}

impl Drop for HistoryStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("Failed to save performance profiles on shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ExecutionMetrics, QueryResult};
    use crate::history::record::ExecutionOrigin;
    use crate::query::{Dialect, QuerySignature};
    use tempfile::TempDir;

    fn record(query: &str, store: &str, exec: f64, success: bool) -> ExecutionRecord {
        let result = QueryResult {
            store: store.to_string(),
            success,
            data: Vec::new(),
            row_count: 0,
            error: (!success).then(|| "boom".to_string()),
            metrics: ExecutionMetrics {
                execution_time_ms: exec,
                latency_ms: exec * 0.3,
                latency_estimated: true,
                cpu_time_ms: 0.0,
                memory_used_bytes: 0.0,
            },
            executed_query: query.to_string(),
            dialect: Dialect::Relational,
            converted_query: None,
            unavailable: false,
        };
        ExecutionRecord::from_result(query, &result, ExecutionOrigin::Routed)
    }

    fn model() -> Arc<PerformanceModel> {
        Arc::new(PerformanceModel::new(100, 50))
    }

    #[test]
    fn test_append_feeds_model_once() {
        let history = HistoryStore::in_memory(model(), 10);
        history.append(record("SELECT * FROM a", "postgres", 5.0, true)).unwrap();

        let sig = QuerySignature::of("SELECT * FROM a");
        assert_eq!(history.len(), 1);
        assert_eq!(history.model().sample_count(&sig), 1);
        assert!(!history.is_persistent());
    }

    #[test]
    fn test_retention_limit() {
        let history = HistoryStore::in_memory(model(), 3);
        for i in 0..5 {
            history.append(record(&format!("GET k{}", i), "redis", 1.0, true)).unwrap();
        }
        let all = history.query(&HistoryFilter::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].query_text, "GET k4");
        assert_eq!(all[2].query_text, "GET k2");
    }

    #[test]
    fn test_filters_and_stats() {
        let history = HistoryStore::in_memory(model(), 100);
        history.append(record("SELECT * FROM Accounts", "postgres", 10.0, true)).unwrap();
        history.append(record("SELECT * FROM accounts", "postgres", 20.0, true)).unwrap();
        history.append(record("SELECT * FROM accounts", "postgres", 0.0, false)).unwrap();
        history.append(record("GET account:ACC001", "redis", 1.0, true)).unwrap();

        let hits = history.query(&HistoryFilter::default().contains("FROM ACCOUNTS")).unwrap();
        assert_eq!(hits.len(), 3);
        let redis = history.query(&HistoryFilter::default().store("redis")).unwrap();
        assert_eq!(redis.len(), 1);
        let future = Utc::now() + chrono::Duration::hours(1);
        assert!(history.query(&HistoryFilter::default().since(future)).unwrap().is_empty());
        assert_eq!(history.query(&HistoryFilter::default().limit(2)).unwrap().len(), 2);

        let stats = history.stats(&HistoryFilter::default()).unwrap();
        assert_eq!(stats.overall.count, 4);
        let pg = &stats.per_store["postgres"];
        assert_eq!(pg.count, 3);
        assert_eq!(pg.avg_execution_time_ms, 15.0);
        assert_eq!(pg.min_execution_time_ms, 10.0);
        assert_eq!(pg.max_execution_time_ms, 20.0);
        assert!((pg.success_rate - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_clear_resets_log_and_model() {
        let history = HistoryStore::in_memory(model(), 10);
        history.append(record("GET k", "redis", 1.0, true)).unwrap();
        history.clear().unwrap();
        assert!(history.is_empty());
        assert!(history.model().is_empty());
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let history = HistoryStore::open(dir.path(), model(), 10);
            assert!(history.is_persistent());
            history.append(record("GET k", "redis", 2.0, true)).unwrap();
            history.append(record("GET k", "redis", 4.0, true)).unwrap();
        }

        let reopened = HistoryStore::open(dir.path(), model(), 10);
        assert_eq!(reopened.len(), 2);
        let profile = reopened.model().profile(&QuerySignature::of("GET k"), "redis").unwrap();
        assert_eq!(profile.samples(), 2);
        assert_eq!(profile.aggregates.execution_time.mean, 3.0);
    }

    #[test]
    fn test_profiles_rebuilt_from_log_when_document_missing() {
        let dir = TempDir::new().unwrap();
        {
            let history = HistoryStore::open(dir.path(), model(), 10);
            history.append(record("GET k", "redis", 2.0, true)).unwrap();
        }
        std::fs::remove_file(dir.path().join("profiles.json")).unwrap();

        let reopened = HistoryStore::open(dir.path(), model(), 10);
        assert_eq!(reopened.model().sample_count(&QuerySignature::of("GET k")), 1);
    }

    #[test]
    fn test_profile_snapshot_is_batched() {
        let dir = TempDir::new().unwrap();
        let profiles = dir.path().join("profiles.json");
        let history = HistoryStore::open(dir.path(), model(), 1000);

        for i in 0..PROFILE_SAVE_INTERVAL - 1 {
            history.append(record(&format!("GET k{}", i), "redis", 1.0, true)).unwrap();
        }
        assert!(!profiles.exists());

        history.append(record("GET last", "redis", 1.0, true)).unwrap();
        assert!(profiles.exists());
    }

    #[test]
    fn test_stale_snapshot_catches_up_from_log() {
        let dir = TempDir::new().unwrap();
        let sig = QuerySignature::of("GET k");
        {
            let history = HistoryStore::open(dir.path(), model(), 1000);
            for _ in 0..PROFILE_SAVE_INTERVAL + 6 {
                history.append(record("GET k", "redis", 2.0, true)).unwrap();
            }
            // No shutdown snapshot: the last records live only in the log
            std::mem::forget(history);
        }

        let stale = ProfileFile::new(dir.path()).load().unwrap();
        assert_eq!(stale[&sig]["redis"].samples(), PROFILE_SAVE_INTERVAL);

        let reopened = HistoryStore::open(dir.path(), model(), 1000);
        assert_eq!(reopened.model().sample_count(&sig), PROFILE_SAVE_INTERVAL + 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_clear_is_atomic_with_concurrent_appends() {
        let dir = TempDir::new().unwrap();
        let wide_model = || Arc::new(PerformanceModel::new(1000, 50));
        let history = Arc::new(HistoryStore::open(dir.path(), wide_model(), 10_000));

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let history = Arc::clone(&history);
                tokio::task::spawn_blocking(move || {
                    for i in 0..50 {
                        history
                            .append(record(&format!("GET k{}", w), "redis", i as f64, true))
                            .unwrap();
                    }
                })
            })
            .collect();
        for _ in 0..10 {
            history.clear().unwrap();
            tokio::task::yield_now().await;
        }
        for writer in writers {
            writer.await.unwrap();
        }

        let agree = |history: &HistoryStore| {
            let records = history.query(&HistoryFilter::default()).unwrap();
            for w in 0..4 {
                let sig = QuerySignature::of(&format!("GET k{}", w));
                let logged = records.iter().filter(|r| r.signature == sig).count();
                assert_eq!(history.model().sample_count(&sig), logged);
            }
            records.len()
        };
        let retained = agree(&history);
        assert!(history.is_persistent());

        drop(history);
        let reopened = HistoryStore::open(dir.path(), wide_model(), 10_000);
        assert_eq!(agree(&reopened), retained);
    }

    #[test]
    fn test_unusable_directory_degrades() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();

        let history = HistoryStore::open(&file, model(), 10);
        assert!(history.is_degraded());
        history.append(record("GET k", "redis", 1.0, true)).unwrap();
        assert_eq!(history.len(), 1);
    }
}
