//! Performance Model - per-signature, per-store learned execution profiles
//!
//! Updates to one (signature, store) pair are serialized by the map shard
//! holding it; independent pairs update in parallel.

use crate::learning::profile::{MetricSample, PerformanceProfile};
use crate::query::QuerySignature;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProfileKey {
    signature: QuerySignature,
    store: String,
}

/// Recommendation derived from the current profiles of one signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub signature: QuerySignature,
    pub recommended_store: String,
    /// Percentage, `[0, 100]`
    pub confidence: f64,
    pub expected_execution_time_ms: f64,
    pub per_store_scores: BTreeMap<String, f64>,
    /// Samples behind the recommended store's profile
    pub samples: usize,
}

/// Persisted form: signature → store → profile
pub type ProfileDocument = BTreeMap<QuerySignature, BTreeMap<String, PerformanceProfile>>;

pub struct PerformanceModel {
    profiles: DashMap<ProfileKey, PerformanceProfile>,
    stores_by_signature: DashMap<QuerySignature, BTreeSet<String>>,
    window_capacity: usize,
    confidence_saturation: usize,
}

impl PerformanceModel {
    pub fn new(window_capacity: usize, confidence_saturation: usize) -> Self {
        Self {
            profiles: DashMap::new(),
            stores_by_signature: DashMap::new(),
            window_capacity,
            confidence_saturation,
        }
    }

    /// Fold one sample into the (signature, store) profile, creating it on first sight.
    pub fn observe(&self, signature: &QuerySignature, store: &str, sample: MetricSample) {
        let key = ProfileKey {
            signature: signature.clone(),
            store: store.to_string(),
        };

        {
            let mut profile = self
                .profiles
                .entry(key)
                .or_insert_with(|| PerformanceProfile::new(store, self.window_capacity));
            profile.observe(sample, self.confidence_saturation);
            debug!(
                "Profile {}/{} now {} samples, score {:.4}",
                signature,
                store,
                profile.samples(),
                profile.score
            );
        }

        self.stores_by_signature
            .entry(signature.clone())
            .or_default()
            .insert(store.to_string());
    }

    pub fn profile(&self, signature: &QuerySignature, store: &str) -> Option<PerformanceProfile> {
        let key = ProfileKey {
            signature: signature.clone(),
            store: store.to_string(),
        };
        self.profiles.get(&key).map(|p| p.clone())
    }

    /// Timestamp of the newest sample held for (signature, store).
    pub fn latest_sample_at(&self, signature: &QuerySignature, store: &str) -> Option<DateTime<Utc>> {
        let key = ProfileKey {
            signature: signature.clone(),
            store: store.to_string(),
        };
        self.profiles.get(&key).and_then(|p| p.latest_sample_at())
    }

    /// All profiles recorded for a signature, ordered by store name.
    pub fn profiles_for(&self, signature: &QuerySignature) -> Vec<PerformanceProfile> {
        let stores: Vec<String> = self
            .stores_by_signature
            .get(signature)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();

        stores
            .iter()
            .filter_map(|store| self.profile(signature, store))
            .collect()
    }

    /// Learned score of each store that has a profile for the signature.
    pub fn scores(&self, signature: &QuerySignature) -> BTreeMap<String, f64> {
        self.profiles_for(signature)
            .into_iter()
            .map(|p| (p.store, p.score))
            .collect()
    }

    pub fn sample_count(&self, signature: &QuerySignature) -> usize {
        self.profiles_for(signature).iter().map(|p| p.samples()).sum()
    }

    /// Best-scoring store for the signature, or `None` without history.
    ///
    /// Score ties go to the store with more samples, then to the lower name.
    pub fn predict(&self, signature: &QuerySignature) -> Option<Prediction> {
        let profiles = self.profiles_for(signature);

        let best = profiles.iter().max_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(Ordering::Equal)
                .then(a.samples().cmp(&b.samples()))
                .then(b.store.cmp(&a.store))
        })?;

        Some(Prediction {
            signature: signature.clone(),
            recommended_store: best.store.clone(),
            confidence: best.confidence,
            expected_execution_time_ms: best.aggregates.execution_time.mean,
            per_store_scores: profiles.iter().map(|p| (p.store.clone(), p.score)).collect(),
            samples: best.samples(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn clear(&self) {
        self.profiles.clear();
        self.stores_by_signature.clear();
    }

    pub fn snapshot(&self) -> ProfileDocument {
        let mut document = ProfileDocument::new();
        for entry in self.profiles.iter() {
            document
                .entry(entry.key().signature.clone())
                .or_default()
                .insert(entry.key().store.clone(), entry.value().clone());
        }
        document
    }

    /// Replace the model's state with a persisted document. Windows are
    /// re-capped and aggregates recomputed so they always match the window.
    pub fn restore(&self, document: ProfileDocument) {
        self.clear();
        for (signature, stores) in document {
            for (store, mut profile) in stores {
                profile.store = store.clone();
                profile.window.resize(self.window_capacity);
                profile.recompute(self.confidence_saturation);

                self.stores_by_signature
                    .entry(signature.clone())
                    .or_default()
                    .insert(store.clone());
                self.profiles.insert(
                    ProfileKey {
                        signature: signature.clone(),
                        store,
                    },
                    profile,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample(exec: f64) -> MetricSample {
        MetricSample {
            execution_time_ms: exec,
            latency_ms: exec * 0.3,
            cpu_time_ms: exec * 0.6,
            memory_used_bytes: 0.0,
            success: true,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_predict_prefers_faster_store() {
        let model = PerformanceModel::new(100, 50);
        let sig = QuerySignature::of("SELECT * FROM accounts");
        assert!(model.predict(&sig).is_none());

        for _ in 0..5 {
            model.observe(&sig, "postgres", sample(20.0));
            model.observe(&sig, "redis", sample(2.0));
        }

        let prediction = model.predict(&sig).unwrap();
        assert_eq!(prediction.recommended_store, "redis");
        assert_eq!(prediction.samples, 5);
        assert_eq!(prediction.confidence, 10.0);
        assert_eq!(prediction.expected_execution_time_ms, 2.0);
        assert_eq!(prediction.per_store_scores.len(), 2);
        assert_eq!(model.sample_count(&sig), 10);
    }

    #[test]
    fn test_predict_is_deterministic_on_ties() {
        let model = PerformanceModel::new(100, 50);
        let sig = QuerySignature::of("q");
        model.observe(&sig, "b", sample(5.0));
        model.observe(&sig, "a", sample(5.0));
        for _ in 0..10 {
            assert_eq!(model.predict(&sig).unwrap().recommended_store, "a");
        }
    }

    #[test]
    fn test_snapshot_restore() {
        let model = PerformanceModel::new(100, 50);
        let sig = QuerySignature::of("GET account:ACC001");
        for i in 0..30 {
            model.observe(&sig, "redis", sample(i as f64));
        }

        let restored = PerformanceModel::new(10, 50);
        restored.restore(model.snapshot());
        let profile = restored.profile(&sig, "redis").unwrap();
        assert_eq!(profile.samples(), 10);
        assert_eq!(profile.aggregates.execution_time.min, 20.0);
        assert_eq!(profile.confidence, 20.0);
    }

    #[test]
    fn test_clear() {
        let model = PerformanceModel::new(100, 50);
        let sig = QuerySignature::of("q");
        model.observe(&sig, "a", sample(1.0));
        model.clear();
        assert!(model.is_empty());
        assert!(model.predict(&sig).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_not_lost() {
        let model = Arc::new(PerformanceModel::new(1000, 50));
        let sig = QuerySignature::of("SELECT * FROM t");

        let mut tasks = tokio::task::JoinSet::new();
        for worker in 0..8 {
            let model = model.clone();
            let sig = sig.clone();
            tasks.spawn(async move {
                let store = if worker % 2 == 0 { "even" } else { "odd" };
                for _ in 0..50 {
                    model.observe(&sig, store, sample(1.0));
                }
            });
        }
        while tasks.join_next().await.is_some() {}

        assert_eq!(model.profile(&sig, "even").unwrap().samples(), 200);
        assert_eq!(model.profile(&sig, "odd").unwrap().samples(), 200);
    }
}
