//! Performance Profile - rolling statistics for one (signature, store) pair
//!
//! Scoring:
//!   score = success_rate · (0.4·1/(exec+1) + 0.3·1/(latency+1) + 0.2·1/(cpu+1) + 0.1·1/(σ_exec+1))
//! with means over the successful samples of the window. Higher is better.
//!
//! Confidence is sample-count saturation, `min(samples / saturation, 1) · 100`.

use crate::learning::window::{MetricAggregate, RollingWindow, DEFAULT_WINDOW_CAPACITY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Samples needed for full confidence
pub const DEFAULT_CONFIDENCE_SATURATION: usize = 50;

const EXECUTION_WEIGHT: f64 = 0.4;
const LATENCY_WEIGHT: f64 = 0.3;
const CPU_WEIGHT: f64 = 0.2;
const STABILITY_WEIGHT: f64 = 0.1;

/// One observation folded into a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub execution_time_ms: f64,
    pub latency_ms: f64,
    pub cpu_time_ms: f64,
    #[serde(default)]
    pub memory_used_bytes: f64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// Aggregates over the retained window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileAggregates {
    pub execution_time: MetricAggregate,
    pub latency: MetricAggregate,
    pub cpu_time: MetricAggregate,
    pub memory_used: MetricAggregate,
    pub samples: usize,
    pub successes: usize,
    pub success_rate: f64,
}

impl ProfileAggregates {
    fn from_window(window: &RollingWindow<MetricSample>) -> Self {
        let ok: Vec<&MetricSample> = window.iter().filter(|s| s.success).collect();
        let values = |f: fn(&MetricSample) -> f64| ok.iter().map(|s| f(s)).collect::<Vec<_>>();

        let samples = window.len();
        let successes = ok.len();

        Self {
            execution_time: MetricAggregate::from_values(&values(|s| s.execution_time_ms)),
            latency: MetricAggregate::from_values(&values(|s| s.latency_ms)),
            cpu_time: MetricAggregate::from_values(&values(|s| s.cpu_time_ms)),
            memory_used: MetricAggregate::from_values(&values(|s| s.memory_used_bytes)),
            samples,
            successes,
            success_rate: if samples == 0 {
                0.0
            } else {
                successes as f64 / samples as f64
            },
        }
    }
}

pub fn score(aggregates: &ProfileAggregates) -> f64 {
    if aggregates.successes == 0 {
        return 0.0;
    }

    let inverse = |v: f64| 1.0 / (v.max(0.0) + 1.0);
    let weighted = EXECUTION_WEIGHT * inverse(aggregates.execution_time.mean)
        + LATENCY_WEIGHT * inverse(aggregates.latency.mean)
        + CPU_WEIGHT * inverse(aggregates.cpu_time.mean)
        + STABILITY_WEIGHT * inverse(aggregates.execution_time.std_dev);

    aggregates.success_rate * weighted
}

/// Percentage in `[0, 100]`.
pub fn confidence(samples: usize, saturation: usize) -> f64 {
    let saturation = saturation.max(1) as f64;
    (samples as f64 / saturation).min(1.0) * 100.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceProfile {
    pub store: String,
    pub window: RollingWindow<MetricSample>,
    #[serde(default)]
    pub aggregates: ProfileAggregates,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub confidence: f64,
    pub updated_at: DateTime<Utc>,
}

impl PerformanceProfile {
    pub fn new(store: impl Into<String>, capacity: usize) -> Self {
        Self {
            store: store.into(),
            window: RollingWindow::new(capacity),
            aggregates: ProfileAggregates::default(),
            score: 0.0,
            confidence: 0.0,
            updated_at: Utc::now(),
        }
    }

    pub fn observe(&mut self, sample: MetricSample, saturation: usize) {
        self.updated_at = sample.timestamp;
        self.window.push(sample);
        self.recompute(saturation);
    }

    /// Rebuild aggregates, score and confidence from the window alone.
    pub fn recompute(&mut self, saturation: usize) {
        self.aggregates = ProfileAggregates::from_window(&self.window);
        self.score = score(&self.aggregates);
        self.confidence = confidence(self.window.len(), saturation);
    }

    pub fn samples(&self) -> usize {
        self.window.len()
    }

    /// Timestamp of the newest sample in the window.
    pub fn latest_sample_at(&self) -> Option<DateTime<Utc>> {
        self.window.iter().map(|s| s.timestamp).max()
    }
}

impl Default for PerformanceProfile {
    fn default() -> Self {
        Self::new(String::new(), DEFAULT_WINDOW_CAPACITY)
    }
}
