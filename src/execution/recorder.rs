//! Metrics Recorder - measures the cost of one store invocation
//!
//! Wall-clock time is taken from a monotonic clock. CPU time is the delta of
//! the whole process' user + system time, so concurrent calls inflate each
//! other's readings. Latency is not observable from inside a driver call and is
//! estimated as a fixed share of execution time.

use crate::error::MediatorError;
use crate::learning::MetricSample;
use crate::store::{DataStore, StoreResponse};
use chrono::{DateTime, Utc};
use cpu_time::ProcessTime;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use sysinfo::System;
use tracing::{debug, warn};

pub const DEFAULT_LATENCY_RATIO: f64 = 0.3;
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionMetrics {
    pub execution_time_ms: f64,
    pub latency_ms: f64,
    /// Latency derived from execution time rather than measured
    pub latency_estimated: bool,
    pub cpu_time_ms: f64,
    /// Resident-memory delta across the call; may be negative
    pub memory_used_bytes: f64,
}

impl ExecutionMetrics {
    pub fn to_sample(&self, success: bool, timestamp: DateTime<Utc>) -> MetricSample {
        MetricSample {
            execution_time_ms: self.execution_time_ms,
            latency_ms: self.latency_ms,
            cpu_time_ms: self.cpu_time_ms,
            memory_used_bytes: self.memory_used_bytes,
            success,
            timestamp,
        }
    }
}

/// Store response with the cost of producing it
#[derive(Debug, Clone)]
pub struct Measurement {
    pub response: StoreResponse,
    pub metrics: ExecutionMetrics,
    /// The store could not be reached (offline, connection lost, timed out)
    pub unavailable: bool,
}

impl Measurement {
    pub fn failed(error: &MediatorError) -> Self {
        Self {
            response: StoreResponse::failed(error.to_string()),
            metrics: ExecutionMetrics::default(),
            unavailable: error.is_unavailability(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    latency_ratio: f64,
    timeout: Duration,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_RATIO, DEFAULT_STORE_TIMEOUT)
    }
}

impl MetricsRecorder {
    pub fn new(latency_ratio: f64, timeout: Duration) -> Self {
        Self {
            latency_ratio,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `query` on `store`, bounded by the store timeout.
    ///
    /// Never fails: store errors and timeouts come back as an unsuccessful
    /// response with zeroed metrics and the original error message.
    pub async fn measure(&self, store: &dyn DataStore, query: &str) -> Measurement {
        let memory_before = resident_memory_bytes();
        let cpu_started = ProcessTime::try_now().ok();
        let started = Instant::now();

        let outcome = tokio::time::timeout(self.timeout, store.execute_query(query)).await;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let cpu_time_ms = cpu_elapsed_ms(cpu_started);
        let memory_used_bytes = resident_memory_bytes() - memory_before;

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("Store '{}' failed: {}", store.name(), e);
                return Measurement::failed(&e);
            }
            Err(_) => {
                let e = MediatorError::Timeout {
                    store: store.name().to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                };
                warn!("{}", e);
                return Measurement::failed(&e);
            }
        };

        if !response.success {
            debug!(
                "Store '{}' rejected query: {}",
                store.name(),
                response.error.as_deref().unwrap_or("unknown error")
            );
            return Measurement {
                response,
                metrics: ExecutionMetrics::default(),
                unavailable: false,
            };
        }

        Measurement {
            response,
            metrics: ExecutionMetrics {
                execution_time_ms: elapsed_ms,
                latency_ms: elapsed_ms * self.latency_ratio,
                latency_estimated: true,
                cpu_time_ms,
                memory_used_bytes,
            },
            unavailable: false,
        }
    }
}

/// Process CPU time spent since `started`; 0 where the platform offers no counter.
fn cpu_elapsed_ms(started: Option<ProcessTime>) -> f64 {
    match started {
        Some(t) => t.elapsed().as_secs_f64() * 1000.0,
        None => {
            debug!("Process CPU time unavailable on this platform");
            0.0
        }
    }
}

fn resident_memory_bytes() -> f64 {
    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0.0;
    };
    let mut system = System::new();
    if !system.refresh_process(pid) {
        return 0.0;
    }
    system.process(pid).map_or(0.0, |p| p.memory() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryKeyValueStore, MemoryRelationalStore};
    use serde_json::json;

    #[tokio::test]
    async fn test_measure_success() {
        let store = MemoryRelationalStore::new("postgres")
            .with_table("accounts", vec![json!({"id": 1})])
            .with_delay(Duration::from_millis(20));
        let recorder = MetricsRecorder::default();

        let m = recorder.measure(&store, "SELECT * FROM accounts").await;
        assert!(m.response.success);
        assert_eq!(m.response.data.len(), 1);
        assert!(m.metrics.execution_time_ms >= 20.0);
        assert!(m.metrics.latency_estimated);
        assert!((m.metrics.latency_ms - m.metrics.execution_time_ms * 0.3).abs() < 1e-9);
        assert!(m.metrics.cpu_time_ms >= 0.0);
    }

    #[test]
    fn test_cpu_time_counts_busy_work() {
        assert_eq!(cpu_elapsed_ms(None), 0.0);

        let started = ProcessTime::try_now().ok();
        let mut acc = 0u64;
        for i in 0..2_000_000u64 {
            acc = acc.wrapping_mul(31).wrapping_add(i);
        }
        std::hint::black_box(acc);
        assert!(cpu_elapsed_ms(started) > 0.0);
    }

    #[tokio::test]
    async fn test_timeout_yields_zeroed_metrics() {
        let store = MemoryKeyValueStore::new("redis").with_delay(Duration::from_millis(500));
        let recorder = MetricsRecorder::new(0.3, Duration::from_millis(20));

        let m = recorder.measure(&store, "GET k").await;
        assert!(!m.response.success);
        assert!(m.unavailable);
        assert_eq!(m.metrics, ExecutionMetrics::default());
        assert!(m.response.error.unwrap().contains("Timed out"));
    }

    #[tokio::test]
    async fn test_offline_store_error_is_captured() {
        let store = MemoryKeyValueStore::new("redis");
        store.set_online(false);

        let m = MetricsRecorder::default().measure(&store, "GET k").await;
        assert!(!m.response.success);
        assert!(m.unavailable);
        assert!(m.response.error.unwrap().contains("offline"));
    }

    #[tokio::test]
    async fn test_query_level_failure_is_not_unavailability() {
        let store = MemoryRelationalStore::new("postgres");
        let m = MetricsRecorder::default().measure(&store, "SELECT * FROM missing").await;
        assert!(!m.response.success);
        assert!(!m.unavailable);
        assert_eq!(m.metrics.execution_time_ms, 0.0);
    }
}
