//! Execution - locating data, running a query on a store, measuring it

pub mod locator;
pub mod recorder;
pub mod result;

pub use locator::{extract_identifier, Candidate, DataLocator};
pub use recorder::{ExecutionMetrics, Measurement, MetricsRecorder};
pub use result::QueryResult;
