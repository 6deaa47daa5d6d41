//! History - durable execution log and the statistics derived from it

pub mod profile_document;
pub mod record;
pub mod sqlite_log;
pub mod store;

pub use record::{ExecutionOrigin, ExecutionRecord, Outcome};
pub use store::{HistoryFilter, HistoryStats, HistoryStore, StoreStats, DEFAULT_HISTORY_LIMIT};
