use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediatorError {
    #[error("Translation unsupported: {0}")]
    TranslationUnsupported(String),

    #[error("Unknown store requested: {0}")]
    UnknownStore(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store execution error: {0}")]
    StoreExecution(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timed out after {timeout_ms}ms waiting for store '{store}'")]
    Timeout { store: String, timeout_ms: u64 },

    #[error("No store registered for dialect {0}")]
    NoStoreForDialect(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl MediatorError {
    /// Whether the failure means the store should be treated as absent for this call.
    pub fn is_unavailability(&self) -> bool {
        matches!(
            self,
            MediatorError::StoreUnavailable(_)
                | MediatorError::Connection(_)
                | MediatorError::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MediatorError>;
