pub mod config;
pub mod error;
pub mod execution;
pub mod history;
pub mod learning;
pub mod mediator;
pub mod query;
pub mod store;

pub use config::MediatorConfig;
pub use error::{MediatorError, Result};
pub use mediator::{ExecutionResponse, Mediator, Recommendation, Target};
