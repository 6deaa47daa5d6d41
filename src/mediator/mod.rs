//! Mediator - store selection and the orchestrating façade

pub mod mediator;
pub mod policy;

pub use mediator::{ExecutionResponse, Mediator, Recommendation, Target};
pub use policy::{Selection, SelectionPolicy, SelectionReason, SelectionState};
