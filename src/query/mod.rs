//! Query analysis: dialect classification, relational → document translation,
//! and signatures for grouping recurring queries.

pub mod classifier;
pub mod signature;
pub mod translator;

pub use classifier::{classify, Dialect};
pub use signature::QuerySignature;
pub use translator::{translate_to_document, Comparator, Condition, Literal, SelectQuery};
