//! Learning - per-signature, per-store performance profiles
//!
//! Every executed query contributes one `MetricSample` to the profile of its
//! (signature, store) pair. Profiles keep a bounded rolling window and derive
//! a score and a confidence from it; the model turns those into predictions.

pub mod model;
pub mod profile;
pub mod window;

pub use model::{PerformanceModel, Prediction, ProfileDocument};
pub use profile::{MetricSample, PerformanceProfile, ProfileAggregates, DEFAULT_CONFIDENCE_SATURATION};
pub use window::{MetricAggregate, RollingWindow, DEFAULT_WINDOW_CAPACITY};
