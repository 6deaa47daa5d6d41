//! Mediator configuration
//!
//! Defaults, overridden by `MEDIATOR_*` environment variables (a `.env` file
//! is honoured by the binary), overridden in turn by command-line flags.

use crate::error::{MediatorError, Result};
use crate::execution::recorder::{DEFAULT_LATENCY_RATIO, DEFAULT_STORE_TIMEOUT};
use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::learning::{DEFAULT_CONFIDENCE_SATURATION, DEFAULT_WINDOW_CAPACITY};
use crate::query::Dialect;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Recommendation confidence (percent) at which learned history is trusted
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 30.0;

/// Static per-dialect scores used before a store has any history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorScores {
    pub relational: f64,
    pub document: f64,
    pub key_value: f64,
}

impl Default for PriorScores {
    fn default() -> Self {
        Self {
            relational: 0.85,
            document: 0.75,
            key_value: 0.90,
        }
    }
}

impl PriorScores {
    pub fn for_dialect(&self, dialect: Dialect) -> f64 {
        match dialect {
            Dialect::Relational => self.relational,
            Dialect::Document => self.document,
            Dialect::KeyValue => self.key_value,
        }
    }
}

/// Store to fall back on when no candidate holds the data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultStores {
    pub relational: Option<String>,
    pub document: Option<String>,
    pub key_value: Option<String>,
}

impl DefaultStores {
    pub fn for_dialect(&self, dialect: Dialect) -> Option<&str> {
        match dialect {
            Dialect::Relational => self.relational.as_deref(),
            Dialect::Document => self.document.as_deref(),
            Dialect::KeyValue => self.key_value.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediatorConfig {
    /// Where the execution log and `profiles.json` live; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,

    /// Samples retained per (signature, store)
    pub window_capacity: usize,

    /// Execution records retained
    pub history_limit: usize,

    /// Percent, `[0, 100]`
    pub confidence_threshold: f64,

    /// Samples needed for 100 % confidence
    pub confidence_saturation: usize,

    pub store_timeout_ms: u64,

    /// Share of execution time reported as (estimated) latency
    pub latency_ratio: f64,

    /// Offer translated relational queries to document stores
    pub translate_for_routing: bool,

    /// While a signature is not yet trusted, run all present candidates and
    /// record every sample instead of only the selected store
    pub compare_while_exploring: bool,

    pub priors: PriorScores,

    pub default_stores: DefaultStores,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            history_limit: DEFAULT_HISTORY_LIMIT,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            confidence_saturation: DEFAULT_CONFIDENCE_SATURATION,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT.as_millis() as u64,
            latency_ratio: DEFAULT_LATENCY_RATIO,
            translate_for_routing: true,
            compare_while_exploring: false,
            priors: PriorScores::default(),
            default_stores: DefaultStores::default(),
        }
    }
}

fn parsed<T: FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>> {
    match raw {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| MediatorError::Config(format!("{}: cannot parse '{}'", key, value))),
    }
}

fn flag(key: &str, raw: Option<String>) -> Result<Option<bool>> {
    match raw.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(None),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(Some(true)),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(Some(false)),
        Some(v) => Err(MediatorError::Config(format!("{}: expected a boolean, got '{}'", key, v))),
    }
}

impl MediatorConfig {
    /// Defaults overridden by `MEDIATOR_*` process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `MEDIATOR_*` key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get("MEDIATOR_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }
        macro_rules! overlay {
            ($field:expr, $key:literal) => {
                if let Some(value) = parsed($key, get($key))? {
                    $field = value;
                }
            };
        }
        overlay!(config.window_capacity, "MEDIATOR_WINDOW_CAPACITY");
        overlay!(config.history_limit, "MEDIATOR_HISTORY_LIMIT");
        overlay!(config.confidence_threshold, "MEDIATOR_CONFIDENCE_THRESHOLD");
        overlay!(config.confidence_saturation, "MEDIATOR_CONFIDENCE_SATURATION");
        overlay!(config.store_timeout_ms, "MEDIATOR_STORE_TIMEOUT_MS");
        overlay!(config.latency_ratio, "MEDIATOR_LATENCY_RATIO");
        overlay!(config.priors.relational, "MEDIATOR_PRIOR_RELATIONAL");
        overlay!(config.priors.document, "MEDIATOR_PRIOR_DOCUMENT");
        overlay!(config.priors.key_value, "MEDIATOR_PRIOR_KEY_VALUE");

        if let Some(on) = flag("MEDIATOR_TRANSLATE_FOR_ROUTING", get("MEDIATOR_TRANSLATE_FOR_ROUTING"))? {
            config.translate_for_routing = on;
        }
        if let Some(on) = flag("MEDIATOR_COMPARE_WHILE_EXPLORING", get("MEDIATOR_COMPARE_WHILE_EXPLORING"))? {
            config.compare_while_exploring = on;
        }

        config.default_stores.relational = get("MEDIATOR_DEFAULT_RELATIONAL_STORE");
        config.default_stores.document = get("MEDIATOR_DEFAULT_DOCUMENT_STORE");
        config.default_stores.key_value = get("MEDIATOR_DEFAULT_KEY_VALUE_STORE");

        config.validate()?;
        Ok(config)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(MediatorError::Config(msg));

        if self.window_capacity == 0 {
            return invalid("window_capacity must be at least 1".to_string());
        }
        if self.history_limit == 0 {
            return invalid("history_limit must be at least 1".to_string());
        }
        if self.confidence_saturation == 0 {
            return invalid("confidence_saturation must be at least 1".to_string());
        }
        if !(0.0..=100.0).contains(&self.confidence_threshold) {
            return invalid(format!(
                "confidence_threshold must be within 0-100, got {}",
                self.confidence_threshold
            ));
        }
        if self.store_timeout_ms == 0 {
            return invalid("store_timeout_ms must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.latency_ratio) {
            return invalid(format!(
                "latency_ratio must be within 0-1, got {}",
                self.latency_ratio
            ));
        }
        for dialect in Dialect::ALL {
            let prior = self.priors.for_dialect(dialect);
            if !prior.is_finite() || prior < 0.0 {
                return invalid(format!("prior for {} must be a non-negative number", dialect));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = MediatorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.window_capacity, 100);
        assert_eq!(config.history_limit, 1000);
        assert_eq!(config.confidence_threshold, 30.0);
        assert_eq!(config.priors.for_dialect(Dialect::KeyValue), 0.90);
        assert!(config.translate_for_routing);
        assert!(!config.compare_while_exploring);
    }

    #[test]
    fn test_environment_overrides() {
        let config = MediatorConfig::from_lookup(lookup(&[
            ("MEDIATOR_DATA_DIR", "/tmp/mediator"),
            ("MEDIATOR_WINDOW_CAPACITY", "20"),
            ("MEDIATOR_CONFIDENCE_THRESHOLD", "55.5"),
            ("MEDIATOR_COMPARE_WHILE_EXPLORING", "yes"),
            ("MEDIATOR_DEFAULT_DOCUMENT_STORE", "mongo"),
            ("MEDIATOR_PRIOR_DOCUMENT", "0.95"),
            ("MEDIATOR_HISTORY_LIMIT", " "),
        ]))
        .unwrap();

        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/mediator")));
        assert_eq!(config.window_capacity, 20);
        assert_eq!(config.confidence_threshold, 55.5);
        assert!(config.compare_while_exploring);
        assert_eq!(config.default_stores.for_dialect(Dialect::Document), Some("mongo"));
        assert_eq!(config.priors.document, 0.95);
        assert_eq!(config.history_limit, 1000);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(MediatorConfig::from_lookup(lookup(&[("MEDIATOR_WINDOW_CAPACITY", "lots")])).is_err());
        assert!(MediatorConfig::from_lookup(lookup(&[("MEDIATOR_TRANSLATE_FOR_ROUTING", "maybe")])).is_err());
        assert!(MediatorConfig::from_lookup(lookup(&[("MEDIATOR_CONFIDENCE_THRESHOLD", "150")])).is_err());
        assert!(MediatorConfig::from_lookup(lookup(&[("MEDIATOR_WINDOW_CAPACITY", "0")])).is_err());
    }
}
