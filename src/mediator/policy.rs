//! Selection Policy - picks the one store a query is routed to
//!
//! The decision is a pure function of the located candidates, the learned
//! profiles and the static configuration, so identical inputs always produce
//! the same store.
//!
//! Order of preference among several located candidates:
//! 1. the learned recommendation, if trusted and among the candidates
//! 2. the highest learned score, or static prior for stores without a profile
//! 3. key-value > relational > document
//! 4. registration order

use crate::config::{DefaultStores, PriorScores};
use crate::error::Result;
use crate::execution::Candidate;
use crate::learning::{PerformanceModel, Prediction};
use crate::query::{translate_to_document, Dialect, QuerySignature};
use crate::store::StoreRegistry;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Where a signature stands in the learning lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionState {
    /// No samples yet
    NoHistory,
    /// Samples exist but confidence is below the threshold
    Exploring,
    /// Confidence at or above the threshold
    Exploiting,
    /// Caller named the store
    ForcedTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectionReason {
    /// No candidate reported the data; fell back to the dialect's default store
    DefaultStore,
    /// Exactly one candidate reported the data
    OnlyCandidate,
    /// Trusted learned recommendation
    Learned { confidence: f64, samples: usize },
    /// Highest learned score or prior among the candidates
    Scored,
    Forced,
}

/// Outcome of store selection for one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub store: String,
    /// Text to run on `store`, in its dialect
    pub query: String,
    pub dialect: Dialect,
    pub translated: bool,
    pub state: SelectionState,
    pub reason: SelectionReason,
    /// Scores considered for the candidates (learned or prior)
    pub scores: BTreeMap<String, f64>,
    /// Candidates that reported holding the data
    pub located: Vec<String>,
    /// Recommendation confidence for the signature, percent
    pub confidence: f64,
}

impl Selection {
    /// Human-readable explanation of the choice.
    pub fn explanation(&self, total_samples: usize) -> String {
        let history = if self.state == SelectionState::Exploiting {
            format!("Based on {} historical executions", total_samples)
        } else {
            "Not enough historical data".to_string()
        };
        let why = match &self.reason {
            SelectionReason::DefaultStore => "no store reported the data, using the default store".to_string(),
            SelectionReason::OnlyCandidate => "only store holding the data".to_string(),
            SelectionReason::Learned { confidence, samples } => format!(
                "fastest learned store ({:.0}% confidence over {} samples)",
                confidence, samples
            ),
            SelectionReason::Scored => "highest score among stores holding the data".to_string(),
            SelectionReason::Forced => "store requested explicitly".to_string(),
        };
        format!("{}; {}: {}", history, self.store, why)
    }
}

/// Fixed preference used when scores tie; lower ranks first.
fn dialect_rank(dialect: Dialect) -> u8 {
    match dialect {
        Dialect::KeyValue => 0,
        Dialect::Relational => 1,
        Dialect::Document => 2,
    }
}

#[derive(Debug, Clone)]
pub struct SelectionPolicy {
    confidence_threshold: f64,
    priors: PriorScores,
    defaults: DefaultStores,
    translate_for_routing: bool,
}

impl SelectionPolicy {
    pub fn new(
        confidence_threshold: f64,
        priors: PriorScores,
        defaults: DefaultStores,
        translate_for_routing: bool,
    ) -> Self {
        Self {
            confidence_threshold,
            priors,
            defaults,
            translate_for_routing,
        }
    }

    pub fn state(&self, prediction: Option<&Prediction>) -> SelectionState {
        match prediction {
            None => SelectionState::NoHistory,
            Some(p) if p.confidence >= self.confidence_threshold => SelectionState::Exploiting,
            Some(_) => SelectionState::Exploring,
        }
    }

    /// Stores able to run `query`: those natively serving its dialect, plus
    /// document stores carrying the translation of a relational query.
    pub fn candidates(&self, registry: &StoreRegistry, query: &str, dialect: Dialect) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = registry
            .serving(dialect)
            .into_iter()
            .map(|store| Candidate {
                store,
                query: query.to_string(),
                dialect,
                translated: false,
            })
            .collect();

        if dialect == Dialect::Relational && self.translate_for_routing {
            let translated = translate_to_document(query);
            if translated != query {
                for store in registry.serving(Dialect::Document) {
                    if candidates.iter().any(|c| c.name() == store.name()) {
                        continue;
                    }
                    candidates.push(Candidate {
                        store,
                        query: translated.clone(),
                        dialect: Dialect::Document,
                        translated: true,
                    });
                }
            }
        }

        candidates.sort_by_key(|c| registry.position(c.name()));
        debug!(
            "{} candidate store(s) for {} query: [{}]",
            candidates.len(),
            dialect,
            candidates.iter().map(Candidate::name).collect::<Vec<_>>().join(", ")
        );
        candidates
    }

    /// Score of one candidate: learned when profiled, prior otherwise.
    fn candidate_score(&self, model: &PerformanceModel, signature: &QuerySignature, candidate: &Candidate) -> f64 {
        model
            .profile(signature, candidate.name())
            .map(|p| p.score)
            .unwrap_or_else(|| self.priors.for_dialect(candidate.store.descriptor().primary_dialect()))
    }

    /// Choose one store for `query` among the located candidates.
    pub fn select(
        &self,
        registry: &StoreRegistry,
        model: &PerformanceModel,
        query: &str,
        dialect: Dialect,
        located: &[Candidate],
    ) -> Result<Selection> {
        let signature = QuerySignature::of(query);
        let prediction = model.predict(&signature);
        let state = self.state(prediction.as_ref());
        let confidence = prediction.as_ref().map_or(0.0, |p| p.confidence);
        let located_names: Vec<String> = located.iter().map(|c| c.name().to_string()).collect();

        let selection = |candidate: &Candidate, reason: SelectionReason, scores: BTreeMap<String, f64>| Selection {
            store: candidate.name().to_string(),
            query: candidate.query.clone(),
            dialect: candidate.dialect,
            translated: candidate.translated,
            state,
            reason,
            scores,
            located: located_names.clone(),
            confidence,
        };

        let chosen = match located {
            [] => {
                let store = registry.default_for(dialect, self.defaults.for_dialect(dialect))?;
                let fallback = self
                    .candidates(registry, query, dialect)
                    .into_iter()
                    .find(|c| c.name() == store.name())
                    .unwrap_or(Candidate {
                        dialect: store.descriptor().primary_dialect(),
                        store,
                        query: query.to_string(),
                        translated: false,
                    });
                selection(&fallback, SelectionReason::DefaultStore, BTreeMap::new())
            }
            [only] => selection(only, SelectionReason::OnlyCandidate, BTreeMap::new()),
            several => {
                let scores: BTreeMap<String, f64> = several
                    .iter()
                    .map(|c| (c.name().to_string(), self.candidate_score(model, &signature, c)))
                    .collect();

                let trusted = prediction
                    .as_ref()
                    .filter(|_| state == SelectionState::Exploiting)
                    .and_then(|p| several.iter().find(|c| c.name() == p.recommended_store).map(|c| (c, p)));

                match trusted {
                    Some((candidate, p)) => selection(
                        candidate,
                        SelectionReason::Learned {
                            confidence: p.confidence,
                            samples: p.samples,
                        },
                        scores,
                    ),
                    None => {
                        let best = several
                            .iter()
                            .min_by(|a, b| {
                                let score = |c: &Candidate| scores.get(c.name()).copied().unwrap_or(0.0);
                                score(b)
                                    .partial_cmp(&score(a))
                                    .unwrap_or(Ordering::Equal)
                                    .then_with(|| {
                                        dialect_rank(a.store.descriptor().primary_dialect())
                                            .cmp(&dialect_rank(b.store.descriptor().primary_dialect()))
                                    })
                                    .then_with(|| registry.position(a.name()).cmp(&registry.position(b.name())))
                            })
                            .unwrap_or(&several[0]);
                        selection(best, SelectionReason::Scored, scores)
                    }
                }
            }
        };

        info!(
            "Selected '{}' for {} ({:?}, {:?}, {} located)",
            chosen.store,
            signature,
            chosen.state,
            chosen.reason,
            chosen.located.len()
        );
        Ok(chosen)
    }

    /// Selection for a caller-named store. The store must be registered.
    pub fn forced(
        &self,
        registry: &StoreRegistry,
        query: &str,
        dialect: Dialect,
        store_name: &str,
    ) -> Result<Selection> {
        let store = registry.get(store_name)?;
        let candidate = self
            .candidates(registry, query, dialect)
            .into_iter()
            .find(|c| c.name() == store_name)
            .unwrap_or(Candidate {
                dialect: store.descriptor().primary_dialect(),
                store,
                query: query.to_string(),
                translated: false,
            });

        Ok(Selection {
            store: store_name.to_string(),
            query: candidate.query,
            dialect: candidate.dialect,
            translated: candidate.translated,
            state: SelectionState::ForcedTarget,
            reason: SelectionReason::Forced,
            scores: BTreeMap::new(),
            located: Vec::new(),
            confidence: 0.0,
        })
    }
}
