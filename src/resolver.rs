// 🧗 Ownership Chain Resolver - walk direct parents up to the apex
//
// Every step yields an explicit `StepOutcome`; the walk stops on the first
// terminal one. Lookups go through the caller's `LookupCache`.

use std::collections::HashSet;
use tracing::{debug, info};

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::entities::{Entity, Relationship};
use crate::error::FetchError;
use crate::normalizer::{normalize_identifier, normalize_registry_record, NormalizedEntity};
use crate::source::{LookupCache, RegistrySource};

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Parent exists, unvisited, depth guard not reached
    Walking { next: String },

    /// No direct-parent link: ordinary apex
    ApexNotFound,

    /// Registry says there is no parent to report
    ApexException { reason: String },

    /// Next parent already in this walk
    Cycle { repeated: String },

    /// Lookup errored, returned nothing or returned a malformed record
    FetchFailed { identifier: String, error: FetchError },

    DepthExceeded,
}

impl StepOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepOutcome::Walking { .. })
    }
}

/// How a resolved chain ended
#[derive(Debug, Clone, PartialEq)]
pub enum ChainTermination {
    Apex,
    ApexException { reason: String },
    Cycle { repeated: String },
    FetchFailed { identifier: String, error: FetchError },
    DepthExceeded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedChain {
    pub start: String,

    /// Start first, apex last
    pub entities: Vec<Entity>,

    /// Ownership edges between consecutive members
    pub relationships: Vec<Relationship>,

    pub termination: ChainTermination,
}

impl ResolvedChain {
    pub fn apex(&self) -> Option<&Entity> {
        self.entities.last()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn identifiers(&self) -> Vec<&str> {
        self.entities.iter().map(|e| e.identifier.as_str()).collect()
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

pub struct ChainResolver {
    /// Maximum entities appended by one walk
    pub max_depth: usize,
}

impl ChainResolver {
    pub fn new(max_depth: usize) -> Self {
        ChainResolver { max_depth }
    }

    /// Decide the next move after `current` was appended (`depth` entities so far)
    pub fn step(
        &self,
        current: &NormalizedEntity,
        visited: &HashSet<String>,
        depth: usize,
    ) -> StepOutcome {
        match &current.parent {
            Some(edge) if visited.contains(&edge.parent_identifier) => StepOutcome::Cycle {
                repeated: edge.parent_identifier.clone(),
            },
            Some(_) if depth >= self.max_depth => StepOutcome::DepthExceeded,
            Some(edge) => StepOutcome::Walking {
                next: edge.parent_identifier.clone(),
            },
            None => match &current.entity.terminus {
                Some(terminus) => StepOutcome::ApexException {
                    reason: terminus.reason.clone(),
                },
                None => StepOutcome::ApexNotFound,
            },
        }
    }

    pub fn resolve_chain<S: RegistrySource>(
        &self,
        source: &mut S,
        cache: &mut LookupCache,
        start_identifier: &str,
        diagnostics: &mut Diagnostics,
    ) -> ResolvedChain {
        let start = normalize_identifier(start_identifier);
        let mut visited: HashSet<String> = HashSet::new();
        let mut entities: Vec<Entity> = Vec::new();
        let mut relationships: Vec<Relationship> = Vec::new();
        let mut pending_edge: Option<Relationship> = None;
        let mut current = start.clone();

        let termination = loop {
            let fetched = match cache.get_or_fetch(source, &current) {
                Ok(Some(record)) => normalize_registry_record(&record).map_err(|e| {
                    FetchError::Malformed {
                        identifier: current.clone(),
                        reason: e.to_string(),
                    }
                }),
                Ok(None) => Err(FetchError::Status {
                    identifier: current.clone(),
                    status: 404,
                }),
                Err(e) => Err(e),
            };

            let normalized = match fetched {
                Ok(normalized) => normalized,
                Err(error) => {
                    let outcome = StepOutcome::FetchFailed {
                        identifier: current.clone(),
                        error,
                    };
                    break self.terminate(outcome, &start, &entities, diagnostics);
                }
            };

            debug!(identifier = %current, depth = entities.len(), "chain step");
            visited.insert(current.clone());
            // Edge is recorded only once the parent record is in hand
            if let Some(edge) = pending_edge.take() {
                relationships.push(edge);
            }
            entities.push(normalized.entity.clone());

            match self.step(&normalized, &visited, entities.len()) {
                StepOutcome::Walking { next } => {
                    pending_edge = normalized.parent;
                    current = next;
                }
                outcome => break self.terminate(outcome, &start, &entities, diagnostics),
            }
        };

        info!(
            start = %start,
            length = entities.len(),
            edges = relationships.len(),
            "ownership chain resolved"
        );

        ResolvedChain {
            start,
            entities,
            relationships,
            termination,
        }
    }

    fn terminate(
        &self,
        outcome: StepOutcome,
        start: &str,
        entities: &[Entity],
        diagnostics: &mut Diagnostics,
    ) -> ChainTermination {
        match outcome {
            StepOutcome::ApexNotFound | StepOutcome::Walking { .. } => ChainTermination::Apex,
            StepOutcome::ApexException { reason } => ChainTermination::ApexException { reason },
            StepOutcome::Cycle { repeated } => {
                diagnostics.push(Diagnostic::CycleDetected {
                    start: start.to_string(),
                    last: entities
                        .last()
                        .map(|e| e.identifier.clone())
                        .unwrap_or_default(),
                    repeated: repeated.clone(),
                    chain_len: entities.len(),
                });
                ChainTermination::Cycle { repeated }
            }
            StepOutcome::FetchFailed { identifier, error } => {
                diagnostics.push(Diagnostic::FetchFailed {
                    identifier: identifier.clone(),
                    error: error.to_string(),
                });
                ChainTermination::FetchFailed { identifier, error }
            }
            StepOutcome::DepthExceeded => {
                diagnostics.push(Diagnostic::DepthLimitReached {
                    start: start.to_string(),
                    max_depth: self.max_depth,
                });
                ChainTermination::DepthExceeded
            }
        }
    }
}

impl Default for ChainResolver {
    fn default() -> Self {
        Self::new(10)
    }
}

// ============================================================================
// TESTS
// ============================================================================
