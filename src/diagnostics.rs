// 🩺 Diagnostics - secondary channel for everything that did not make it into the script
//
// Cycles, dropped edges, truncations and skipped records are collected here and
// logged through `tracing`. They are never written into the command stream.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::entities::RelationshipKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning, // Data was dropped or a conflict was resolved by policy
    Info,    // Expected termination or bounded output
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Next parent was already visited in this walk
    CycleDetected {
        start: String,
        last: String,
        repeated: String,
        chain_len: usize,
    },

    /// Walk ended because a lookup failed or returned nothing
    FetchFailed { identifier: String, error: String },

    /// Walk ended on the depth guard, not on an apex
    DepthLimitReached { start: String, max_depth: usize },

    /// Listing stopped on the page guard while more pages were announced
    PageLimitReached { scope: String, listing: String, max_pages: usize },

    /// Edge with an endpoint absent from the entity set
    DanglingRelationship {
        child: String,
        parent: String,
        kind: RelationshipKind,
    },

    SelfLoop { identifier: String, kind: RelationshipKind },

    /// Same identifier, different scalar value
    AttributeConflict {
        identifier: String,
        field: String,
        kept: String,
        discarded: String,
    },

    ShareClassTruncated {
        fund: String,
        kept: usize,
        omitted: usize,
    },

    /// Share class whose foreign key names no fund
    OrphanShareClass { isin: String, fund: String },

    /// Umbrella created from a sub-fund's reference only
    PlaceholderUmbrella { identifier: String, name: String },

    MalformedRecord { source: String, reason: String },
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        match self {
            Diagnostic::FetchFailed { .. }
            | Diagnostic::DanglingRelationship { .. }
            | Diagnostic::SelfLoop { .. }
            | Diagnostic::AttributeConflict { .. }
            | Diagnostic::OrphanShareClass { .. }
            | Diagnostic::MalformedRecord { .. }
            | Diagnostic::CycleDetected { .. }
            | Diagnostic::DepthLimitReached { .. } => Severity::Warning,
            Diagnostic::PageLimitReached { .. }
            | Diagnostic::ShareClassTruncated { .. }
            | Diagnostic::PlaceholderUmbrella { .. } => Severity::Info,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Diagnostic::CycleDetected {
                start,
                last,
                repeated,
                chain_len,
            } => format!(
                "ownership cycle from {}: {} points back to {} after {} entities",
                start, last, repeated, chain_len
            ),
            Diagnostic::FetchFailed { identifier, error } => {
                format!("lookup of {} failed: {}", identifier, error)
            }
            Diagnostic::DepthLimitReached { start, max_depth } => format!(
                "ownership walk from {} stopped at depth guard {}",
                start, max_depth
            ),
            Diagnostic::PageLimitReached {
                scope,
                listing,
                max_pages,
            } => format!(
                "{} listing for {} stopped after {} pages",
                listing, scope, max_pages
            ),
            Diagnostic::DanglingRelationship {
                child,
                parent,
                kind,
            } => format!(
                "dropped {} edge {} -> {}: endpoint not in entity set",
                kind.as_str(),
                child,
                parent
            ),
            Diagnostic::SelfLoop { identifier, kind } => {
                format!("dropped {} self-loop on {}", kind.as_str(), identifier)
            }
            Diagnostic::AttributeConflict {
                identifier,
                field,
                kept,
                discarded,
            } => format!(
                "{}: conflicting {} - kept {:?}, discarded {:?}",
                identifier, field, kept, discarded
            ),
            Diagnostic::ShareClassTruncated {
                fund,
                kept,
                omitted,
            } => format!(
                "{}: kept {} share classes, omitted {}",
                fund, kept, omitted
            ),
            Diagnostic::OrphanShareClass { isin, fund } => {
                format!("share class {} references unknown fund {}", isin, fund)
            }
            Diagnostic::PlaceholderUmbrella { identifier, name } => {
                format!("placeholder umbrella {} ({})", identifier, name)
            }
            Diagnostic::MalformedRecord { source, reason } => {
                format!("skipped malformed {} record: {}", source, reason)
            }
        }
    }
}

/// Append-only diagnostic log for one compile run
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity() {
            Severity::Warning => warn!(kind = diagnostic_kind(&diagnostic), "{}", diagnostic.message()),
            Severity::Info => info!(kind = diagnostic_kind(&diagnostic), "{}", diagnostic.message()),
        }
        self.entries.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        // already logged when first pushed
        self.entries.extend(other.entries);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn warning_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|d| d.severity() == Severity::Warning)
            .count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }
}

fn diagnostic_kind(diagnostic: &Diagnostic) -> &'static str {
    match diagnostic {
        Diagnostic::CycleDetected { .. } => "cycle",
        Diagnostic::FetchFailed { .. } => "fetch_failed",
        Diagnostic::DepthLimitReached { .. } => "depth_limit",
        Diagnostic::PageLimitReached { .. } => "page_limit",
        Diagnostic::DanglingRelationship { .. } => "dangling_relationship",
        Diagnostic::SelfLoop { .. } => "self_loop",
        Diagnostic::AttributeConflict { .. } => "attribute_conflict",
        Diagnostic::ShareClassTruncated { .. } => "share_class_truncated",
        Diagnostic::OrphanShareClass { .. } => "orphan_share_class",
        Diagnostic::PlaceholderUmbrella { .. } => "placeholder_umbrella",
        Diagnostic::MalformedRecord { .. } => "malformed_record",
    }
}
