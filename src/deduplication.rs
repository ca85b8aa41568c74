// 🔍 Deduplication Engine - one entity per identifier
// The richer record always decides the kind; conflicting values follow one of
// three policies: First Seen, Last Seen, Richer Record

use serde::{Deserialize, Serialize};

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::entities::Entity;

/// Attribute marking an entity synthesized from a reference only
pub const PLACEHOLDER_ATTRIBUTE: &str = "placeholder";

// ============================================================================
// CONFLICT POLICY
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The value recorded first stays
    #[default]
    FirstSeen,

    /// A later record overwrites conflicting values
    LastSeen,

    /// The record with more populated fields wins (ties keep the first)
    Richer,
}

// ============================================================================
// DEDUPLICATION ENGINE
// ============================================================================

pub struct DeduplicationEngine {
    pub policy: ConflictPolicy,
}

impl DeduplicationEngine {
    pub fn new(policy: ConflictPolicy) -> Self {
        DeduplicationEngine { policy }
    }

    /// Fold `incoming` into `existing` (same identifier).
    ///
    /// The record with more populated fields wins the kind (ties keep the
    /// first). Gaps are always filled from the other record; genuinely
    /// different values are settled by the policy. Both kinds of conflict
    /// are reported as `AttributeConflict`.
    pub fn merge(&self, existing: &mut Entity, incoming: Entity, diagnostics: &mut Diagnostics) {
        // A real record always replaces a placeholder
        if is_placeholder(existing) && !is_placeholder(&incoming) {
            let mut incoming = incoming;
            fill_gaps(&mut incoming, existing);
            incoming.attributes.remove(PLACEHOLDER_ATTRIBUTE);
            *existing = incoming;
            return;
        }
        if is_placeholder(&incoming) {
            return;
        }

        let incoming_richer = incoming.populated_fields() > existing.populated_fields();
        let incoming_wins = match self.policy {
            ConflictPolicy::FirstSeen => false,
            ConflictPolicy::LastSeen => true,
            ConflictPolicy::Richer => incoming_richer,
        };

        let identifier = existing.identifier.clone();
        let (kind, discarded_kind) = if incoming_richer {
            (incoming.kind, existing.kind)
        } else {
            (existing.kind, incoming.kind)
        };
        let (winner, loser) = if incoming_wins {
            (incoming, existing.clone())
        } else {
            (existing.clone(), incoming)
        };

        if kind != discarded_kind {
            diagnostics.push(Diagnostic::AttributeConflict {
                identifier: identifier.clone(),
                field: "kind".to_string(),
                kept: kind.as_str().to_string(),
                discarded: discarded_kind.as_str().to_string(),
            });
        }
        for (field, kept, discarded) in conflicts(&winner, &loser) {
            diagnostics.push(Diagnostic::AttributeConflict {
                identifier: identifier.clone(),
                field,
                kept,
                discarded,
            });
        }

        let mut merged = winner;
        fill_gaps(&mut merged, &loser);
        merged.kind = kind;
        *existing = merged;
    }
}

impl Default for DeduplicationEngine {
    fn default() -> Self {
        Self::new(ConflictPolicy::default())
    }
}

pub fn is_placeholder(entity: &Entity) -> bool {
    entity.attribute(PLACEHOLDER_ATTRIBUTE) == Some("true")
}

/// Copy every field `target` lacks from `other`
fn fill_gaps(target: &mut Entity, other: &Entity) {
    if target.jurisdiction.is_none() {
        target.jurisdiction = other.jurisdiction.clone();
    }
    if target.terminus.is_none() {
        target.terminus = other.terminus.clone();
    }
    for (key, value) in &other.attributes {
        target
            .attributes
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
}

/// (field, kept, discarded) for every value both records populate differently
fn conflicts(winner: &Entity, loser: &Entity) -> Vec<(String, String, String)> {
    let mut found = Vec::new();

    if winner.display_name != loser.display_name {
        found.push((
            "display_name".to_string(),
            winner.display_name.clone(),
            loser.display_name.clone(),
        ));
    }
    if let (Some(kept), Some(discarded)) = (&winner.jurisdiction, &loser.jurisdiction) {
        if kept != discarded {
            found.push(("jurisdiction".to_string(), kept.clone(), discarded.clone()));
        }
    }
    if let (Some(kept), Some(discarded)) = (&winner.terminus, &loser.terminus) {
        if kept != discarded {
            found.push((
                "terminus".to_string(),
                kept.reason.clone(),
                discarded.reason.clone(),
            ));
        }
    }
    for (key, kept) in &winner.attributes {
        if let Some(discarded) = loser.attributes.get(key) {
            if kept != discarded {
                found.push((key.clone(), kept.clone(), discarded.clone()));
            }
        }
    }

    found
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EntityKind;

    fn entity(name: &str) -> Entity {
        Entity::new("LEI1", name, EntityKind::LegalEntity)
    }

    #[test]
    fn test_first_seen_keeps_existing_value() {
        let engine = DeduplicationEngine::new(ConflictPolicy::FirstSeen);
        let mut existing = entity("Allianz SE").with_jurisdiction("DE");
        let incoming = entity("ALLIANZ SE").with_attribute("city", "Munich");
        let mut diagnostics = Diagnostics::new();

        engine.merge(&mut existing, incoming, &mut diagnostics);

        assert_eq!(existing.display_name, "Allianz SE");
        assert_eq!(existing.jurisdiction.as_deref(), Some("DE"));
        assert_eq!(existing.attribute("city"), Some("Munich"));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics.entries()[0],
            Diagnostic::AttributeConflict {
                identifier: "LEI1".to_string(),
                field: "display_name".to_string(),
                kept: "Allianz SE".to_string(),
                discarded: "ALLIANZ SE".to_string(),
            }
        );
    }

    #[test]
    fn test_last_seen_overwrites() {
        let engine = DeduplicationEngine::new(ConflictPolicy::LastSeen);
        let mut existing = entity("Old Name").with_attribute("status", "ACTIVE");
        let incoming = entity("New Name").with_attribute("status", "INACTIVE");
        let mut diagnostics = Diagnostics::new();

        engine.merge(&mut existing, incoming, &mut diagnostics);

        assert_eq!(existing.display_name, "New Name");
        assert_eq!(existing.attribute("status"), Some("INACTIVE"));
        assert_eq!(diagnostics.len(), 2);
    }

    #[test]
    fn test_richer_record_wins_kind() {
        let engine = DeduplicationEngine::new(ConflictPolicy::Richer);
        let mut existing = Entity::new("F1", "Fund", EntityKind::LegalEntity);
        let incoming = Entity::new("F1", "Fund", EntityKind::FundSubfund)
            .with_jurisdiction("LU")
            .with_attribute("asset_class", "EQUITY");
        let mut diagnostics = Diagnostics::new();

        engine.merge(&mut existing, incoming, &mut diagnostics);

        assert_eq!(existing.kind, EntityKind::FundSubfund);
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_richer_kind_wins_under_first_seen() {
        let engine = DeduplicationEngine::default();
        let mut existing = Entity::new("A2", "Alpha Two", EntityKind::LegalEntity);
        let incoming = Entity::new("A2", "ALPHA TWO SICAV", EntityKind::FundSubfund)
            .with_jurisdiction("LU")
            .with_attribute("asset_class", "EQUITY")
            .with_attribute("legal_structure", "SICAV");
        let mut diagnostics = Diagnostics::new();

        engine.merge(&mut existing, incoming, &mut diagnostics);

        assert_eq!(existing.kind, EntityKind::FundSubfund);
        assert_eq!(existing.display_name, "Alpha Two");
        assert_eq!(existing.jurisdiction.as_deref(), Some("LU"));
        assert_eq!(
            diagnostics.entries()[0],
            Diagnostic::AttributeConflict {
                identifier: "A2".to_string(),
                field: "kind".to_string(),
                kept: "FUND_SUBFUND".to_string(),
                discarded: "LEGAL_ENTITY".to_string(),
            }
        );
        assert_eq!(diagnostics.len(), 2);
    }

    #[test]
    fn test_kind_tie_keeps_first() {
        let engine = DeduplicationEngine::new(ConflictPolicy::LastSeen);
        let mut existing = Entity::new("A2", "Alpha", EntityKind::LegalEntity);
        let incoming = Entity::new("A2", "Alpha", EntityKind::FundUmbrella);
        let mut diagnostics = Diagnostics::new();

        engine.merge(&mut existing, incoming, &mut diagnostics);

        assert_eq!(existing.kind, EntityKind::LegalEntity);
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_terminus_survives_from_either_side() {
        let engine = DeduplicationEngine::default();
        let mut existing = entity("Apex");
        let incoming = entity("Apex").with_terminus("NATURAL_PERSONS");
        let mut diagnostics = Diagnostics::new();

        engine.merge(&mut existing, incoming, &mut diagnostics);

        assert!(existing.is_terminus());
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_real_record_replaces_placeholder() {
        let engine = DeduplicationEngine::default();
        let mut existing = Entity::new("U1", "Umbrella U1", EntityKind::FundUmbrella)
            .with_attribute(PLACEHOLDER_ATTRIBUTE, "true");
        let incoming = Entity::new("U1", "Allianz Global Investors Fund", EntityKind::FundUmbrella)
            .with_jurisdiction("LU");
        let mut diagnostics = Diagnostics::new();

        engine.merge(&mut existing, incoming, &mut diagnostics);

        assert_eq!(existing.display_name, "Allianz Global Investors Fund");
        assert!(!is_placeholder(&existing));
        assert!(diagnostics.is_empty());
    }
}
