// 🔗 Relationship - directed edge between two entity identifiers

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipKind {
    /// child is owned (consolidated) by parent
    Ownership,

    /// child is the container, parent is the entity playing `role`
    RoleAssignment,

    /// share class in sub-fund, sub-fund in umbrella
    Containment,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::Ownership => "OWNERSHIP",
            RelationshipKind::RoleAssignment => "ROLE_ASSIGNMENT",
            RelationshipKind::Containment => "CONTAINMENT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub child_identifier: String,
    pub parent_identifier: String,
    pub kind: RelationshipKind,

    /// Ownership share, 0.0 - 100.0
    pub percentage: Option<f64>,

    /// Role name for role assignments (INVESTMENT_MANAGER, ...)
    pub role: Option<String>,

    /// Where the edge came from: "registry", "subsidiary-listing", "fund-export"
    pub source: String,

    /// Registry corroboration level (FULLY_CORROBORATED, ...)
    pub corroboration: Option<String>,

    /// Registry relationship type (IS_DIRECTLY_CONSOLIDATED_BY, ...)
    pub relationship_type: Option<String>,
}

impl Relationship {
    pub fn new(
        child_identifier: impl Into<String>,
        parent_identifier: impl Into<String>,
        kind: RelationshipKind,
        source: impl Into<String>,
    ) -> Self {
        Relationship {
            child_identifier: child_identifier.into(),
            parent_identifier: parent_identifier.into(),
            kind,
            percentage: None,
            role: None,
            source: source.into(),
            corroboration: None,
            relationship_type: None,
        }
    }

    pub fn ownership(
        child_identifier: impl Into<String>,
        parent_identifier: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Relationship::new(
            child_identifier,
            parent_identifier,
            RelationshipKind::Ownership,
            source,
        )
    }

    pub fn role(
        container_identifier: impl Into<String>,
        entity_identifier: impl Into<String>,
        role: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        let mut rel = Relationship::new(
            container_identifier,
            entity_identifier,
            RelationshipKind::RoleAssignment,
            source,
        );
        rel.role = Some(role.into());
        rel
    }

    pub fn containment(
        child_identifier: impl Into<String>,
        parent_identifier: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Relationship::new(
            child_identifier,
            parent_identifier,
            RelationshipKind::Containment,
            source,
        )
    }

    /// Builder pattern: ownership percentage
    pub fn with_percentage(mut self, percentage: f64) -> Self {
        self.percentage = Some(percentage);
        self
    }

    /// Builder pattern: corroboration level
    pub fn with_corroboration(mut self, corroboration: impl Into<String>) -> Self {
        self.corroboration = Some(corroboration.into());
        self
    }

    /// Builder pattern: registry relationship type
    pub fn with_relationship_type(mut self, relationship_type: impl Into<String>) -> Self {
        self.relationship_type = Some(relationship_type.into());
        self
    }

    pub fn is_self_loop(&self) -> bool {
        self.child_identifier == self.parent_identifier
    }

    /// Two edges with the same key are the same fact
    pub fn key(&self) -> (&str, &str, RelationshipKind, Option<&str>) {
        (
            &self.child_identifier,
            &self.parent_identifier,
            self.kind,
            self.role.as_deref(),
        )
    }
}
