// 🏢 Entity - one node of the ownership / fund graph
//
// Identity is the registry identifier (LEI or ISIN). Everything else is a value
// that can be merged when the same identifier arrives from several sources.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// ENTITY KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    /// Company, holding, management company
    LegalEntity,

    /// Umbrella fund (SICAV, ICAV) that contains sub-funds
    FundUmbrella,

    /// Sub-fund or standalone fund
    FundSubfund,

    /// Share class of a fund, keyed by ISIN
    ShareClass,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::LegalEntity => "LEGAL_ENTITY",
            EntityKind::FundUmbrella => "FUND_UMBRELLA",
            EntityKind::FundSubfund => "FUND_SUBFUND",
            EntityKind::ShareClass => "SHARE_CLASS",
        }
    }

    pub fn is_fund(&self) -> bool {
        matches!(self, EntityKind::FundUmbrella | EntityKind::FundSubfund)
    }
}

// ============================================================================
// TERMINUS
// ============================================================================

/// Registry-reported "no further parent" condition on a legal entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Terminus {
    pub reason: String,
}

// ============================================================================
// ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Dedup key: LEI for legal entities and funds, ISIN for share classes
    pub identifier: String,

    pub display_name: String,

    /// ISO country code or region tag
    pub jurisdiction: Option<String>,

    pub kind: EntityKind,

    /// Open key/value attributes (registration number, currency, ...)
    /// Ordered so that emission never depends on hash iteration.
    pub attributes: BTreeMap<String, String>,

    pub terminus: Option<Terminus>,
}

impl Entity {
    pub fn new(
        identifier: impl Into<String>,
        display_name: impl Into<String>,
        kind: EntityKind,
    ) -> Self {
        Entity {
            identifier: identifier.into(),
            display_name: display_name.into(),
            jurisdiction: None,
            kind,
            attributes: BTreeMap::new(),
            terminus: None,
        }
    }

    /// Builder pattern: set jurisdiction
    pub fn with_jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdiction = Some(jurisdiction.into());
        self
    }

    /// Builder pattern: add an attribute (empty values are ignored)
    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_attribute(key, value);
        self
    }

    /// Builder pattern: mark as apex with a registry exception reason
    pub fn with_terminus(mut self, reason: impl Into<String>) -> Self {
        self.terminus = Some(Terminus {
            reason: reason.into(),
        });
        self
    }

    pub fn set_attribute(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if !value.trim().is_empty() {
            self.attributes.insert(key.to_string(), value);
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Number of populated fields, used to pick the richer of two duplicates
    pub fn populated_fields(&self) -> usize {
        let mut count = self.attributes.len();
        if !self.display_name.trim().is_empty() {
            count += 1;
        }
        if self.jurisdiction.is_some() {
            count += 1;
        }
        if self.terminus.is_some() {
            count += 1;
        }
        count
    }

    pub fn is_terminus(&self) -> bool {
        self.terminus.is_some()
    }
}

// ============================================================================
// TESTS
// ============================================================================
