// 🧹 Record Normalizer - heterogeneous source records → uniform entities
//
// Registry records, fund-export rows and share-class rows arrive with their
// own field names and optionality. Everything downstream only sees `Entity`
// and `Relationship`.

use serde::{Deserialize, Serialize};

use crate::config::CompilerConfig;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::entities::{Entity, EntityKind, Relationship};
use crate::error::NormalizeError;

/// Registry consolidation implies full ownership
pub const CONSOLIDATION_PERCENTAGE: f64 = 100.0;

pub const DEFAULT_RELATIONSHIP_TYPE: &str = "IS_DIRECTLY_CONSOLIDATED_BY";

// ============================================================================
// RAW RECORDS
// ============================================================================

/// Legal-entity record as delivered by the registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
    #[serde(default)]
    pub lei: String,
    #[serde(default, alias = "legal_name")]
    pub name: String,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, alias = "legal_form_code")]
    pub legal_form: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub registration_number: Option<String>,
    #[serde(default)]
    pub validation_level: Option<String>,
    #[serde(default)]
    pub address: Option<RegistryAddress>,
    #[serde(default)]
    pub direct_parent: Option<ParentRecord>,
    #[serde(default)]
    pub parent_exception: Option<ParentException>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryAddress {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParentRecord {
    pub parent_lei: String,
    #[serde(default)]
    pub relationship_type: Option<String>,
    #[serde(default)]
    pub corroboration: Option<String>,
}

/// "No parent to report" record (e.g. NATURAL_PERSONS, NON_CONSOLIDATING)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParentException {
    pub reason: String,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Fund row from a fund-export file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundRecord {
    #[serde(default, alias = "lei", alias = "fund_id")]
    pub identifier: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "region")]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub legal_structure: Option<String>,
    #[serde(default)]
    pub is_umbrella: bool,
    #[serde(default, alias = "umbrella_lei")]
    pub umbrella_identifier: Option<String>,
    #[serde(default)]
    pub umbrella_name: Option<String>,
    #[serde(default)]
    pub asset_class: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub share_classes: Vec<ShareClassRecord>,
}

/// Share-class row; nested under a fund or flat with a foreign key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShareClassRecord {
    #[serde(default)]
    pub isin: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, alias = "fund_lei")]
    pub fund_identifier: Option<String>,
    #[serde(default)]
    pub distribution_type: Option<String>,
    #[serde(default)]
    pub hedged: Option<bool>,
}

// ============================================================================
// NORMALIZED OUTPUT
// ============================================================================

/// Registry entity plus the parent link it declares
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEntity {
    pub entity: Entity,
    pub parent: Option<Relationship>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UmbrellaRef {
    pub identifier: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFund {
    pub entity: Entity,
    pub umbrella: Option<UmbrellaRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedShareClass {
    pub entity: Entity,
    /// Explicit foreign key to the owning fund
    pub fund_identifier: String,
}

/// Funds and their share classes, both in input order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FundListing {
    pub funds: Vec<NormalizedFund>,
    pub share_classes: Vec<NormalizedShareClass>,
}

impl FundListing {
    pub fn is_empty(&self) -> bool {
        self.funds.is_empty() && self.share_classes.is_empty()
    }

    pub fn extend(&mut self, other: FundListing) {
        self.funds.extend(other.funds);
        self.share_classes.extend(other.share_classes);
    }
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Registry identifiers are case-insensitive; the dedup key is upper-case
pub fn normalize_identifier(raw: &str) -> String {
    raw.trim().to_uppercase()
}

fn required(
    value: &str,
    record: &'static str,
    field: &'static str,
) -> Result<String, NormalizeError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(NormalizeError::MissingField { record, field });
    }
    Ok(trimmed.to_string())
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn normalize_registry_record(
    record: &RegistryRecord,
) -> Result<NormalizedEntity, NormalizeError> {
    let identifier = normalize_identifier(&required(&record.lei, "registry", "lei")?);
    let name = required(&record.name, "registry", "name")?;

    let kind = match record.category.as_deref() {
        Some(c) if c.eq_ignore_ascii_case("FUND") => EntityKind::FundSubfund,
        _ => EntityKind::LegalEntity,
    };

    let mut entity = Entity::new(identifier.clone(), name, kind);
    entity.jurisdiction = non_empty(&record.jurisdiction);

    for (key, value) in [
        ("registration_number", &record.registration_number),
        ("legal_form", &record.legal_form),
        ("status", &record.status),
        ("category", &record.category),
        ("validation_level", &record.validation_level),
    ] {
        if let Some(v) = non_empty(value) {
            entity.set_attribute(key, v);
        }
    }
    if let Some(address) = &record.address {
        if let Some(city) = non_empty(&address.city) {
            entity.set_attribute("city", city);
        }
        if let Some(country) = non_empty(&address.country) {
            entity.set_attribute("country", country);
        }
    }

    let parent = record
        .direct_parent
        .as_ref()
        .filter(|p| !p.parent_lei.trim().is_empty())
        .map(|p| {
            let mut rel = Relationship::ownership(
                identifier.clone(),
                normalize_identifier(&p.parent_lei),
                "registry",
            )
            .with_percentage(CONSOLIDATION_PERCENTAGE)
            .with_relationship_type(
                non_empty(&p.relationship_type)
                    .unwrap_or_else(|| DEFAULT_RELATIONSHIP_TYPE.to_string()),
            );
            if let Some(c) = non_empty(&p.corroboration) {
                rel = rel.with_corroboration(c);
            }
            rel
        });

    // A declared parent wins over an exception record
    if parent.is_none() && kind == EntityKind::LegalEntity {
        if let Some(exception) = &record.parent_exception {
            let reason = match non_empty(&exception.detail) {
                Some(detail) => format!("{}: {}", exception.reason.trim(), detail),
                None => exception.reason.trim().to_string(),
            };
            entity = entity.with_terminus(reason);
        }
    }

    Ok(NormalizedEntity { entity, parent })
}

pub fn normalize_fund_record(
    record: &FundRecord,
    config: &CompilerConfig,
) -> Result<NormalizedFund, NormalizeError> {
    let identifier = normalize_identifier(&required(&record.identifier, "fund", "identifier")?);
    let name = required(&record.name, "fund", "name")?;

    let is_umbrella = record.is_umbrella
        || record
            .legal_structure
            .as_deref()
            .is_some_and(|s| config.is_umbrella_structure(s));
    let kind = if is_umbrella {
        EntityKind::FundUmbrella
    } else {
        EntityKind::FundSubfund
    };

    let mut entity = Entity::new(identifier.clone(), name, kind);
    entity.jurisdiction = non_empty(&record.jurisdiction);
    for (key, value) in [
        ("legal_structure", &record.legal_structure),
        ("asset_class", &record.asset_class),
        ("status", &record.status),
    ] {
        if let Some(v) = non_empty(value) {
            entity.set_attribute(key, v);
        }
    }

    let umbrella = non_empty(&record.umbrella_identifier)
        .map(|u| normalize_identifier(&u))
        .filter(|u| !is_umbrella && *u != identifier)
        .map(|u| UmbrellaRef {
            identifier: u,
            name: non_empty(&record.umbrella_name),
        });

    Ok(NormalizedFund { entity, umbrella })
}

/// `fallback_fund` is the enclosing fund for nested rows
pub fn normalize_share_class(
    record: &ShareClassRecord,
    fallback_fund: Option<&str>,
) -> Result<NormalizedShareClass, NormalizeError> {
    let identifier = normalize_identifier(&required(&record.isin, "share class", "isin")?);
    let name = required(&record.name, "share class", "name")?;
    let fund_identifier = non_empty(&record.fund_identifier)
        .or_else(|| fallback_fund.map(str::to_string))
        .map(|f| normalize_identifier(&f))
        .ok_or(NormalizeError::MissingField {
            record: "share class",
            field: "fund_identifier",
        })?;

    let mut entity = Entity::new(identifier, name, EntityKind::ShareClass);
    if let Some(currency) = non_empty(&record.currency) {
        entity.set_attribute("currency", currency.to_uppercase());
    }
    if let Some(distribution) = non_empty(&record.distribution_type) {
        entity.set_attribute("distribution_type", distribution);
    }
    if let Some(hedged) = record.hedged {
        entity.set_attribute("hedged", hedged.to_string());
    }

    Ok(NormalizedShareClass {
        entity,
        fund_identifier,
    })
}

// ============================================================================
// BATCH HELPERS - partial-failure semantics
// ============================================================================

pub fn normalize_registry_batch(
    records: &[RegistryRecord],
    source: &str,
    diagnostics: &mut Diagnostics,
) -> Vec<NormalizedEntity> {
    records
        .iter()
        .filter_map(|record| match normalize_registry_record(record) {
            Ok(normalized) => Some(normalized),
            Err(e) => {
                diagnostics.push(Diagnostic::MalformedRecord {
                    source: source.to_string(),
                    reason: e.to_string(),
                });
                None
            }
        })
        .collect()
}

/// Nested share classes come first (grouped by fund), then flat rows
pub fn normalize_fund_batch(
    records: &[FundRecord],
    flat_share_classes: &[ShareClassRecord],
    config: &CompilerConfig,
    diagnostics: &mut Diagnostics,
) -> FundListing {
    let mut listing = FundListing::default();

    for record in records {
        let fund = match normalize_fund_record(record, config) {
            Ok(fund) => fund,
            Err(e) => {
                // Nested share classes have no usable foreign key without the fund
                diagnostics.push(Diagnostic::MalformedRecord {
                    source: "fund".to_string(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        for sc in &record.share_classes {
            match normalize_share_class(sc, Some(&fund.entity.identifier)) {
                Ok(share_class) => listing.share_classes.push(share_class),
                Err(e) => diagnostics.push(Diagnostic::MalformedRecord {
                    source: "share class".to_string(),
                    reason: e.to_string(),
                }),
            }
        }
        listing.funds.push(fund);
    }

    for sc in flat_share_classes {
        match normalize_share_class(sc, None) {
            Ok(share_class) => listing.share_classes.push(share_class),
            Err(e) => diagnostics.push(Diagnostic::MalformedRecord {
                source: "share class".to_string(),
                reason: e.to_string(),
            }),
        }
    }

    listing
}

impl NormalizedFund {
    /// Fund discovered through the registry (managed-fund listing)
    pub fn from_registry(normalized: NormalizedEntity) -> Self {
        let mut entity = normalized.entity;
        if entity.kind == EntityKind::LegalEntity {
            entity.kind = EntityKind::FundSubfund;
        }
        NormalizedFund {
            entity,
            umbrella: None,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_record(lei: &str, name: &str) -> RegistryRecord {
        RegistryRecord {
            lei: lei.to_string(),
            name: name.to_string(),
            jurisdiction: Some("DE".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_registry_record_with_parent() {
        let mut record = registry_record("oj2tiqsvqnd4izyyk658", "Allianz Global Investors GmbH");
        record.direct_parent = Some(ParentRecord {
            parent_lei: "529900K9B0N5BT694847".to_string(),
            relationship_type: None,
            corroboration: Some("FULLY_CORROBORATED".to_string()),
        });
        record.address = Some(RegistryAddress {
            city: Some("Frankfurt".to_string()),
            country: Some("DE".to_string()),
        });

        let normalized = normalize_registry_record(&record).unwrap();

        assert_eq!(normalized.entity.identifier, "OJ2TIQSVQND4IZYYK658");
        assert_eq!(normalized.entity.kind, EntityKind::LegalEntity);
        assert_eq!(normalized.entity.attribute("city"), Some("Frankfurt"));

        let parent = normalized.parent.unwrap();
        assert_eq!(parent.child_identifier, "OJ2TIQSVQND4IZYYK658");
        assert_eq!(parent.parent_identifier, "529900K9B0N5BT694847");
        assert_eq!(parent.percentage, Some(100.0));
        assert_eq!(parent.relationship_type.as_deref(), Some(DEFAULT_RELATIONSHIP_TYPE));
        assert_eq!(parent.corroboration.as_deref(), Some("FULLY_CORROBORATED"));
    }

    #[test]
    fn test_exception_becomes_terminus() {
        let mut record = registry_record("529900K9B0N5BT694847", "Allianz SE");
        record.parent_exception = Some(ParentException {
            reason: "NATURAL_PERSONS".to_string(),
            detail: Some("widely held".to_string()),
        });

        let normalized = normalize_registry_record(&record).unwrap();

        assert!(normalized.parent.is_none());
        assert_eq!(
            normalized.entity.terminus.unwrap().reason,
            "NATURAL_PERSONS: widely held"
        );
    }

    #[test]
    fn test_parent_takes_precedence_over_exception() {
        let mut record = registry_record("A", "Alpha");
        record.direct_parent = Some(ParentRecord {
            parent_lei: "B".to_string(),
            ..Default::default()
        });
        record.parent_exception = Some(ParentException {
            reason: "NON_CONSOLIDATING".to_string(),
            detail: None,
        });

        let normalized = normalize_registry_record(&record).unwrap();
        assert!(normalized.parent.is_some());
        assert!(normalized.entity.terminus.is_none());
    }

    #[test]
    fn test_missing_fields_are_errors() {
        let err = normalize_registry_record(&registry_record("  ", "Nameless")).unwrap_err();
        assert_eq!(
            err,
            NormalizeError::MissingField {
                record: "registry",
                field: "lei"
            }
        );
        assert!(normalize_registry_record(&registry_record("A", "")).is_err());
    }

    #[test]
    fn test_batch_skips_malformed_records() {
        let records = vec![
            registry_record("A", "Alpha"),
            registry_record("", "Broken"),
            registry_record("C", "Gamma"),
        ];
        let mut diagnostics = Diagnostics::new();

        let normalized = normalize_registry_batch(&records, "subsidiary", &mut diagnostics);

        assert_eq!(normalized.len(), 2);
        assert_eq!(diagnostics.len(), 1);
        assert!(matches!(
            diagnostics.entries()[0],
            Diagnostic::MalformedRecord { .. }
        ));
    }

    #[test]
    fn test_fund_structure_selects_umbrella() {
        let config = CompilerConfig::default();
        let record = FundRecord {
            identifier: "UMB1".to_string(),
            name: "Allianz Global Investors Fund".to_string(),
            legal_structure: Some("SICAV".to_string()),
            ..Default::default()
        };

        let fund = normalize_fund_record(&record, &config).unwrap();
        assert_eq!(fund.entity.kind, EntityKind::FundUmbrella);
        assert!(fund.umbrella.is_none());
    }

    #[test]
    fn test_subfund_keeps_umbrella_reference() {
        let config = CompilerConfig::default();
        let record = FundRecord {
            identifier: "sub1".to_string(),
            name: "Allianz Europe Equity Growth".to_string(),
            umbrella_identifier: Some("umb1".to_string()),
            umbrella_name: Some("Allianz Global Investors Fund".to_string()),
            ..Default::default()
        };

        let fund = normalize_fund_record(&record, &config).unwrap();
        assert_eq!(fund.entity.kind, EntityKind::FundSubfund);
        assert_eq!(
            fund.umbrella,
            Some(UmbrellaRef {
                identifier: "UMB1".to_string(),
                name: Some("Allianz Global Investors Fund".to_string()),
            })
        );
    }

    #[test]
    fn test_nested_share_classes_inherit_fund_key() {
        let config = CompilerConfig::default();
        let record = FundRecord {
            identifier: "SUB1".to_string(),
            name: "Sub One".to_string(),
            share_classes: vec![
                ShareClassRecord {
                    isin: "lu1234567890".to_string(),
                    name: "A EUR".to_string(),
                    currency: Some("eur".to_string()),
                    hedged: Some(true),
                    ..Default::default()
                },
                ShareClassRecord {
                    isin: "".to_string(),
                    name: "broken".to_string(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let mut diagnostics = Diagnostics::new();

        let listing = normalize_fund_batch(&[record], &[], &config, &mut diagnostics);

        assert_eq!(listing.funds.len(), 1);
        assert_eq!(listing.share_classes.len(), 1);
        let sc = &listing.share_classes[0];
        assert_eq!(sc.fund_identifier, "SUB1");
        assert_eq!(sc.entity.identifier, "LU1234567890");
        assert_eq!(sc.entity.attribute("currency"), Some("EUR"));
        assert_eq!(sc.entity.attribute("hedged"), Some("true"));
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_flat_share_class_requires_foreign_key() {
        let record = ShareClassRecord {
            isin: "LU0000000001".to_string(),
            name: "I USD".to_string(),
            ..Default::default()
        };
        assert!(normalize_share_class(&record, None).is_err());
        assert!(normalize_share_class(&record, Some("F")).is_ok());
    }
}
