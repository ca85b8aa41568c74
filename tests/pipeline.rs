// End-to-end compile runs against registry fixtures

use ownership_compiler::emitter::{
    VERB_CONTAINER, VERB_CONTAINMENT, VERB_LEGAL_ENTITY, VERB_OWNERSHIP, VERB_ROLE,
    VERB_SHARE_CLASS, VERB_SUBFUND, VERB_UMBRELLA,
};
use ownership_compiler::{
    check_forward_references, CompileRequest, Compiler, CompilerConfig, ContainerSpec,
    Diagnostic, FixtureRegistry, FundExport, FundRecord, ShareClassRecord,
};

const ALLIANZ_FIXTURE: &str = r#"{
    "entities": {
        "OJ2TIQSVQND4IZYYK658": {
            "name": "Allianz Global Investors GmbH",
            "jurisdiction": "DE",
            "category": "GENERAL",
            "status": "ACTIVE",
            "address": { "city": "Frankfurt am Main", "country": "DE" },
            "direct_parent": {
                "parent_lei": "529900K9B0N5BT694847",
                "corroboration": "FULLY_CORROBORATED"
            }
        },
        "529900K9B0N5BT694847": {
            "name": "Allianz SE",
            "jurisdiction": "DE",
            "registration_number": "HRB 164232",
            "parent_exception": { "reason": "NATURAL_PERSONS" }
        },
        "549300AGI0SUBSID0001": {
            "name": "Allianz Global Investors UK Ltd",
            "jurisdiction": "GB",
            "direct_parent": { "parent_lei": "OJ2TIQSVQND4IZYYK658" }
        }
    },
    "children": {
        "OJ2TIQSVQND4IZYYK658": ["549300AGI0SUBSID0001", "549300BROKEN00000000"]
    },
    "page_size": 1
}"#;

const START: &str = "OJ2TIQSVQND4IZYYK658";

fn fund_export() -> FundExport {
    FundExport {
        funds: vec![
            FundRecord {
                identifier: "5299000UMBRELLA00001".to_string(),
                name: "Allianz Global Investors Fund".to_string(),
                jurisdiction: Some("LU".to_string()),
                legal_structure: Some("SICAV".to_string()),
                ..Default::default()
            },
            FundRecord {
                identifier: "5299000SUBFUND000001".to_string(),
                name: "Allianz Europe Equity Growth".to_string(),
                jurisdiction: Some("LU".to_string()),
                umbrella_identifier: Some("5299000UMBRELLA00001".to_string()),
                share_classes: vec![ShareClassRecord {
                    isin: "LU0256881128".to_string(),
                    name: "A EUR".to_string(),
                    currency: Some("EUR".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            },
            FundRecord {
                identifier: "5299000SUBFUND000002".to_string(),
                name: "Allianz Income and Growth".to_string(),
                umbrella_identifier: Some("5299000EXTERNALUMB01".to_string()),
                umbrella_name: Some("Allianz Global Investors Fund II".to_string()),
                ..Default::default()
            },
        ],
        share_classes: vec![ShareClassRecord {
            isin: "LU0000000099".to_string(),
            name: "Orphan".to_string(),
            fund_identifier: Some("UNKNOWN".to_string()),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn config() -> CompilerConfig {
    CompilerConfig {
        fetch_delay_ms: 0,
        container: Some(ContainerSpec::new("Allianz Global Investors")),
        ..CompilerConfig::default()
    }
}

#[test]
fn test_allianz_structure_compiles() {
    let mut registry = FixtureRegistry::from_json(ALLIANZ_FIXTURE).unwrap();
    let compiler = Compiler::new(config());

    let output = compiler
        .compile(&mut registry, CompileRequest::new(START).with_funds(fund_export()))
        .unwrap();

    let script = &output.script;
    assert!(check_forward_references(&script.commands).is_ok());
    assert_eq!(script.commands_with_verb(VERB_LEGAL_ENTITY).count(), 3);
    assert_eq!(script.commands_with_verb(VERB_OWNERSHIP).count(), 2);
    assert_eq!(script.commands_with_verb(VERB_CONTAINER).count(), 1);
    assert_eq!(script.commands_with_verb(VERB_UMBRELLA).count(), 2);
    assert_eq!(script.commands_with_verb(VERB_SUBFUND).count(), 2);
    assert_eq!(script.commands_with_verb(VERB_SHARE_CLASS).count(), 1);
    assert_eq!(script.commands_with_verb(VERB_CONTAINMENT).count(), 3);
    // 3 container roles + 4 fund roles
    assert_eq!(script.commands_with_verb(VERB_ROLE).count(), 7);

    // Apex first
    assert_eq!(script.commands[0].binds.as_deref(), Some("allianz_se"));

    let rendered = script.render();
    assert!(rendered.contains(":parent-exception \"NATURAL_PERSONS\""));
    assert!(rendered.contains(":corroboration \"FULLY_CORROBORATED\""));

    let diagnostics = output.diagnostics.entries();
    assert!(diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::MalformedRecord { .. })));
    assert!(diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::OrphanShareClass { .. })));
    assert!(diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::PlaceholderUmbrella { .. })));
}

#[test]
fn test_compile_twice_is_byte_identical() {
    let compiler = Compiler::new(config());

    let run = || {
        let mut registry = FixtureRegistry::from_json(ALLIANZ_FIXTURE).unwrap();
        compiler
            .compile(&mut registry, CompileRequest::new(START).with_funds(fund_export()))
            .unwrap()
            .script
            .render()
    };

    assert_eq!(run(), run());
}

#[test]
fn test_cycle_in_registry() {
    let mut registry = FixtureRegistry::from_json(
        r#"{ "entities": {
            "A": { "name": "Alpha", "direct_parent": { "parent_lei": "B" } },
            "B": { "name": "Beta", "direct_parent": { "parent_lei": "C" } },
            "C": { "name": "Gamma", "direct_parent": { "parent_lei": "A" } }
        } }"#,
    )
    .unwrap();
    let compiler = Compiler::new(CompilerConfig {
        fetch_delay_ms: 0,
        ..CompilerConfig::default()
    });

    let output = compiler.compile(&mut registry, CompileRequest::new("A")).unwrap();

    assert_eq!(output.chain.identifiers(), vec!["A", "B", "C"]);
    let cycles = output
        .diagnostics
        .iter()
        .filter(|d| matches!(d, Diagnostic::CycleDetected { .. }))
        .count();
    assert_eq!(cycles, 1);
    assert_eq!(output.script.commands_with_verb(VERB_OWNERSHIP).count(), 2);
    assert!(check_forward_references(&output.script.commands).is_ok());
}

#[test]
fn test_share_class_truncation_end_to_end() {
    let mut registry = FixtureRegistry::from_json(ALLIANZ_FIXTURE).unwrap();
    let compiler = Compiler::new(CompilerConfig {
        fetch_delay_ms: 0,
        include_subsidiaries: false,
        ..CompilerConfig::default()
    });
    let funds = FundExport {
        funds: vec![FundRecord {
            identifier: "F1".to_string(),
            name: "Big Fund".to_string(),
            share_classes: (0..75)
                .map(|i| ShareClassRecord {
                    isin: format!("LU{:010}", i),
                    name: format!("Class {}", i),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }],
        ..Default::default()
    };

    let output = compiler
        .compile(&mut registry, CompileRequest::new(START).with_funds(funds))
        .unwrap();

    assert_eq!(output.script.commands_with_verb(VERB_SHARE_CLASS).count(), 50);
    assert_eq!(output.script.summary.omitted_share_classes(), 25);
    assert!(output
        .script
        .render()
        .contains(";;     F1: kept 50, omitted 25"));
}

#[test]
fn test_dangling_parent_is_dropped() {
    let registry = FixtureRegistry::from_json(
        r#"{ "entities": { "A": { "name": "Alpha" } },
             "children": { "A": ["S"] } }"#,
    )
    .unwrap();
    // S reports a parent that is not in the graph
    let mut registry = registry.with_entity(ownership_compiler::RegistryRecord {
        lei: "S".to_string(),
        name: "Sub".to_string(),
        direct_parent: Some(ownership_compiler::normalizer::ParentRecord {
            parent_lei: "ELSEWHERE".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    });
    let compiler = Compiler::new(CompilerConfig {
        fetch_delay_ms: 0,
        ..CompilerConfig::default()
    });

    let output = compiler.compile(&mut registry, CompileRequest::new("A")).unwrap();

    assert_eq!(output.script.commands_with_verb(VERB_OWNERSHIP).count(), 0);
    let dangling = output
        .diagnostics
        .iter()
        .filter(|d| matches!(d, Diagnostic::DanglingRelationship { .. }))
        .count();
    assert_eq!(dangling, 1);
}
