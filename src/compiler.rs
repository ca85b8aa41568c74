// 🏭 Compiler Pipeline - resolve → normalize → assemble → allocate → emit
//
// One `Compiler::compile` call owns its cache, graph and binding table.
// Independent runs share nothing.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::assembler::{EntityGraph, GraphAssembler};
use crate::bindings::BindingAllocator;
use crate::config::CompilerConfig;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::emitter::{CompiledScript, ScriptEmitter};
use crate::error::EmitError;
use crate::loader::FundExport;
use crate::normalizer::{
    normalize_fund_batch, normalize_identifier, normalize_registry_batch, FundListing,
    NormalizedFund,
};
use crate::resolver::{ChainResolver, ResolvedChain};
use crate::source::{collect_listing, ListingKind, LookupCache, RegistrySource};

#[derive(Debug, Clone, Default)]
pub struct CompileRequest {
    /// Identifier the ownership walk starts from
    pub start: String,

    pub funds: FundExport,

    /// Header timestamp; None keeps output byte-identical across runs
    pub generated_at: Option<DateTime<Utc>>,
}

impl CompileRequest {
    pub fn new(start: impl Into<String>) -> Self {
        CompileRequest {
            start: start.into(),
            ..Default::default()
        }
    }

    /// Builder pattern: attach fund-export records
    pub fn with_funds(mut self, funds: FundExport) -> Self {
        self.funds.extend(funds);
        self
    }

    pub fn with_timestamp(mut self, generated_at: DateTime<Utc>) -> Self {
        self.generated_at = Some(generated_at);
        self
    }
}

#[derive(Debug)]
pub struct CompileOutput {
    pub script: CompiledScript,
    pub diagnostics: Diagnostics,
    pub chain: ResolvedChain,
    pub graph: EntityGraph,
}

pub struct Compiler {
    config: CompilerConfig,
}

impl Compiler {
    pub fn new(config: CompilerConfig) -> Self {
        Compiler { config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn compile<S: RegistrySource>(
        &self,
        source: &mut S,
        request: CompileRequest,
    ) -> Result<CompileOutput, EmitError> {
        let mut diagnostics = Diagnostics::new();
        let mut cache = LookupCache::new();
        let start = normalize_identifier(&request.start);

        let chain = ChainResolver::new(self.config.max_depth).resolve_chain(
            source,
            &mut cache,
            &start,
            &mut diagnostics,
        );

        let mut assembler = GraphAssembler::new(&self.config);
        assembler.add_chain(&chain, &mut diagnostics);

        if self.config.include_subsidiaries && !chain.is_empty() {
            let records = collect_listing(
                source,
                &start,
                ListingKind::Children,
                self.config.max_pages,
                &mut diagnostics,
            );
            let subsidiaries = normalize_registry_batch(&records, "subsidiary", &mut diagnostics);
            assembler.add_subsidiaries(&start, subsidiaries, &mut diagnostics);
        }

        if self.config.include_managed_funds && !chain.is_empty() {
            let records = collect_listing(
                source,
                &start,
                ListingKind::ManagedFunds,
                self.config.max_pages,
                &mut diagnostics,
            );
            let managed = FundListing {
                funds: normalize_registry_batch(&records, "managed fund", &mut diagnostics)
                    .into_iter()
                    .map(NormalizedFund::from_registry)
                    .collect(),
                share_classes: Vec::new(),
            };
            assembler.add_funds(managed, &mut diagnostics);
        }

        for reason in &request.funds.rejected {
            diagnostics.push(Diagnostic::MalformedRecord {
                source: "share class".to_string(),
                reason: reason.clone(),
            });
        }

        if !request.funds.funds.is_empty() || !request.funds.share_classes.is_empty() {
            let listing = normalize_fund_batch(
                &request.funds.funds,
                &request.funds.share_classes,
                &self.config,
                &mut diagnostics,
            );
            assembler.add_funds(listing, &mut diagnostics);
        }

        let graph = assembler.finish(&mut diagnostics);
        let script = self.compile_graph(&graph, request.generated_at)?;

        info!(
            start = %start,
            commands = script.len(),
            diagnostics = diagnostics.len(),
            warnings = diagnostics.warning_count(),
            "compile finished"
        );

        Ok(CompileOutput {
            script,
            diagnostics,
            chain,
            graph,
        })
    }

    /// Allocate bindings and emit for an already assembled graph
    pub fn compile_graph(
        &self,
        graph: &EntityGraph,
        generated_at: Option<DateTime<Utc>>,
    ) -> Result<CompiledScript, EmitError> {
        let mut bindings = BindingAllocator::from_config(&self.config);
        let mut emitter = ScriptEmitter::new(&self.config);
        emitter.generated_at = generated_at;
        emitter.emit(graph, &mut bindings)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::{VERB_LEGAL_ENTITY, VERB_OWNERSHIP};
    use crate::normalizer::{ParentRecord, RegistryRecord};
    use crate::source::FixtureRegistry;

    fn record(lei: &str, name: &str, parent: Option<&str>) -> RegistryRecord {
        RegistryRecord {
            lei: lei.to_string(),
            name: name.to_string(),
            direct_parent: parent.map(|p| ParentRecord {
                parent_lei: p.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn fixture() -> FixtureRegistry {
        FixtureRegistry::new()
            .with_entity(record("AGI", "Allianz Global Investors GmbH", Some("ASE")))
            .with_entity(record("ASE", "Allianz SE", None))
            .with_entity(record("SUB1", "AllianzGI Subsidiary", Some("AGI")))
            .with_children("AGI", &["SUB1"])
    }

    #[test]
    fn test_compile_chain_with_subsidiaries() {
        let mut source = fixture();
        let compiler = Compiler::new(CompilerConfig::default());

        let output = compiler.compile(&mut source, CompileRequest::new("agi")).unwrap();

        assert_eq!(output.chain.identifiers(), vec!["AGI", "ASE"]);
        assert_eq!(output.script.commands_with_verb(VERB_LEGAL_ENTITY).count(), 3);
        assert_eq!(output.script.commands_with_verb(VERB_OWNERSHIP).count(), 2);
        assert!(output.diagnostics.is_empty());
    }

    #[test]
    fn test_subsidiaries_can_be_disabled() {
        let mut source = fixture();
        let compiler = Compiler::new(CompilerConfig {
            include_subsidiaries: false,
            ..CompilerConfig::default()
        });

        let output = compiler.compile(&mut source, CompileRequest::new("AGI")).unwrap();

        assert_eq!(output.graph.len(), 2);
    }

    #[test]
    fn test_rejected_export_rows_become_diagnostics() {
        let compiler = Compiler::new(CompilerConfig::default());
        let funds = FundExport {
            rejected: vec!["classes.csv line 2: invalid type".to_string()],
            ..Default::default()
        };

        let output = compiler
            .compile(&mut fixture(), CompileRequest::new("AGI").with_funds(funds))
            .unwrap();

        assert_eq!(output.diagnostics.len(), 1);
        assert!(matches!(
            output.diagnostics.iter().next(),
            Some(Diagnostic::MalformedRecord { .. })
        ));
        assert_eq!(output.script.commands_with_verb(VERB_LEGAL_ENTITY).count(), 3);
    }

    #[test]
    fn test_compile_is_idempotent() {
        let compiler = Compiler::new(CompilerConfig::default());

        let first = compiler
            .compile(&mut fixture(), CompileRequest::new("AGI"))
            .unwrap()
            .script
            .render();
        let second = compiler
            .compile(&mut fixture(), CompileRequest::new("AGI"))
            .unwrap()
            .script
            .render();

        assert_eq!(first, second);
    }
}
