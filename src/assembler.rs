// 🧩 Graph Assembler - chain + subsidiaries + funds → one deduplicated graph
//
// Insertion order is preserved everywhere (Vec + index map); nothing that
// reaches the emitter depends on hash iteration.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::info;

use crate::config::{CompilerConfig, ContainerSpec, RoleTarget};
use crate::deduplication::{DeduplicationEngine, PLACEHOLDER_ATTRIBUTE};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::entities::{Entity, EntityKind, Relationship, RelationshipKind};
use crate::normalizer::{
    normalize_identifier, FundListing, NormalizedEntity, NormalizedShareClass, UmbrellaRef,
    CONSOLIDATION_PERCENTAGE, DEFAULT_RELATIONSHIP_TYPE,
};
use crate::resolver::ResolvedChain;

// ============================================================================
// GRAPH TYPES
// ============================================================================

/// Share classes dropped for one fund by the per-fund cap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Truncation {
    pub fund: String,
    pub kept: usize,
    pub omitted: usize,
}

/// The client business unit; not a registry entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    /// Synthetic identifier, only used as a relationship endpoint
    pub identifier: String,
    pub name: String,
    pub jurisdiction: Option<String>,
    pub client_type: String,
}

impl Container {
    pub fn from_spec(spec: &ContainerSpec) -> Self {
        Container {
            identifier: format!("CONTAINER:{}", spec.name.trim().to_uppercase()),
            name: spec.name.trim().to_string(),
            jurisdiction: spec.jurisdiction.clone(),
            client_type: spec.client_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntityGraph {
    entities: Vec<Entity>,
    index: HashMap<String, usize>,
    relationships: Vec<Relationship>,
    truncations: Vec<Truncation>,
    chain_order: Vec<String>,
    container: Option<Container>,
}

impl EntityGraph {
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn truncations(&self) -> &[Truncation] {
        &self.truncations
    }

    /// Start first, apex last
    pub fn chain_order(&self) -> &[String] {
        &self.chain_order
    }

    pub fn container(&self) -> Option<&Container> {
        self.container.as_ref()
    }

    pub fn get(&self, identifier: &str) -> Option<&Entity> {
        self.index.get(identifier).map(|&i| &self.entities[i])
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.index.contains_key(identifier)
    }

    /// Entity or container identifier
    pub fn is_endpoint(&self, identifier: &str) -> bool {
        self.contains(identifier)
            || self
                .container
                .as_ref()
                .is_some_and(|c| c.identifier == identifier)
    }

    pub fn entities_of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(move |e| e.kind == kind)
    }

    pub fn relationships_of_kind(&self, kind: RelationshipKind) -> impl Iterator<Item = &Relationship> {
        self.relationships.iter().filter(move |r| r.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

// ============================================================================
// ASSEMBLER
// ============================================================================

pub struct GraphAssembler {
    share_class_cap: usize,
    engine: DeduplicationEngine,
    graph: EntityGraph,
    umbrella_refs: Vec<(String, UmbrellaRef)>,
    share_classes: Vec<NormalizedShareClass>,
    container_spec: Option<ContainerSpec>,
}

impl GraphAssembler {
    pub fn new(config: &CompilerConfig) -> Self {
        GraphAssembler {
            share_class_cap: config.share_class_cap,
            engine: DeduplicationEngine::new(config.conflict_policy),
            graph: EntityGraph::default(),
            umbrella_refs: Vec::new(),
            share_classes: Vec::new(),
            container_spec: config.container.clone(),
        }
    }

    fn upsert(&mut self, entity: Entity, diagnostics: &mut Diagnostics) {
        match self.graph.index.get(&entity.identifier) {
            Some(&i) => self
                .engine
                .merge(&mut self.graph.entities[i], entity, diagnostics),
            None => {
                self.graph
                    .index
                    .insert(entity.identifier.clone(), self.graph.entities.len());
                self.graph.entities.push(entity);
            }
        }
    }

    pub fn add_chain(&mut self, chain: &ResolvedChain, diagnostics: &mut Diagnostics) {
        for entity in &chain.entities {
            if !self.graph.chain_order.contains(&entity.identifier) {
                self.graph.chain_order.push(entity.identifier.clone());
            }
            self.upsert(entity.clone(), diagnostics);
        }
        self.graph
            .relationships
            .extend(chain.relationships.iter().cloned());
    }

    /// One-level listing of `scope`'s direct subsidiaries
    pub fn add_subsidiaries(
        &mut self,
        scope: &str,
        subsidiaries: Vec<NormalizedEntity>,
        diagnostics: &mut Diagnostics,
    ) {
        let scope = normalize_identifier(scope);
        for sub in subsidiaries {
            let edge = sub.parent.unwrap_or_else(|| {
                Relationship::ownership(
                    sub.entity.identifier.clone(),
                    scope.clone(),
                    "subsidiary-listing",
                )
                .with_percentage(CONSOLIDATION_PERCENTAGE)
                .with_relationship_type(DEFAULT_RELATIONSHIP_TYPE)
            });
            self.upsert(sub.entity, diagnostics);
            self.graph.relationships.push(edge);
        }
    }

    pub fn add_funds(&mut self, listing: FundListing, diagnostics: &mut Diagnostics) {
        for fund in listing.funds {
            if let Some(umbrella) = fund.umbrella {
                self.umbrella_refs
                    .push((fund.entity.identifier.clone(), umbrella));
            }
            self.upsert(fund.entity, diagnostics);
        }
        self.share_classes.extend(listing.share_classes);
    }

    pub fn finish(mut self, diagnostics: &mut Diagnostics) -> EntityGraph {
        self.attach_umbrellas(diagnostics);
        self.attach_share_classes(diagnostics);
        self.attach_container(diagnostics);
        self.validate_relationships(diagnostics);

        info!(
            entities = self.graph.entities.len(),
            relationships = self.graph.relationships.len(),
            truncated_funds = self.graph.truncations.len(),
            "graph assembled"
        );
        self.graph
    }

    /// Containment edges sub-fund → umbrella, placeholders for named unknowns
    fn attach_umbrellas(&mut self, diagnostics: &mut Diagnostics) {
        let refs = std::mem::take(&mut self.umbrella_refs);
        for (fund, umbrella) in refs {
            if !self.graph.contains(&umbrella.identifier) {
                if let Some(name) = &umbrella.name {
                    diagnostics.push(Diagnostic::PlaceholderUmbrella {
                        identifier: umbrella.identifier.clone(),
                        name: name.clone(),
                    });
                    let placeholder = Entity::new(
                        umbrella.identifier.clone(),
                        name.clone(),
                        EntityKind::FundUmbrella,
                    )
                    .with_attribute(PLACEHOLDER_ATTRIBUTE, "true");
                    self.upsert(placeholder, diagnostics);
                }
            }
            self.graph.relationships.push(Relationship::containment(
                fund,
                umbrella.identifier,
                "fund-export",
            ));
        }
    }

    fn attach_share_classes(&mut self, diagnostics: &mut Diagnostics) {
        let share_classes = std::mem::take(&mut self.share_classes);
        let mut per_fund: HashMap<String, Vec<String>> = HashMap::new();
        let mut fund_order: Vec<String> = Vec::new();
        let mut omitted: HashMap<String, HashSet<String>> = HashMap::new();

        for sc in share_classes {
            let isin = sc.entity.identifier.clone();
            let names_fund = self
                .graph
                .get(&sc.fund_identifier)
                .is_some_and(|e| e.kind.is_fund());
            if !names_fund {
                diagnostics.push(Diagnostic::OrphanShareClass {
                    isin,
                    fund: sc.fund_identifier,
                });
                continue;
            }

            let kept = per_fund.entry(sc.fund_identifier.clone()).or_default();
            if kept.is_empty() {
                fund_order.push(sc.fund_identifier.clone());
            }
            if kept.contains(&isin) {
                self.upsert(sc.entity, diagnostics);
                continue;
            }
            if kept.len() >= self.share_class_cap {
                omitted.entry(sc.fund_identifier).or_default().insert(isin);
                continue;
            }

            kept.push(isin.clone());
            self.upsert(sc.entity, diagnostics);
            self.graph.relationships.push(Relationship::containment(
                isin,
                sc.fund_identifier,
                "fund-export",
            ));
        }

        for fund in fund_order {
            if let Some(count) = omitted.get(&fund).map(HashSet::len) {
                let kept = per_fund.get(&fund).map_or(0, Vec::len);
                diagnostics.push(Diagnostic::ShareClassTruncated {
                    fund: fund.clone(),
                    kept,
                    omitted: count,
                });
                self.graph.truncations.push(Truncation {
                    fund,
                    kept,
                    omitted: count,
                });
            }
        }
    }

    fn attach_container(&mut self, diagnostics: &mut Diagnostics) {
        let Some(spec) = self.container_spec.take() else {
            return;
        };
        let container = Container::from_spec(&spec);

        for role in &spec.roles {
            let target = match &role.target {
                RoleTarget::Apex => self.graph.chain_order.last().cloned(),
                RoleTarget::Start => self.graph.chain_order.first().cloned(),
                RoleTarget::Identifier(id) => Some(normalize_identifier(id)),
            };
            // Roles land on legal entities and funds only
            let target = target.filter(|id| {
                self.graph
                    .get(id)
                    .is_some_and(|e| e.kind == EntityKind::LegalEntity || e.kind.is_fund())
            });
            match target {
                Some(entity) => self.graph.relationships.push(Relationship::role(
                    container.identifier.clone(),
                    entity,
                    role.role.clone(),
                    "container",
                )),
                None => diagnostics.push(Diagnostic::DanglingRelationship {
                    child: container.identifier.clone(),
                    parent: role_target_label(&role.target),
                    kind: RelationshipKind::RoleAssignment,
                }),
            }
        }

        if let Some(fund_role) = &spec.fund_role {
            let funds: Vec<String> = self
                .graph
                .entities
                .iter()
                .filter(|e| e.kind.is_fund())
                .map(|e| e.identifier.clone())
                .collect();
            for fund in funds {
                self.graph.relationships.push(Relationship::role(
                    container.identifier.clone(),
                    fund,
                    fund_role.clone(),
                    "container",
                ));
            }
        }

        self.graph.container = Some(container);
    }

    /// Drop self-loops, dangling edges and exact duplicates
    fn validate_relationships(&mut self, diagnostics: &mut Diagnostics) {
        let relationships = std::mem::take(&mut self.graph.relationships);
        let mut seen: HashSet<(String, String, RelationshipKind, Option<String>)> = HashSet::new();
        let mut kept = Vec::with_capacity(relationships.len());

        for rel in relationships {
            if rel.is_self_loop() {
                diagnostics.push(Diagnostic::SelfLoop {
                    identifier: rel.child_identifier.clone(),
                    kind: rel.kind,
                });
                continue;
            }
            if !self.graph.is_endpoint(&rel.child_identifier)
                || !self.graph.is_endpoint(&rel.parent_identifier)
            {
                diagnostics.push(Diagnostic::DanglingRelationship {
                    child: rel.child_identifier.clone(),
                    parent: rel.parent_identifier.clone(),
                    kind: rel.kind,
                });
                continue;
            }
            let (child, parent, kind, role) = rel.key();
            let key = (
                child.to_string(),
                parent.to_string(),
                kind,
                role.map(str::to_string),
            );
            if seen.insert(key) {
                kept.push(rel);
            }
        }

        self.graph.relationships = kept;
    }
}

fn role_target_label(target: &RoleTarget) -> String {
    match target {
        RoleTarget::Apex => "apex".to_string(),
        RoleTarget::Start => "start".to_string(),
        RoleTarget::Identifier(id) => normalize_identifier(id),
    }
}

/// One-shot assembly: chain, subsidiaries of `chain.start`, then funds
pub fn assemble(
    chain: &ResolvedChain,
    subsidiaries: Vec<NormalizedEntity>,
    funds: FundListing,
    config: &CompilerConfig,
    diagnostics: &mut Diagnostics,
) -> EntityGraph {
    let mut assembler = GraphAssembler::new(config);
    assembler.add_chain(chain, diagnostics);
    assembler.add_subsidiaries(&chain.start, subsidiaries, diagnostics);
    assembler.add_funds(funds, diagnostics);
    assembler.finish(diagnostics)
}

// ============================================================================
// TESTS
// ============================================================================
