// 📜 Script Emitter - entity graph → ordered command script
//
// Fixed phase order, each edge written right after the creation command
// that binds its last missing endpoint. A script that would reference an
// unbound name is never produced: the emitter fails instead.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use tracing::{debug, info};

use crate::assembler::{Container, EntityGraph, Truncation};
use crate::bindings::BindingAllocator;
use crate::config::CompilerConfig;
use crate::entities::{Entity, EntityKind, Relationship, RelationshipKind};
use crate::error::EmitError;

pub const VERB_LEGAL_ENTITY: &str = "entity.ensure-limited-company";
pub const VERB_CONTAINER: &str = "cbu.ensure";
pub const VERB_UMBRELLA: &str = "fund.ensure-umbrella";
pub const VERB_SUBFUND: &str = "fund.ensure-subfund";
pub const VERB_SHARE_CLASS: &str = "fund.ensure-share-class";
pub const VERB_OWNERSHIP: &str = "ubo.add-ownership";
pub const VERB_ROLE: &str = "cbu.assign-role";
pub const VERB_CONTAINMENT: &str = "fund.add-containment";

const CONTAINER_KIND: &str = "CONTAINER";

// ============================================================================
// COMMANDS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    /// Reference to an earlier binding (rendered `@name`)
    Ref(String),
    Number(f64),
    Bool(bool),
}

impl ParamValue {
    fn render(&self) -> String {
        match self {
            ParamValue::Str(s) => format!("\"{}\"", escape_string(s)),
            ParamValue::Ref(b) => format!("@{}", b),
            ParamValue::Number(n) if n.fract() == 0.0 => format!("{:.1}", n),
            ParamValue::Number(n) => format!("{}", n),
            ParamValue::Bool(b) => b.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub verb: &'static str,
    pub params: Vec<(String, ParamValue)>,
    /// Name introduced by this command (`:as @name`)
    pub binds: Option<String>,
    /// Single-line `;;` comment written above the command
    pub comment: Option<String>,
}

impl Command {
    pub fn new(verb: &'static str) -> Self {
        Command {
            verb,
            params: Vec::new(),
            binds: None,
            comment: None,
        }
    }

    pub fn param(mut self, key: &str, value: ParamValue) -> Self {
        self.params.push((key.to_string(), value));
        self
    }

    pub fn str_param(self, key: &str, value: impl Into<String>) -> Self {
        self.param(key, ParamValue::Str(value.into()))
    }

    pub fn ref_param(self, key: &str, binding: impl Into<String>) -> Self {
        self.param(key, ParamValue::Ref(binding.into()))
    }

    pub fn binding(mut self, binding: impl Into<String>) -> Self {
        self.binds = Some(binding.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(sanitize_comment(&comment.into()));
        self
    }

    /// Bindings this command reads
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.params.iter().filter_map(|(_, v)| match v {
            ParamValue::Ref(b) => Some(b.as_str()),
            _ => None,
        })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(comment) = &self.comment {
            let _ = writeln!(out, ";; {}", comment);
        }
        out.push('(');
        out.push_str(self.verb);

        let mut lines: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!(":{} {}", k, v.render()))
            .collect();
        if let Some(binding) = &self.binds {
            lines.push(format!(":as @{}", binding));
        }
        for line in lines {
            out.push_str("\n    ");
            out.push_str(&line);
        }
        out.push(')');
        out
    }
}

// ============================================================================
// COMPILED SCRIPT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScriptSummary {
    pub entities: BTreeMap<String, usize>,
    pub relationships: BTreeMap<String, usize>,
    pub truncations: Vec<Truncation>,
}

impl ScriptSummary {
    pub fn omitted_share_classes(&self) -> usize {
        self.truncations.iter().map(|t| t.omitted).sum()
    }

    fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, ";; {}", "=".repeat(60));
        let _ = writeln!(out, ";; Summary");
        for (kind, count) in &self.entities {
            let _ = writeln!(out, ";;   {}: {}", kind, count);
        }
        for (kind, count) in &self.relationships {
            let _ = writeln!(out, ";;   {}: {}", kind, count);
        }
        if !self.truncations.is_empty() {
            let _ = writeln!(
                out,
                ";;   share classes omitted: {} across {} fund(s)",
                self.omitted_share_classes(),
                self.truncations.len()
            );
            for t in &self.truncations {
                let _ = writeln!(
                    out,
                    ";;     {}: kept {}, omitted {}",
                    sanitize_comment(&t.fund),
                    t.kept,
                    t.omitted
                );
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledScript {
    pub commands: Vec<Command>,
    pub summary: ScriptSummary,
    pub generated_at: Option<DateTime<Utc>>,
}

impl CompiledScript {
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(ts) = self.generated_at {
            let _ = writeln!(out, ";; generated-at {}", ts.to_rfc3339());
            out.push('\n');
        }
        for command in &self.commands {
            out.push_str(&command.render());
            out.push_str("\n\n");
        }
        out.push_str(&self.summary.render());
        out
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands_with_verb<'a>(&'a self, verb: &'a str) -> impl Iterator<Item = &'a Command> {
        self.commands.iter().filter(move |c| c.verb == verb)
    }
}

// ============================================================================
// STRING HANDLING
// ============================================================================

pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

/// Cut on a char boundary, marker included in the limit
pub fn truncate_name(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len {
        return name.to_string();
    }
    let kept: String = name.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
}

fn sanitize_comment(text: &str) -> String {
    text.chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

// ============================================================================
// FORWARD-REFERENCE CHECK
// ============================================================================

/// Every reference must name a binding introduced by an earlier command
pub fn check_forward_references(commands: &[Command]) -> Result<(), EmitError> {
    let mut bound: HashMap<&str, usize> = HashMap::new();

    for (index, command) in commands.iter().enumerate() {
        for reference in command.references() {
            if !bound.contains_key(reference) {
                return Err(EmitError::UnboundReference {
                    index,
                    binding: reference.to_string(),
                });
            }
        }
        if let Some(binding) = &command.binds {
            if let Some(&first) = bound.get(binding.as_str()) {
                return Err(EmitError::DuplicateBinding {
                    binding: binding.clone(),
                    first,
                    second: index,
                });
            }
            bound.insert(binding.as_str(), index);
        }
    }
    Ok(())
}

// ============================================================================
// EMITTER
// ============================================================================

pub struct ScriptEmitter {
    pub max_name_len: usize,
    pub generated_at: Option<DateTime<Utc>>,
}

impl ScriptEmitter {
    pub fn new(config: &CompilerConfig) -> Self {
        ScriptEmitter {
            max_name_len: config.max_name_len,
            generated_at: None,
        }
    }

    /// Builder pattern: stamp the script header
    pub fn with_timestamp(mut self, generated_at: DateTime<Utc>) -> Self {
        self.generated_at = Some(generated_at);
        self
    }

    pub fn emit(
        &self,
        graph: &EntityGraph,
        bindings: &mut BindingAllocator,
    ) -> Result<CompiledScript, EmitError> {
        let mut state = EmitState::new(graph, self.max_name_len);

        // Phase 1: ownership chain, apex first
        for id in graph.chain_order().iter().rev() {
            if let Some(entity) = graph.get(id).filter(|e| e.kind == EntityKind::LegalEntity) {
                state.create_entity(entity, bindings)?;
            }
        }

        // Phase 2: remaining legal entities
        for entity in graph.entities_of_kind(EntityKind::LegalEntity) {
            state.create_entity(entity, bindings)?;
        }

        // Phase 3: container and its legal-entity roles
        if let Some(container) = graph.container() {
            state.create_container(container, bindings);
            state.emit_roles(bindings, |e| e.kind == EntityKind::LegalEntity)?;
        }

        // Phase 4: umbrellas, then sub-funds
        let funds: Vec<&Entity> = graph
            .entities_of_kind(EntityKind::FundUmbrella)
            .chain(graph.entities_of_kind(EntityKind::FundSubfund))
            .collect();
        for fund in &funds {
            state.create_entity(fund, bindings)?;
        }

        // Phase 5: fund roles
        if graph.container().is_some() {
            state.emit_roles(bindings, |e| e.kind.is_fund())?;
        }

        // Phase 6: share classes, grouped by fund
        for fund in &funds {
            let children: Vec<&str> = graph
                .relationships_of_kind(RelationshipKind::Containment)
                .filter(|r| r.parent_identifier == fund.identifier)
                .map(|r| r.child_identifier.as_str())
                .collect();
            for child in children {
                if let Some(sc) = graph.get(child).filter(|e| e.kind == EntityKind::ShareClass) {
                    state.create_entity(sc, bindings)?;
                }
            }
        }
        for sc in graph.entities_of_kind(EntityKind::ShareClass) {
            state.create_entity(sc, bindings)?;
        }

        state.finish(self.generated_at)
    }
}

struct EmitState<'g> {
    graph: &'g EntityGraph,
    max_name_len: usize,
    commands: Vec<Command>,
    bound: HashSet<String>,
    emitted: Vec<bool>,
    /// Ownership/containment edge indices by endpoint
    by_endpoint: HashMap<&'g str, Vec<usize>>,
}

impl<'g> EmitState<'g> {
    fn new(graph: &'g EntityGraph, max_name_len: usize) -> Self {
        let mut by_endpoint: HashMap<&'g str, Vec<usize>> = HashMap::new();
        for (i, rel) in graph.relationships().iter().enumerate() {
            if rel.kind != RelationshipKind::RoleAssignment {
                by_endpoint
                    .entry(rel.child_identifier.as_str())
                    .or_default()
                    .push(i);
                by_endpoint
                    .entry(rel.parent_identifier.as_str())
                    .or_default()
                    .push(i);
            }
        }

        EmitState {
            graph,
            max_name_len,
            commands: Vec::new(),
            bound: HashSet::new(),
            emitted: vec![false; graph.relationships().len()],
            by_endpoint,
        }
    }

    fn create_entity(
        &mut self,
        entity: &Entity,
        bindings: &mut BindingAllocator,
    ) -> Result<(), EmitError> {
        if self.bound.contains(&entity.identifier) {
            return Ok(());
        }
        let binding = bindings.allocate(&entity.identifier, &entity.display_name);
        debug!(identifier = %entity.identifier, binding = %binding, "create");
        self.commands
            .push(create_command(entity, &binding, self.max_name_len));
        self.bound.insert(entity.identifier.clone());
        self.flush_edges(&entity.identifier, bindings)
    }

    fn create_container(&mut self, container: &Container, bindings: &mut BindingAllocator) {
        let binding = bindings.allocate(&container.identifier, &container.name);
        let name = truncate_name(&container.name, self.max_name_len);
        let mut command = Command::new(VERB_CONTAINER)
            .with_comment(format!("CBU: {}", name))
            .str_param("name", name)
            .str_param("client-type", container.client_type.clone());
        if let Some(jurisdiction) = &container.jurisdiction {
            command = command.str_param("jurisdiction", jurisdiction.clone());
        }
        self.commands.push(command.binding(binding));
        self.bound.insert(container.identifier.clone());
    }

    /// Ownership/containment edges whose other endpoint is already bound
    fn flush_edges(
        &mut self,
        identifier: &str,
        bindings: &BindingAllocator,
    ) -> Result<(), EmitError> {
        let graph = self.graph;
        let Some(indices) = self.by_endpoint.get(identifier).cloned() else {
            return Ok(());
        };
        for i in indices {
            let rel = &graph.relationships()[i];
            if self.emitted[i]
                || !self.bound.contains(&rel.child_identifier)
                || !self.bound.contains(&rel.parent_identifier)
            {
                continue;
            }
            self.commands.push(relate_command(rel, bindings)?);
            self.emitted[i] = true;
        }
        Ok(())
    }

    fn emit_roles(
        &mut self,
        bindings: &BindingAllocator,
        target: impl Fn(&Entity) -> bool,
    ) -> Result<(), EmitError> {
        let graph = self.graph;
        for (i, rel) in graph.relationships().iter().enumerate() {
            if rel.kind != RelationshipKind::RoleAssignment || self.emitted[i] {
                continue;
            }
            let matches = graph.get(&rel.parent_identifier).is_some_and(&target);
            if matches
                && self.bound.contains(&rel.child_identifier)
                && self.bound.contains(&rel.parent_identifier)
            {
                self.commands.push(relate_command(rel, bindings)?);
                self.emitted[i] = true;
            }
        }
        Ok(())
    }

    fn finish(self, generated_at: Option<DateTime<Utc>>) -> Result<CompiledScript, EmitError> {
        let relationships = self.graph.relationships();
        let unplaced: Vec<&Relationship> = relationships
            .iter()
            .zip(&self.emitted)
            .filter(|(_, done)| !**done)
            .map(|(r, _)| r)
            .collect();
        if let Some(first) = unplaced.first() {
            return Err(EmitError::UnplacedRelationships {
                count: unplaced.len(),
                child: first.child_identifier.clone(),
                parent: first.parent_identifier.clone(),
            });
        }

        check_forward_references(&self.commands)?;

        let mut summary = ScriptSummary {
            truncations: self.graph.truncations().to_vec(),
            ..Default::default()
        };
        for entity in self.graph.entities() {
            *summary
                .entities
                .entry(entity.kind.as_str().to_string())
                .or_insert(0) += 1;
        }
        if self.graph.container().is_some() {
            summary.entities.insert(CONTAINER_KIND.to_string(), 1);
        }
        for rel in relationships {
            *summary
                .relationships
                .entry(rel.kind.as_str().to_string())
                .or_insert(0) += 1;
        }

        info!(
            commands = self.commands.len(),
            omitted_share_classes = summary.omitted_share_classes(),
            "script emitted"
        );

        Ok(CompiledScript {
            commands: self.commands,
            summary,
            generated_at,
        })
    }
}

// ============================================================================
// COMMAND BUILDERS
// ============================================================================

/// Attribute key → parameter name
fn param_name(key: &str) -> String {
    match key {
        "status" => "gleif-status".to_string(),
        "category" => "gleif-category".to_string(),
        "legal_form" => "legal-form-code".to_string(),
        "validation_level" => "gleif-validation-level".to_string(),
        other => other.replace('_', "-"),
    }
}

fn create_command(entity: &Entity, binding: &str, max_name_len: usize) -> Command {
    let verb = match entity.kind {
        EntityKind::LegalEntity => VERB_LEGAL_ENTITY,
        EntityKind::FundUmbrella => VERB_UMBRELLA,
        EntityKind::FundSubfund => VERB_SUBFUND,
        EntityKind::ShareClass => VERB_SHARE_CLASS,
    };
    let id_param = match entity.kind {
        EntityKind::ShareClass => "isin",
        _ => "lei",
    };
    let name = truncate_name(&entity.display_name, max_name_len);

    let mut command = Command::new(verb)
        .with_comment(name.clone())
        .str_param("name", name)
        .str_param(id_param, entity.identifier.clone());
    if let Some(jurisdiction) = &entity.jurisdiction {
        command = command.str_param("jurisdiction", jurisdiction.clone());
    }
    for (key, value) in &entity.attributes {
        let value = match key.as_str() {
            "hedged" | "placeholder" => ParamValue::Bool(value == "true"),
            _ => ParamValue::Str(value.clone()),
        };
        command = command.param(&param_name(key), value);
    }
    if let Some(terminus) = &entity.terminus {
        command = command.str_param("parent-exception", terminus.reason.clone());
    }
    command.binding(binding)
}

fn lookup<'b>(bindings: &'b BindingAllocator, identifier: &str) -> Result<&'b str, EmitError> {
    bindings
        .get(identifier)
        .ok_or_else(|| EmitError::MissingBinding(identifier.to_string()))
}

fn relate_command(rel: &Relationship, bindings: &BindingAllocator) -> Result<Command, EmitError> {
    let child = lookup(bindings, &rel.child_identifier)?;
    let parent = lookup(bindings, &rel.parent_identifier)?;

    let command = match rel.kind {
        RelationshipKind::Ownership => {
            let mut command = Command::new(VERB_OWNERSHIP)
                .ref_param("owner-entity-id", parent)
                .ref_param("owned-entity-id", child);
            if let Some(percentage) = rel.percentage {
                command = command.param("percentage", ParamValue::Number(percentage));
            }
            command = command.str_param(
                "ownership-type",
                rel.relationship_type.clone().unwrap_or_else(|| "DIRECT".to_string()),
            );
            if let Some(corroboration) = &rel.corroboration {
                command = command.str_param("corroboration", corroboration.clone());
            }
            command
        }
        RelationshipKind::RoleAssignment => Command::new(VERB_ROLE)
            .ref_param("cbu-id", child)
            .ref_param("entity-id", parent)
            .str_param("role", rel.role.clone().unwrap_or_default()),
        RelationshipKind::Containment => Command::new(VERB_CONTAINMENT)
            .ref_param("parent-fund-id", parent)
            .ref_param("child-fund-id", child),
    };
    Ok(command)
}

// ============================================================================
// TESTS
// ============================================================================
