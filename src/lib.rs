// Ownership Compiler - Core Library
// Registry ownership chains + fund exports → deterministic loader script

pub mod entities;
pub mod error;
pub mod diagnostics;
pub mod config;
pub mod deduplication;
pub mod normalizer;
pub mod source;
pub mod resolver;
pub mod assembler;
pub mod bindings;
pub mod emitter;
pub mod loader;
pub mod compiler;

// Re-export commonly used types
pub use entities::{Entity, EntityKind, Relationship, RelationshipKind, Terminus};
pub use error::{ConfigError, EmitError, FetchError, NormalizeError};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use config::{CompilerConfig, ContainerSpec, RoleSpec, RoleTarget};
pub use deduplication::{ConflictPolicy, DeduplicationEngine};
pub use normalizer::{
    normalize_fund_record, normalize_registry_record, normalize_share_class, FundListing,
    FundRecord, NormalizedEntity, NormalizedFund, NormalizedShareClass, RegistryRecord,
    ShareClassRecord,
};
pub use source::{
    FixtureRegistry, ListingKind, Listing, LookupCache, Page, RegistrySource, ThrottledSource,
};
pub use resolver::{ChainResolver, ChainTermination, ResolvedChain, StepOutcome};
pub use assembler::{assemble, Container, EntityGraph, GraphAssembler, Truncation};
pub use bindings::BindingAllocator;
pub use emitter::{
    check_forward_references, escape_string, truncate_name, Command, CompiledScript, ParamValue,
    ScriptEmitter, ScriptSummary,
};
pub use loader::{load_fund_file, FundExport};
pub use compiler::{CompileOutput, CompileRequest, Compiler};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
