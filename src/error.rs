//! Error types for the compiler passes.

use thiserror::Error;

/// Failure of a single external lookup. Never escapes the resolver.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("registry returned status {status} for {identifier}")]
    Status { identifier: String, status: u16 },

    #[error("registry unreachable: {0}")]
    Unavailable(String),

    #[error("malformed registry response for {identifier}: {reason}")]
    Malformed { identifier: String, reason: String },
}

/// A source record that cannot become an entity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("{record} record is missing required field `{field}`")]
    MissingField {
        record: &'static str,
        field: &'static str,
    },
}

/// Structural violation detected while writing the script.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmitError {
    #[error("command {index} references unbound name @{binding}")]
    UnboundReference { index: usize, binding: String },

    #[error("name @{binding} bound twice (commands {first} and {second})")]
    DuplicateBinding {
        binding: String,
        first: usize,
        second: usize,
    },

    #[error("no binding allocated for {0}")]
    MissingBinding(String),

    #[error("{count} relationship(s) could not be placed, first: {child} -> {parent}")]
    UnplacedRelationships {
        count: usize,
        child: String,
        parent: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
