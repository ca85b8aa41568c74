// ⚙️ Compiler Configuration - Rules as Data
// Every limit the compiler enforces lives here, loadable from a JSON file.

use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::deduplication::ConflictPolicy;
use crate::error::ConfigError;

// ============================================================================
// CONTAINER (business unit) SPEC
// ============================================================================

/// Which entity a container role points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleTarget {
    /// Last entity of the resolved chain
    Apex,

    /// Entity the walk started from
    Start,

    /// Any identifier already in the graph
    Identifier(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub role: String,
    pub target: RoleTarget,
}

impl RoleSpec {
    pub fn new(role: &str, target: RoleTarget) -> Self {
        RoleSpec {
            role: role.to_string(),
            target,
        }
    }
}

/// The single client business unit every fund is onboarded under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,

    #[serde(default)]
    pub jurisdiction: Option<String>,

    #[serde(default = "default_client_type")]
    pub client_type: String,

    /// Roles assigned to legal entities right after the container
    #[serde(default = "default_roles")]
    pub roles: Vec<RoleSpec>,

    /// Role every fund gets on the container (None = no fund roles)
    #[serde(default = "default_fund_role")]
    pub fund_role: Option<String>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>) -> Self {
        ContainerSpec {
            name: name.into(),
            jurisdiction: None,
            client_type: default_client_type(),
            roles: default_roles(),
            fund_role: default_fund_role(),
        }
    }
}

fn default_client_type() -> String {
    "FUND".to_string()
}

fn default_roles() -> Vec<RoleSpec> {
    vec![
        RoleSpec::new("ULTIMATE_CLIENT", RoleTarget::Apex),
        RoleSpec::new("INVESTMENT_MANAGER", RoleTarget::Start),
        RoleSpec::new("MANAGEMENT_COMPANY", RoleTarget::Start),
    ]
}

fn default_fund_role() -> Option<String> {
    Some("ASSET_OWNER".to_string())
}

// ============================================================================
// COMPILER CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Maximum entities appended by one ownership walk
    pub max_depth: usize,

    /// Share classes kept per fund
    pub share_class_cap: usize,

    /// Maximum length of a binding name, hash suffix included
    pub binding_max_len: usize,

    /// Hex characters of SHA-256 appended on collision
    pub hash_suffix_len: usize,

    /// Display names longer than this are cut with "..."
    pub max_name_len: usize,

    /// Fixed sleep between successive registry calls
    pub fetch_delay_ms: u64,

    /// Guard for paginated listings
    pub max_pages: usize,

    pub conflict_policy: ConflictPolicy,

    /// Legal-structure tags that make a fund an umbrella
    pub umbrella_structures: Vec<String>,

    /// Pull the one-level subsidiary listing of the start entity
    pub include_subsidiaries: bool,

    /// Pull the managed-fund listing of the start entity
    pub include_managed_funds: bool,

    pub container: Option<ContainerSpec>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            max_depth: 10,
            share_class_cap: 50,
            binding_max_len: 40,
            hash_suffix_len: 8,
            max_name_len: 200,
            fetch_delay_ms: 500,
            max_pages: 50,
            conflict_policy: ConflictPolicy::FirstSeen,
            umbrella_structures: vec![
                "SICAV".to_string(),
                "ICAV".to_string(),
                "UMBRELLA".to_string(),
            ],
            include_subsidiaries: true,
            include_managed_funds: false,
            container: None,
        }
    }
}

impl CompilerConfig {
    /// Load config from JSON file (missing fields take defaults)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: CompilerConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth == 0 {
            return Err(invalid("max_depth", "must be at least 1"));
        }
        if self.share_class_cap == 0 {
            return Err(invalid("share_class_cap", "must be at least 1"));
        }
        if !(6..=16).contains(&self.hash_suffix_len) {
            return Err(invalid(
                "hash_suffix_len",
                format!("{} is outside 6..=16", self.hash_suffix_len),
            ));
        }
        // room for a short base, the separator and the suffix
        if self.binding_max_len < 16 || self.binding_max_len <= self.hash_suffix_len + 4 {
            return Err(invalid(
                "binding_max_len",
                format!("{} is too short", self.binding_max_len),
            ));
        }
        if self.max_name_len < 8 {
            return Err(invalid("max_name_len", "must be at least 8"));
        }
        if self.max_pages == 0 {
            return Err(invalid("max_pages", "must be at least 1"));
        }
        if let Some(container) = &self.container {
            if container.name.trim().is_empty() {
                return Err(invalid("container.name", "must not be empty"));
            }
        }
        Ok(())
    }

    pub fn is_umbrella_structure(&self, legal_structure: &str) -> bool {
        let tag = legal_structure.trim().to_uppercase();
        self.umbrella_structures
            .iter()
            .any(|u| tag == u.to_uppercase() || tag.contains(&u.to_uppercase()))
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
