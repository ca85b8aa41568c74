// 🏷️ Binding Allocator - identifier → stable script variable name
//
// Names derive from display names, collisions get a SHA-256 suffix of the
// identifier. No counters, so re-running on unchanged input gives the same
// bindings.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::config::CompilerConfig;

/// Prefix for bindings that would otherwise start with a digit or be empty
const NUMERIC_PREFIX: &str = "n";

pub struct BindingAllocator {
    max_len: usize,
    suffix_len: usize,
    by_identifier: HashMap<String, String>,
    by_binding: HashMap<String, String>,
    order: Vec<(String, String)>,
}

impl BindingAllocator {
    pub fn new(max_len: usize, suffix_len: usize) -> Self {
        BindingAllocator {
            max_len,
            suffix_len,
            by_identifier: HashMap::new(),
            by_binding: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn from_config(config: &CompilerConfig) -> Self {
        Self::new(config.binding_max_len, config.hash_suffix_len)
    }

    /// Idempotent per identifier
    pub fn allocate(&mut self, identifier: &str, display_name: &str) -> String {
        if let Some(existing) = self.by_identifier.get(identifier) {
            return existing.clone();
        }

        let source = if display_name.chars().any(|c| c.is_ascii_alphanumeric()) {
            display_name
        } else {
            identifier
        };
        let base = truncate_base(&slugify(source), self.max_len);

        let binding = if !base.is_empty() && !self.by_binding.contains_key(&base) {
            base
        } else {
            self.suffixed(&base, identifier)
        };

        self.by_identifier
            .insert(identifier.to_string(), binding.clone());
        self.by_binding
            .insert(binding.clone(), identifier.to_string());
        self.order.push((identifier.to_string(), binding.clone()));
        binding
    }

    fn suffixed(&self, base: &str, identifier: &str) -> String {
        let hash = hex_digest(identifier);

        for len in self.suffix_len..=hash.len() {
            let suffix = &hash[..len];
            let room = self.max_len.saturating_sub(len + 1);
            let stem = truncate_base(base, room);
            let stem = if stem.is_empty() { NUMERIC_PREFIX } else { stem.as_str() };
            let candidate = format!("{}_{}", stem, suffix);
            if !self.by_binding.contains_key(&candidate) {
                return candidate;
            }
        }

        // Full digest of a distinct identifier cannot be taken
        format!("{}_{}", NUMERIC_PREFIX, hash)
    }

    pub fn get(&self, identifier: &str) -> Option<&str> {
        self.by_identifier.get(identifier).map(String::as_str)
    }

    pub fn identifier_for(&self, binding: &str) -> Option<&str> {
        self.by_binding.get(binding).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// (identifier, binding) in allocation order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order.iter().map(|(i, b)| (i.as_str(), b.as_str()))
    }
}

/// Lower-case, runs of anything outside [a-z0-9] become one `_`
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_separator = false;

    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push(c);
        } else {
            pending_separator = true;
        }
    }

    if slug.starts_with(|c: char| c.is_ascii_digit()) {
        slug = format!("{}_{}", NUMERIC_PREFIX, slug);
    }
    slug
}

/// Slugs are ASCII, so byte truncation is char-safe
fn truncate_base(base: &str, max_len: usize) -> String {
    let cut = &base[..base.len().min(max_len)];
    cut.trim_end_matches('_').to_string()
}

fn hex_digest(identifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identifier.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn is_valid_binding(binding: &str) -> bool {
    let mut chars = binding.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator() -> BindingAllocator {
        BindingAllocator::new(40, 8)
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Allianz Global Investors GmbH"), "allianz_global_investors_gmbh");
        assert_eq!(slugify("  --Allianz SE-- "), "allianz_se");
        assert_eq!(slugify("3i Group plc"), "n_3i_group_plc");
        assert_eq!(slugify("Société Générale"), "soci_t_g_n_rale");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_collision_gets_hash_suffix() {
        let mut bindings = allocator();

        let first = bindings.allocate("LEI1", "Allianz Fund");
        let second = bindings.allocate("LEI2", "ALLIANZ FUND");

        assert_eq!(first, "allianz_fund");
        assert_eq!(second, format!("allianz_fund_{}", &hex_digest("LEI2")[..8]));
        assert_ne!(first, second);
    }

    #[test]
    fn test_idempotent_per_identifier() {
        let mut bindings = allocator();

        let first = bindings.allocate("LEI1", "Allianz SE");
        let again = bindings.allocate("LEI1", "Something Else");

        assert_eq!(first, again);
        assert_eq!(bindings.len(), 1);
    }

    #[test]
    fn test_name_without_alphanumerics_uses_identifier() {
        let mut bindings = allocator();
        assert_eq!(bindings.allocate("529900K9B0N5BT694847", "***"), "n_529900k9b0n5bt694847");
    }

    #[test]
    fn test_length_bound_with_suffix() {
        let mut bindings = allocator();
        let long = "Allianz Global Investors Fund Europe Equity Growth Select";

        let first = bindings.allocate("A", long);
        let second = bindings.allocate("B", long);

        assert!(first.len() <= 40);
        assert!(second.len() <= 40);
        assert!(is_valid_binding(&first));
        assert!(is_valid_binding(&second));
        assert_ne!(first, second);
    }

    #[test]
    fn test_bijective_and_stable_across_runs() {
        let names = [
            ("A", "Alpha"),
            ("B", "Alpha"),
            ("C", "alpha"),
            ("D", "Alpha!"),
            ("E", "Beta"),
        ];

        let run = || {
            let mut bindings = allocator();
            for (id, name) in names {
                bindings.allocate(id, name);
            }
            bindings.iter().map(|(i, b)| (i.to_string(), b.to_string())).collect::<Vec<_>>()
        };

        let first = run();
        assert_eq!(first, run());

        let mut distinct: Vec<_> = first.iter().map(|(_, b)| b.clone()).collect();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), names.len());
    }

    #[test]
    fn test_valid_binding_shape() {
        assert!(is_valid_binding("allianz_se"));
        assert!(is_valid_binding("n_3i"));
        assert!(!is_valid_binding("3i"));
        assert!(!is_valid_binding("_x"));
        assert!(!is_valid_binding(""));
    }
}
