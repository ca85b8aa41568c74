// 🌐 Registry Source - the only place the compiler touches external data
//
// `RegistrySource` is the seam: a fixture file in tests and the CLI, a live
// client elsewhere. Rate limiting, pagination and memoisation are layered on
// top as plain wrappers.

use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::FetchError;
use crate::normalizer::{normalize_identifier, RegistryRecord};

// ============================================================================
// SOURCE TRAIT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingKind {
    /// Direct subsidiaries of the scope entity
    Children,

    /// Funds managed by the scope entity
    ManagedFunds,
}

impl ListingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingKind::Children => "children",
            ListingKind::ManagedFunds => "managed_funds",
        }
    }
}

/// One page of a listing. Pages are numbered from 1.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<RegistryRecord>,
    pub next_page: Option<usize>,
}

pub trait RegistrySource {
    /// `Ok(None)` means the registry has no record for the identifier
    fn fetch_entity(&mut self, identifier: &str) -> Result<Option<RegistryRecord>, FetchError>;

    fn fetch_page(
        &mut self,
        scope: &str,
        kind: ListingKind,
        page: usize,
    ) -> Result<Page, FetchError>;
}

impl<S: RegistrySource + ?Sized> RegistrySource for &mut S {
    fn fetch_entity(&mut self, identifier: &str) -> Result<Option<RegistryRecord>, FetchError> {
        (**self).fetch_entity(identifier)
    }

    fn fetch_page(
        &mut self,
        scope: &str,
        kind: ListingKind,
        page: usize,
    ) -> Result<Page, FetchError> {
        (**self).fetch_page(scope, kind, page)
    }
}

// ============================================================================
// LISTING - lazy, restartable, page-guarded
// ============================================================================

pub struct Listing<'a, S: RegistrySource> {
    source: &'a mut S,
    scope: String,
    kind: ListingKind,
    max_pages: usize,
    next_page: Option<usize>,
    pages_fetched: usize,
    buffer: VecDeque<RegistryRecord>,
    hit_page_limit: bool,
}

impl<'a, S: RegistrySource> Listing<'a, S> {
    pub fn new(source: &'a mut S, scope: &str, kind: ListingKind, max_pages: usize) -> Self {
        Listing {
            source,
            scope: scope.to_string(),
            kind,
            max_pages,
            next_page: Some(1),
            pages_fetched: 0,
            buffer: VecDeque::new(),
            hit_page_limit: false,
        }
    }

    /// Start again from page 1; nothing already yielded is remembered
    pub fn restart(&mut self) {
        self.next_page = Some(1);
        self.pages_fetched = 0;
        self.buffer.clear();
        self.hit_page_limit = false;
    }

    /// True once the guard stopped a listing that announced more pages
    pub fn hit_page_limit(&self) -> bool {
        self.hit_page_limit
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }
}

impl<'a, S: RegistrySource> Iterator for Listing<'a, S> {
    type Item = Result<RegistryRecord, FetchError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(Ok(record));
            }

            let page = self.next_page?;
            if self.pages_fetched >= self.max_pages {
                self.hit_page_limit = true;
                self.next_page = None;
                return None;
            }

            debug!(scope = %self.scope, listing = self.kind.as_str(), page, "fetching listing page");
            match self.source.fetch_page(&self.scope, self.kind, page) {
                Ok(fetched) => {
                    self.pages_fetched += 1;
                    self.next_page = fetched.next_page;
                    self.buffer.extend(fetched.records);
                }
                Err(e) => {
                    self.next_page = None;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Drain a listing; failures end it early and are reported, never raised
pub fn collect_listing<S: RegistrySource>(
    source: &mut S,
    scope: &str,
    kind: ListingKind,
    max_pages: usize,
    diagnostics: &mut Diagnostics,
) -> Vec<RegistryRecord> {
    let mut listing = Listing::new(source, scope, kind, max_pages);
    let mut records = Vec::new();

    for item in listing.by_ref() {
        match item {
            Ok(record) => records.push(record),
            Err(e) => {
                diagnostics.push(Diagnostic::FetchFailed {
                    identifier: scope.to_string(),
                    error: e.to_string(),
                });
                break;
            }
        }
    }

    if listing.hit_page_limit() {
        diagnostics.push(Diagnostic::PageLimitReached {
            scope: scope.to_string(),
            listing: kind.as_str().to_string(),
            max_pages,
        });
    }

    records
}

// ============================================================================
// LOOKUP CACHE - one per compile run
// ============================================================================

#[derive(Debug, Default)]
pub struct LookupCache {
    entries: HashMap<String, Option<RegistryRecord>>,
    hits: usize,
    misses: usize,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful answers (including "not found") are memoised; errors are not
    pub fn get_or_fetch<S: RegistrySource>(
        &mut self,
        source: &mut S,
        identifier: &str,
    ) -> Result<Option<RegistryRecord>, FetchError> {
        let key = normalize_identifier(identifier);
        if let Some(cached) = self.entries.get(&key) {
            self.hits += 1;
            return Ok(cached.clone());
        }

        self.misses += 1;
        let fetched = source.fetch_entity(&key)?;
        self.entries.insert(key, fetched.clone());
        Ok(fetched)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.contains_key(&normalize_identifier(identifier))
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }
}

// ============================================================================
// THROTTLED SOURCE
// ============================================================================

/// Enforces a minimum delay between successive calls to the inner source
pub struct ThrottledSource<S> {
    inner: S,
    delay: Duration,
    last_call: Option<Instant>,
}

impl<S: RegistrySource> ThrottledSource<S> {
    pub fn new(inner: S, delay_ms: u64) -> Self {
        ThrottledSource {
            inner,
            delay: Duration::from_millis(delay_ms),
            last_call: None,
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn wait_turn(&mut self) {
        if let Some(last) = self.last_call {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                thread::sleep(self.delay - elapsed);
            }
        }
        self.last_call = Some(Instant::now());
    }
}

impl<S: RegistrySource> RegistrySource for ThrottledSource<S> {
    fn fetch_entity(&mut self, identifier: &str) -> Result<Option<RegistryRecord>, FetchError> {
        self.wait_turn();
        self.inner.fetch_entity(identifier)
    }

    fn fetch_page(
        &mut self,
        scope: &str,
        kind: ListingKind,
        page: usize,
    ) -> Result<Page, FetchError> {
        self.wait_turn();
        self.inner.fetch_page(scope, kind, page)
    }
}

// ============================================================================
// FIXTURE REGISTRY - JSON stand-in for the live registry
// ============================================================================

fn default_page_size() -> usize {
    100
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureRegistry {
    /// Records keyed by identifier
    #[serde(default)]
    pub entities: BTreeMap<String, RegistryRecord>,

    /// scope identifier → direct subsidiaries
    #[serde(default)]
    pub children: BTreeMap<String, Vec<String>>,

    /// scope identifier → managed funds
    #[serde(default)]
    pub managed_funds: BTreeMap<String, Vec<String>>,

    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// identifier → HTTP-like status returned instead of data
    #[serde(default)]
    pub failures: BTreeMap<String, u16>,

    #[serde(skip)]
    entity_calls: usize,
}

impl FixtureRegistry {
    pub fn new() -> Self {
        FixtureRegistry {
            page_size: default_page_size(),
            ..Default::default()
        }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let fixture: FixtureRegistry =
            serde_json::from_str(content).context("Failed to parse registry fixture JSON")?;
        Ok(fixture.normalized())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read registry fixture: {:?}", path.as_ref()))?;
        Self::from_json(&content)
    }

    /// Builder pattern: add a record under its own identifier
    pub fn with_entity(mut self, record: RegistryRecord) -> Self {
        self.entities.insert(normalize_identifier(&record.lei), record);
        self
    }

    pub fn with_children(mut self, scope: &str, children: &[&str]) -> Self {
        self.children.insert(
            normalize_identifier(scope),
            children.iter().map(|c| normalize_identifier(c)).collect(),
        );
        self
    }

    pub fn with_managed_funds(mut self, scope: &str, funds: &[&str]) -> Self {
        self.managed_funds.insert(
            normalize_identifier(scope),
            funds.iter().map(|f| normalize_identifier(f)).collect(),
        );
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_failure(mut self, identifier: &str, status: u16) -> Self {
        self.failures.insert(normalize_identifier(identifier), status);
        self
    }

    /// Number of `fetch_entity` calls served so far
    pub fn entity_calls(&self) -> usize {
        self.entity_calls
    }

    fn normalized(self) -> Self {
        let upper_keys = |map: BTreeMap<String, Vec<String>>| {
            map.into_iter()
                .map(|(k, v)| {
                    (
                        normalize_identifier(&k),
                        v.iter().map(|id| normalize_identifier(id)).collect(),
                    )
                })
                .collect()
        };

        FixtureRegistry {
            entities: self
                .entities
                .into_iter()
                .map(|(k, mut record)| {
                    if record.lei.trim().is_empty() {
                        record.lei = k.clone();
                    }
                    (normalize_identifier(&k), record)
                })
                .collect(),
            children: upper_keys(self.children),
            managed_funds: upper_keys(self.managed_funds),
            page_size: self.page_size.max(1),
            failures: self
                .failures
                .into_iter()
                .map(|(k, v)| (normalize_identifier(&k), v))
                .collect(),
            entity_calls: 0,
        }
    }

    fn check_failure(&self, identifier: &str) -> Result<(), FetchError> {
        match self.failures.get(identifier) {
            Some(&status) => Err(FetchError::Status {
                identifier: identifier.to_string(),
                status,
            }),
            None => Ok(()),
        }
    }
}

impl RegistrySource for FixtureRegistry {
    fn fetch_entity(&mut self, identifier: &str) -> Result<Option<RegistryRecord>, FetchError> {
        self.entity_calls += 1;
        let key = normalize_identifier(identifier);
        self.check_failure(&key)?;
        Ok(self.entities.get(&key).cloned())
    }

    fn fetch_page(
        &mut self,
        scope: &str,
        kind: ListingKind,
        page: usize,
    ) -> Result<Page, FetchError> {
        let key = normalize_identifier(scope);
        self.check_failure(&key)?;

        let listed = match kind {
            ListingKind::Children => self.children.get(&key),
            ListingKind::ManagedFunds => self.managed_funds.get(&key),
        };
        let Some(listed) = listed else {
            return Ok(Page::default());
        };

        let page_size = self.page_size.max(1);
        let start = page.saturating_sub(1) * page_size;
        let end = (start + page_size).min(listed.len());
        if start >= listed.len() {
            return Ok(Page::default());
        }

        // Listed but unknown identifiers come back as bare records
        let records = listed[start..end]
            .iter()
            .map(|id| {
                self.entities.get(id).cloned().unwrap_or_else(|| RegistryRecord {
                    lei: id.clone(),
                    ..Default::default()
                })
            })
            .collect();

        Ok(Page {
            records,
            next_page: (end < listed.len()).then_some(page + 1),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
