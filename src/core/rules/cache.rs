//! Per-evaluation lookup cache for cross-document dereferences
//!
//! One cache lives for exactly one request evaluation. The first resolution of
//! a path goes to the store; every later one returns the memoized outcome,
//! including "not found" and fetch failures. That gives:
//! - at most one store fetch per distinct path per evaluation
//! - a consistent view: two references to the same path see the same value

use crate::core::document::{Document, DocumentStore};
use crate::error::FetchError;
use ahash::AHashMap;
use std::sync::Arc;
use tracing::debug;

/// Memoized outcome of resolving one path
#[derive(Debug, Clone)]
enum Lookup {
    Found(Arc<Document>),
    NotFound,
    Failed(FetchError),
}

/// Memoizing resolver bound to a single evaluation
pub struct LookupCache<'s> {
    store: &'s dyn DocumentStore,
    entries: AHashMap<String, Lookup>,
    fetches: usize,
    budget: Option<usize>,
}

impl<'s> LookupCache<'s> {
    /// Create an empty cache in front of `store`
    pub fn new(store: &'s dyn DocumentStore) -> Self {
        LookupCache {
            store,
            entries: AHashMap::new(),
            fetches: 0,
            budget: None,
        }
    }

    /// Cap the number of store fetches; further misses fail with `BudgetExceeded`
    pub fn with_budget(mut self, budget: Option<usize>) -> Self {
        self.budget = budget;
        self
    }

    /// Pre-populate `path` with a known state (e.g. the request's snapshot)
    /// without touching the store
    pub fn seed(&mut self, path: &str, document: Option<Document>) {
        let entry = match document {
            Some(doc) => Lookup::Found(Arc::new(doc)),
            None => Lookup::NotFound,
        };
        self.entries.insert(path.to_string(), entry);
    }

    /// Resolve `path` (canonical form), fetching it on first use
    pub fn resolve(&mut self, path: &str) -> Result<Option<Arc<Document>>, FetchError> {
        if let Some(entry) = self.entries.get(path) {
            return Self::outcome(entry);
        }

        if let Some(limit) = self.budget {
            if self.fetches >= limit {
                debug!(path, limit, "Fetch budget exhausted");
                return Err(FetchError::BudgetExceeded { limit });
            }
        }

        self.fetches += 1;
        let entry = match self.store.get(path) {
            Ok(Some(doc)) => Lookup::Found(Arc::new(doc)),
            Ok(None) => Lookup::NotFound,
            Err(source) => Lookup::Failed(FetchError::Store {
                path: path.to_string(),
                source,
            }),
        };
        debug!(path, fetches = self.fetches, found = matches!(entry, Lookup::Found(_)), "Fetched document");

        let outcome = Self::outcome(&entry);
        self.entries.insert(path.to_string(), entry);
        outcome
    }

    fn outcome(entry: &Lookup) -> Result<Option<Arc<Document>>, FetchError> {
        match entry {
            Lookup::Found(doc) => Ok(Some(Arc::clone(doc))),
            Lookup::NotFound => Ok(None),
            Lookup::Failed(err) => Err(err.clone()),
        }
    }

    /// Number of store fetches performed so far
    pub fn fetches(&self) -> usize {
        self.fetches
    }

    /// Number of distinct paths held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
