//! Maps filter ids to factory functions.
//!
//! Chains are normally built against the process-wide registry, which is
//! pre-seeded with the built-in filters; an application can also carry
//! its own `FilterRegistry` when it wants isolation. Registration must
//! complete before any chain is constructed.

use std::collections::HashMap;
use std::sync::Mutex;

use lazy_static::lazy_static;

use crate::error::SiftError;
use crate::filters::bayes::BayesFilter;
use crate::filters::blacklist::BlacklistFilter;
use crate::filters::Filter;

pub type FilterFactory = fn() -> Box<dyn Filter>;

pub struct FilterRegistry {
    factories: HashMap<String, FilterFactory>,
}

impl FilterRegistry {
    /// An empty registry with no filters at all.
    pub fn new() -> Self {
        FilterRegistry {
            factories: HashMap::new(),
        }
    }

    /// A registry pre-seeded with the built-in filters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("blacklist", || Box::new(BlacklistFilter::new()));
        registry.register("bayes", || Box::new(BayesFilter::new()));
        registry
    }

    pub fn register(&mut self, id: &str, factory: FilterFactory) {
        if self.factories.insert(id.to_string(), factory).is_some() {
            log::warn!("Filter '{id}' registered twice, keeping the newer factory");
        }
    }

    pub fn build(&self, id: &str) -> Result<Box<dyn Filter>, SiftError> {
        self.factories
            .get(id)
            .map(|factory| factory())
            .ok_or_else(|| SiftError::UnknownFilter(id.to_string()))
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

lazy_static! {
    static ref GLOBAL_REGISTRY: Mutex<FilterRegistry> =
        Mutex::new(FilterRegistry::with_builtins());
}

/// Register a filter factory in the process-wide registry.
pub fn register_filter(id: &str, factory: FilterFactory) {
    GLOBAL_REGISTRY.lock().unwrap().register(id, factory);
}

/// Run `f` against the process-wide registry.
pub fn with_global<R>(f: impl FnOnce(&FilterRegistry) -> R) -> R {
    let registry = GLOBAL_REGISTRY.lock().unwrap();
    f(&registry)
}
