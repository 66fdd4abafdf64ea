// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module registry of a domain

use crate::module::Module;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

/// Thread-safe table of every module created in a domain
///
/// Keyed by canonical URL, so a URL maps to at most one module. Modules are
/// never evicted.
pub struct ModuleRegistry {
    modules: DashMap<String, Arc<Module>>,
}

impl ModuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            modules: DashMap::new(),
        }
    }

    /// Get a module by canonical URL
    pub fn get(&self, url: &str) -> Option<Arc<Module>> {
        self.modules.get(url).map(|entry| Arc::clone(entry.value()))
    }

    /// Check if a module is registered
    pub fn has(&self, url: &str) -> bool {
        self.modules.contains_key(url)
    }

    /// Get the module for `url`, creating it with `make` if absent
    ///
    /// The boolean is `true` when the module was created by this call.
    pub fn get_or_insert_with(
        &self,
        url: &str,
        make: impl FnOnce() -> Arc<Module>,
    ) -> (Arc<Module>, bool) {
        match self.modules.entry(url.to_string()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let module = make();
                entry.insert(Arc::clone(&module));
                (module, true)
            }
        }
    }

    /// All modules in creation order
    pub fn modules(&self) -> Vec<Arc<Module>> {
        let mut modules: Vec<_> = self
            .modules
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        modules.sort_by_key(|module| module.seq());
        modules
    }

    /// All canonical URLs in creation order
    pub fn urls(&self) -> Vec<String> {
        self.modules()
            .iter()
            .map(|module| module.url().to_string())
            .collect()
    }

    /// Get the number of registered modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
