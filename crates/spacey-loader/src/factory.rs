// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module factories and exports

use crate::error::{LoaderError, Result};
use crate::module::{Module, Require};
use crate::scanner::scan_dependencies;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Signature of a factory body
///
/// Receives the module's `require`, its fresh exports object and the module
/// itself. Returning `Some(value)` replaces the exports object.
pub type FactoryFn =
    dyn Fn(&Require, &Exports, &Module) -> anyhow::Result<Option<Value>> + Send + Sync;

/// A module definition function
///
/// The source text is what the scanner reads to discover dependencies. The
/// body is optional: an inert factory only carries source and produces an
/// empty exports object, which is enough for static graph analysis.
#[derive(Clone)]
pub struct Factory {
    source: Arc<str>,
    body: Option<Arc<FactoryFn>>,
}

impl Factory {
    /// Create a factory from its source text and executable body
    pub fn new<F>(source: impl Into<Arc<str>>, body: F) -> Self
    where
        F: Fn(&Require, &Exports, &Module) -> anyhow::Result<Option<Value>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            source: source.into(),
            body: Some(Arc::new(body)),
        }
    }

    /// Create a source-only factory
    pub fn inert(source: impl Into<Arc<str>>) -> Self {
        Self {
            source: source.into(),
            body: None,
        }
    }

    /// The factory's source text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the factory has an executable body
    pub fn is_inert(&self) -> bool {
        self.body.is_none()
    }

    pub(crate) fn invoke(
        &self,
        require: &Require,
        exports: &Exports,
        module: &Module,
    ) -> anyhow::Result<Option<Value>> {
        match &self.body {
            Some(body) => body(require, exports, module),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("source", &self.source)
            .field("inert", &self.body.is_none())
            .finish()
    }
}

/// A factory together with the references scanned from its source
#[derive(Debug, Clone)]
pub struct Definition {
    /// The factory
    pub factory: Factory,
    /// Dependency identifiers in declaration order
    pub references: Vec<String>,
}

impl Definition {
    /// Scan a factory and build its definition
    ///
    /// A factory without source text is not a function and is rejected.
    pub fn from_factory(factory: Factory) -> Result<Self> {
        if factory.source().trim().is_empty() {
            return Err(LoaderError::argument("define() expects a factory function"));
        }
        let references = scan_dependencies(factory.source());
        Ok(Self {
            factory,
            references,
        })
    }
}

/// Shared exports cell of a module
///
/// Clones share the same cell, so every reader of a module's exports observes
/// the same value, including writes made later through `set`.
#[derive(Debug, Clone)]
pub struct Exports(Arc<RwLock<Value>>);

impl Exports {
    /// Create an empty exports object
    pub fn new() -> Self {
        Self::from_value(Value::Object(Map::new()))
    }

    /// Wrap an arbitrary value
    pub fn from_value(value: Value) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Read a property, if the exports value is an object
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.read().get(key).cloned()
    }

    /// Set a property, turning a non-object value into an object first
    pub fn set(&self, key: impl Into<String>, value: Value) {
        let mut guard = self.0.write();
        if !guard.is_object() {
            *guard = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut *guard {
            map.insert(key.into(), value);
        }
    }

    /// Snapshot of the current value
    pub fn value(&self) -> Value {
        self.0.read().clone()
    }

    /// Whether both handles point at the same exports cell
    pub fn ptr_eq(&self, other: &Exports) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Exports {
    fn default() -> Self {
        Self::new()
    }
}
