// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Modules and their load state machine
//!
//! ```text
//! none -> fetching -> loading -> loaded -> executing -> executed
//!            \           \
//!             +-----------+--> error
//! ```
//!
//! Loading is callback driven. Every module keeps a queue of completion
//! callbacks; a second request for a module that is already fetching or
//! loading joins that queue instead of fetching again. A module becomes
//! `loaded` once each of its dependencies has settled, and `error` if any of
//! them failed, if its own fetch failed, or if one of its dependency edges
//! closes a cycle.

use crate::domain::{Domain, DomainInner, References};
use crate::error::{LoaderError, Result};
use crate::factory::{Definition, Exports, Factory};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Callback fired once a module settles
pub type LoadCallback = Box<dyn FnOnce() + Send + 'static>;

/// Load status of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Created, nothing requested
    None,
    /// Script requested from the host
    Fetching,
    /// Script ran; dependencies are loading
    Loading,
    /// Module and all dependencies loaded
    Loaded,
    /// Factory is running
    Executing,
    /// Exports are cached
    Executed,
    /// Loading or execution failed
    Error,
}

impl Status {
    fn progress(self) -> Option<u8> {
        match self {
            Self::None => Some(0),
            Self::Fetching => Some(1),
            Self::Loading => Some(2),
            Self::Loaded => Some(3),
            Self::Executing => Some(4),
            Self::Executed => Some(5),
            Self::Error => None,
        }
    }

    /// Whether this status is `milestone` or a later step on the success path
    ///
    /// `Error` is off the success path and has only reached itself.
    pub fn has_reached(self, milestone: Status) -> bool {
        match (self.progress(), milestone.progress()) {
            (Some(current), Some(target)) => current >= target,
            _ => self == milestone,
        }
    }

    /// Whether loading is over, successfully or not
    pub fn is_settled(self) -> bool {
        self == Self::Error || self.has_reached(Self::Loaded)
    }

    /// Whether a load is underway and later requests should wait for it
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Fetching | Self::Loading)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Fetching => "fetching",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Executing => "executing",
            Self::Executed => "executed",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

struct ModuleState {
    status: Status,
    references: Vec<String>,
    dependencies: Vec<Arc<Module>>,
    factory: Option<Factory>,
    exports: Option<Exports>,
    load_events: Vec<LoadCallback>,
    failure: Option<LoaderError>,
}

/// One loadable script
pub struct Module {
    url: String,
    seq: u64,
    domain: Weak<DomainInner>,
    state: Mutex<ModuleState>,
}

impl Module {
    pub(crate) fn new(domain: Weak<DomainInner>, url: &str) -> Result<Arc<Self>> {
        if url.is_empty() {
            return Err(LoaderError::argument("module URL must not be empty"));
        }
        Ok(Arc::new(Self {
            url: url.to_string(),
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
            domain,
            state: Mutex::new(ModuleState {
                status: Status::None,
                references: Vec::new(),
                dependencies: Vec::new(),
                factory: None,
                exports: None,
                load_events: Vec::new(),
                failure: None,
            }),
        }))
    }

    /// Canonical URL
    pub fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    /// Current status
    pub fn status(&self) -> Status {
        self.state.lock().status
    }

    /// Dependency identifiers as declared
    pub fn references(&self) -> Vec<String> {
        self.state.lock().references.clone()
    }

    /// Resolved dependencies, one per reference
    pub fn dependencies(&self) -> Vec<Arc<Module>> {
        self.state.lock().dependencies.clone()
    }

    /// The error recorded for this module, if any
    pub fn failure(&self) -> Option<LoaderError> {
        self.state.lock().failure.clone()
    }

    /// Whether a factory is waiting to run
    pub fn has_factory(&self) -> bool {
        self.state.lock().factory.is_some()
    }

    pub(crate) fn assign_references(&self, references: Vec<String>) {
        self.state.lock().references = references;
    }

    fn domain(&self) -> Result<Domain> {
        self.domain
            .upgrade()
            .map(Domain::from_inner)
            .ok_or(LoaderError::DomainDropped)
    }

    /// Fetch this module's script, then load its dependencies
    ///
    /// A module that was already requested is not fetched again; the callback
    /// joins the pending load or fires right away if loading is over.
    pub fn load(self: &Arc<Self>, callback: LoadCallback) {
        {
            let mut state = self.state.lock();
            if state.status != Status::None {
                drop(state);
                self.load_core(callback);
                return;
            }
            state.status = Status::Fetching;
            state.load_events.push(callback);
        }

        let domain = match self.domain() {
            Ok(domain) => domain,
            Err(e) => return self.fail(e),
        };
        let request = domain.open_request(&self.url);
        let fetcher = domain.fetcher();
        let module = Arc::clone(self);
        let task_domain = domain.clone();

        domain.spawn(async move {
            let id = request.id;
            let host = task_domain.host();
            let outcome = fetcher.fetch(host.as_ref(), request).await;
            let definition = task_domain.claim_definition(id);
            match outcome {
                Ok(()) => module.fetched(definition),
                Err(e) => module.fail(e),
            }
        });
    }

    /// Load this module's dependencies without fetching the module itself
    ///
    /// Settled modules fire the callback immediately; in-flight modules queue
    /// it; fresh modules start loading their references.
    pub fn load_core(self: &Arc<Self>, callback: LoadCallback) {
        let references = {
            let mut state = self.state.lock();
            if state.status.is_settled() {
                drop(state);
                callback();
                return;
            }
            state.load_events.push(callback);
            if state.status.is_in_flight() {
                return;
            }
            state.status = Status::Loading;
            state.references.clone()
        };
        self.load_dependencies(references);
    }

    fn fetched(self: &Arc<Self>, definition: Option<Definition>) {
        let references = {
            let mut state = self.state.lock();
            match definition {
                Some(definition) => {
                    state.references = definition.references;
                    state.factory = Some(definition.factory);
                }
                None => debug!(url = %self.url, "Script did not define a module"),
            }
            state.status = Status::Loading;
            state.references.clone()
        };
        self.load_dependencies(references);
    }

    fn load_dependencies(self: &Arc<Self>, references: Vec<String>) {
        let domain = match self.domain() {
            Ok(domain) => domain,
            Err(e) => return self.fail(e),
        };

        let mut dependencies = Vec::with_capacity(references.len());
        for reference in &references {
            let module = domain
                .resolve(reference, Some(self.url.as_str()))
                .and_then(|url| domain.module_for(&url));
            match module {
                Ok(module) => dependencies.push(module),
                Err(e) => return self.fail(e),
            }
        }
        self.state.lock().dependencies = dependencies.clone();
        debug!(url = %self.url, count = dependencies.len(), "Loading dependencies");

        // One extra count keeps completion from firing while edges are still
        // being registered.
        let remaining = Arc::new(AtomicUsize::new(dependencies.len() + 1));
        for dependency in dependencies {
            if let Some(path) = self.cycle_through(&dependency) {
                let error = LoaderError::cycle(&path);
                warn!(url = %self.url, error = %error, "Not waiting on circular dependency");
                self.record_failure(error);
                self.dependency_settled(&remaining);
                continue;
            }
            let module = Arc::clone(self);
            let remaining = Arc::clone(&remaining);
            dependency.load(Box::new(move || module.dependency_settled(&remaining)));
        }
        self.dependency_settled(&remaining);
    }

    fn cycle_through(self: &Arc<Self>, dependency: &Arc<Module>) -> Option<Vec<String>> {
        if Arc::ptr_eq(dependency, self) {
            return Some(vec![self.url.clone(), self.url.clone()]);
        }
        if dependency.status().is_settled() {
            return None;
        }
        let mut path = vec![self.url.clone()];
        let mut visited = HashSet::new();
        if dependency.reaches(self, &mut path, &mut visited) {
            path.push(self.url.clone());
            Some(path)
        } else {
            None
        }
    }

    fn reaches(
        &self,
        target: &Arc<Module>,
        path: &mut Vec<String>,
        visited: &mut HashSet<String>,
    ) -> bool {
        if !visited.insert(self.url.clone()) {
            return false;
        }
        path.push(self.url.clone());

        let (settled, dependencies) = {
            let state = self.state.lock();
            (state.status.is_settled(), state.dependencies.clone())
        };
        // Settled subtrees cannot lead back to a module that is still loading
        if !settled {
            for dependency in &dependencies {
                if Arc::ptr_eq(dependency, target)
                    || dependency.reaches(target, path, visited)
                {
                    return true;
                }
            }
        }

        path.pop();
        false
    }

    fn record_failure(&self, error: LoaderError) {
        let mut state = self.state.lock();
        if state.failure.is_none() {
            state.failure = Some(error);
        }
    }

    fn dependency_settled(self: &Arc<Self>, remaining: &AtomicUsize) {
        if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finish_loading();
        }
    }

    fn finish_loading(self: &Arc<Self>) {
        let dependencies = self.dependencies();
        let broken = dependencies
            .iter()
            .filter(|dependency| !Arc::ptr_eq(dependency, self))
            .find_map(|dependency| dependency.failure());

        let events = {
            let mut state = self.state.lock();
            match state.failure.clone().or(broken) {
                Some(error) => {
                    warn!(url = %self.url, error = %error, "Module failed to load");
                    state.status = Status::Error;
                    state.failure = Some(error);
                }
                None => {
                    debug!(url = %self.url, "Module loaded");
                    state.status = Status::Loaded;
                }
            }
            std::mem::take(&mut state.load_events)
        };
        for event in events {
            event();
        }
    }

    fn fail(self: &Arc<Self>, error: LoaderError) {
        let events = {
            let mut state = self.state.lock();
            warn!(url = %self.url, error = %error, "Module failed to load");
            state.status = Status::Error;
            state.failure = Some(error);
            std::mem::take(&mut state.load_events)
        };
        for event in events {
            event();
        }
    }

    /// Exports of this module, running the factory on first access
    ///
    /// The factory runs at most once. Later reads, including re-entrant reads
    /// from inside the factory, return the same exports cell.
    pub fn exports(self: &Arc<Self>) -> Result<Exports> {
        let (domain, exports, factory, dependencies) = {
            let mut state = self.state.lock();
            let domain = match state.status {
                Status::Loaded => self.domain()?,
                Status::Executing | Status::Executed => {
                    return state.exports.clone().ok_or_else(|| LoaderError::NotLoaded {
                        url: self.url.clone(),
                        status: state.status,
                    });
                }
                Status::Error => {
                    return Err(state
                        .failure
                        .clone()
                        .unwrap_or_else(|| LoaderError::fetch(&self.url, "module is broken")));
                }
                status => {
                    return Err(LoaderError::NotLoaded {
                        url: self.url.clone(),
                        status,
                    });
                }
            };
            let exports = Exports::new();
            state.status = Status::Executing;
            state.exports = Some(exports.clone());
            (domain, exports, state.factory.take(), state.dependencies.clone())
        };

        debug!(url = %self.url, "Executing factory");
        let require = Require {
            module: Arc::clone(self),
            domain,
            dependencies,
        };
        let outcome = match &factory {
            Some(factory) => factory.invoke(&require, &exports, self),
            None => Ok(None),
        };

        let mut state = self.state.lock();
        match outcome {
            Ok(returned) => {
                let exports = returned.map(Exports::from_value).unwrap_or(exports);
                state.exports = Some(exports.clone());
                state.status = Status::Executed;
                Ok(exports)
            }
            Err(e) => {
                let error = LoaderError::Factory {
                    url: self.url.clone(),
                    message: format!("{e:#}"),
                };
                state.exports = None;
                state.status = Status::Error;
                state.failure = Some(error.clone());
                Err(error)
            }
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Module")
            .field("url", &self.url)
            .field("status", &state.status)
            .field("references", &state.references)
            .finish()
    }
}

/// The `require` handed to a factory
///
/// Lookups are synchronous and restricted to the dependencies the factory
/// declared; nothing is fetched.
pub struct Require {
    module: Arc<Module>,
    domain: Domain,
    dependencies: Vec<Arc<Module>>,
}

impl Require {
    /// Exports of a declared dependency
    pub fn get(&self, reference: &str) -> Result<Exports> {
        let url = self.resolve(reference)?;
        let dependency = self
            .dependencies
            .iter()
            .find(|dependency| dependency.url() == url)
            .ok_or_else(|| LoaderError::DependencyNotFound {
                reference: reference.to_string(),
                url: self.module.url.clone(),
            })?;
        dependency.exports()
    }

    /// Canonical URL of an identifier, relative to the requiring module
    pub fn resolve(&self, reference: &str) -> Result<String> {
        self.domain.resolve(reference, Some(self.module.url.as_str()))
    }

    /// Load modules that were not declared statically
    pub fn load_async<F>(&self, references: impl Into<References>, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Vec<Exports>>) + Send + 'static,
    {
        self.domain.invoke(&self.module.url, references, callback)
    }

    /// The requiring module
    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }
}
