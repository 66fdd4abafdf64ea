// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Resolution and loading context
//!
//! A [`Domain`] owns the configuration used to turn identifiers into
//! canonical URLs, the registry of every module it created, and the table of
//! open script requests that fetched scripts register their definitions
//! against.
//!
//! Identifier resolution runs, in this order:
//!
//! 1. library substitution (whole identifier)
//! 2. path alias substitution (`alias/rest`)
//! 3. `{var}` substitution
//! 4. `.js` extension normalization
//! 5. absolutization against the referrer or the base URL

use crate::config::{DomainConfig, Setup};
use crate::error::{LoaderError, Result};
use crate::factory::{Definition, Exports, Factory};
use crate::fetcher::{FetchStrategy, RequestId, ScriptFetcher, ScriptHost, ScriptRequest};
use crate::module::Module;
use crate::registry::ModuleRegistry;
use crate::uri;
use dashmap::DashMap;
use parking_lot::RwLock;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Weak};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

static PATHS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^/:]+)(/.+)$").expect("valid regex"));

static VARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]+)\}").expect("valid regex"));

/// Dependency identifiers passed to `invoke`, `run` and `load`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct References(Vec<String>);

impl References {
    /// Validate and unwrap the identifiers
    pub fn into_vec(self) -> Result<Vec<String>> {
        if self.0.iter().any(String::is_empty) {
            return Err(LoaderError::argument("module identifiers must not be empty"));
        }
        Ok(self.0)
    }
}

impl From<&str> for References {
    fn from(reference: &str) -> Self {
        Self(vec![reference.to_string()])
    }
}

impl From<String> for References {
    fn from(reference: String) -> Self {
        Self(vec![reference])
    }
}

impl From<Vec<String>> for References {
    fn from(references: Vec<String>) -> Self {
        Self(references)
    }
}

impl From<Vec<&str>> for References {
    fn from(references: Vec<&str>) -> Self {
        Self(references.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for References {
    fn from(references: &[&str]) -> Self {
        Self(references.iter().map(|r| r.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for References {
    fn from(references: [&str; N]) -> Self {
        Self(references.iter().map(|r| r.to_string()).collect())
    }
}

struct Settings {
    config: DomainConfig,
    base_url: String,
    strategy: FetchStrategy,
}

pub(crate) struct DomainInner {
    settings: RwLock<Settings>,
    registry: ModuleRegistry,
    requests: DashMap<RequestId, Option<Definition>>,
    next_request: AtomicU64,
    next_run: AtomicU64,
    host: Arc<dyn ScriptHost>,
    runtime: Handle,
}

/// Resolution context and module registry
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Domain {
    inner: Arc<DomainInner>,
}

impl Domain {
    /// Create a domain that fetches scripts through `host`
    ///
    /// Must be called from within a tokio runtime; fetches are spawned on it.
    pub fn new(config: DomainConfig, host: Arc<dyn ScriptHost>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| LoaderError::Runtime(format!("a domain needs a tokio runtime: {e}")))?;
        let base_url = compute_base_url(&config.base_url, config.location.as_deref());
        let strategy = FetchStrategy::detect(host.as_ref(), config.poll_interval());
        info!(base_url = %base_url, strategy = ?strategy, "Created module domain");

        Ok(Self {
            inner: Arc::new(DomainInner {
                settings: RwLock::new(Settings {
                    config,
                    base_url,
                    strategy,
                }),
                registry: ModuleRegistry::new(),
                requests: DashMap::new(),
                next_request: AtomicU64::new(1),
                next_run: AtomicU64::new(1),
                host,
                runtime,
            }),
        })
    }

    pub(crate) fn from_inner(inner: Arc<DomainInner>) -> Self {
        Self { inner }
    }

    /// Merge a configuration update
    pub fn configure(&self, setup: Setup) -> Result<()> {
        if setup.charset.as_deref().is_some_and(str::is_empty) {
            return Err(LoaderError::Config("charset must not be empty".to_string()));
        }
        let mut settings = self.inner.settings.write();
        settings.config.apply(setup);
        settings.base_url =
            compute_base_url(&settings.config.base_url, settings.config.location.as_deref());
        settings.strategy =
            FetchStrategy::detect(self.inner.host.as_ref(), settings.config.poll_interval());
        debug!(base_url = %settings.base_url, "Reconfigured module domain");
        Ok(())
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> DomainConfig {
        self.inner.settings.read().config.clone()
    }

    /// The absolute base URL, always ending in `/`
    pub fn base_url(&self) -> String {
        self.inner.settings.read().base_url.clone()
    }

    /// Turn an identifier into a canonical URL
    ///
    /// Relative identifiers are resolved against `referrer`'s directory, or
    /// against the base URL when there is no referrer.
    pub fn resolve(&self, id: &str, referrer: Option<&str>) -> Result<String> {
        if id.is_empty() {
            return Err(LoaderError::argument("cannot resolve an empty identifier"));
        }
        let settings = self.inner.settings.read();
        let config = &settings.config;

        let id = substitute_library(id, &config.libraries);
        let id = substitute_paths(&id, &config.paths);
        let id = substitute_vars(&id, &config.vars);
        let id = uri::normalize_extension(&id);
        Ok(absolutize(&id, referrer, &settings.base_url))
    }

    /// Module registered under a canonical URL
    pub fn module(&self, url: &str) -> Option<Arc<Module>> {
        self.inner.registry.get(url)
    }

    /// Every module of this domain in creation order
    pub fn modules(&self) -> Vec<Arc<Module>> {
        self.inner.registry.modules()
    }

    /// Module registry
    pub fn registry(&self) -> &ModuleRegistry {
        &self.inner.registry
    }

    pub(crate) fn module_for(&self, url: &str) -> Result<Arc<Module>> {
        if let Some(module) = self.inner.registry.get(url) {
            return Ok(module);
        }
        let candidate = Module::new(Arc::downgrade(&self.inner), url)?;
        let (module, created) = self
            .inner
            .registry
            .get_or_insert_with(url, || candidate);
        if created {
            debug!(url = %url, "Registered module");
        }
        Ok(module)
    }

    /// The script host
    pub fn host(&self) -> Arc<dyn ScriptHost> {
        Arc::clone(&self.inner.host)
    }

    pub(crate) fn fetcher(&self) -> ScriptFetcher {
        ScriptFetcher::new(self.inner.settings.read().strategy)
    }

    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.runtime.spawn(future);
    }

    pub(crate) fn open_request(&self, url: &str) -> ScriptRequest {
        let id = RequestId(self.inner.next_request.fetch_add(1, Ordering::Relaxed));
        self.inner.requests.insert(id, None);
        let settings = self.inner.settings.read();
        ScriptRequest {
            id,
            url: url.to_string(),
            charset: settings.config.charset.clone(),
            crossorigin: settings.config.crossorigin.clone(),
            scope: DefineScope {
                id,
                domain: Arc::downgrade(&self.inner),
            },
        }
    }

    pub(crate) fn claim_definition(&self, id: RequestId) -> Option<Definition> {
        self.inner
            .requests
            .remove(&id)
            .and_then(|(_, definition)| definition)
    }

    /// Load `references` on behalf of a module keyed by `url`
    ///
    /// The module is not registered; it only anchors relative identifiers.
    /// The callback receives the exports of each reference, in order.
    pub fn invoke<F>(&self, url: &str, references: impl Into<References>, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Vec<Exports>>) + Send + 'static,
    {
        let references = references.into().into_vec()?;
        let module = Module::new(Arc::downgrade(&self.inner), url)?;
        module.assign_references(references);

        let root = Arc::clone(&module);
        module.load_core(Box::new(move || {
            let result: Result<Vec<Exports>> = match root.failure() {
                Some(error) => Err(error),
                None => root
                    .dependencies()
                    .iter()
                    .map(|dependency| dependency.exports())
                    .collect(),
            };
            callback(result);
        }));
        Ok(())
    }

    /// Load `references` relative to the base URL
    pub fn run<F>(&self, references: impl Into<References>, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Vec<Exports>>) + Send + 'static,
    {
        let n = self.inner.next_run.fetch_add(1, Ordering::Relaxed);
        let url = format!("{}__run{}", self.base_url(), n);
        self.invoke(&url, references, callback)
    }

    /// Load `references` and wait for their exports
    pub async fn load(&self, references: impl Into<References>) -> Result<Vec<Exports>> {
        let (tx, rx) = oneshot::channel();
        self.run(references, move |result| {
            let _ = tx.send(result);
        })?;
        rx.await
            .map_err(|_| LoaderError::Runtime("load was abandoned before completion".to_string()))?
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("base_url", &self.base_url())
            .field("modules", &self.inner.registry.len())
            .finish()
    }
}

/// Where a fetched script registers its definition
///
/// Each script request carries its own scope, so definitions from scripts that
/// finish in any order are matched to the module that requested them.
#[derive(Clone)]
pub struct DefineScope {
    id: RequestId,
    domain: Weak<DomainInner>,
}

impl DefineScope {
    /// The request this scope belongs to
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Register the script's factory
    ///
    /// The factory source is scanned for dependencies right away. A second
    /// definition from the same script replaces the first.
    pub fn define(&self, factory: Factory) -> Result<()> {
        let domain = self.domain.upgrade().ok_or(LoaderError::DomainDropped)?;
        let definition = Definition::from_factory(factory)?;
        debug!(request = %self.id, references = ?definition.references, "Script defined a module");

        match domain.requests.get_mut(&self.id) {
            Some(mut slot) => {
                if slot.is_some() {
                    warn!(request = %self.id, "Script defined more than one module; keeping the last");
                }
                *slot = Some(definition);
                Ok(())
            }
            None => Err(LoaderError::argument(format!(
                "request {} is not awaiting a definition",
                self.id
            ))),
        }
    }
}

impl fmt::Debug for DefineScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefineScope").field("id", &self.id).finish()
    }
}

fn compute_base_url(base: &str, location: Option<&str>) -> String {
    let mut url = if uri::is_absolute(base) {
        base.to_string()
    } else {
        let page_dir = location
            .map(uri::dirname)
            .filter(|dir| !dir.is_empty())
            .unwrap_or_else(|| "/".to_string());
        if base.starts_with('/') {
            format!("{}{}", location.map(uri::origin).unwrap_or(""), base)
        } else {
            uri::join(&page_dir, base)
        }
    };
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}

fn substitute_library(id: &str, libraries: &BTreeMap<String, String>) -> String {
    libraries
        .get(id)
        .cloned()
        .unwrap_or_else(|| id.to_string())
}

fn substitute_paths(id: &str, paths: &BTreeMap<String, String>) -> String {
    if let Some(caps) = PATHS_RE.captures(id) {
        if let Some(prefix) = paths.get(&caps[1]) {
            return format!(
                "{}/{}",
                prefix.trim_end_matches('/'),
                caps[2].trim_start_matches('/')
            );
        }
    }
    id.to_string()
}

fn substitute_vars(id: &str, vars: &BTreeMap<String, String>) -> String {
    if !id.contains('{') {
        return id.to_string();
    }
    VARS_RE
        .replace_all(id, |caps: &Captures| match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

fn absolutize(id: &str, referrer: Option<&str>, base_url: &str) -> String {
    if uri::is_absolute(id) {
        id.to_string()
    } else if id.starts_with('.') {
        let dir = referrer
            .map(uri::dirname)
            .filter(|dir| !dir.is_empty())
            .unwrap_or_else(|| uri::dirname(base_url));
        uri::join(&dir, id)
    } else if id.starts_with('/') {
        format!("{}{}", uri::origin(base_url), id)
    } else {
        format!("{base_url}{id}")
    }
}
