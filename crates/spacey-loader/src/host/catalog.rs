// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! In-memory script host

use crate::error::Result;
use crate::factory::Factory;
use crate::fetcher::{ReadyState, ScriptElement, ScriptHost, ScriptRequest};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// What the host serves for a URL
#[derive(Debug, Clone)]
pub enum CatalogEntry {
    /// A script that defines a module
    Script(Factory),
    /// A script that fails to load
    Failure(String),
    /// A script that loads but defines nothing
    Silent,
}

/// Script host serving registered scripts from memory
///
/// Unknown URLs fail like a 404. Each inserted element runs on its own task,
/// so scripts settle in whatever order the runtime schedules them.
#[derive(Debug, Clone, Default)]
pub struct CatalogHost {
    entries: Arc<DashMap<String, CatalogEntry>>,
    fetches: Arc<DashMap<String, usize>>,
    attached: Arc<DashMap<u64, String>>,
    legacy: bool,
}

impl CatalogHost {
    /// Create a host that emits load/error events
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a host whose elements only expose their ready state
    ///
    /// Successful scripts end in `loaded` rather than `complete`, as older
    /// engines report.
    pub fn legacy() -> Self {
        Self {
            legacy: true,
            ..Self::default()
        }
    }

    /// Serve `factory` at `url`
    pub fn register(&self, url: impl Into<String>, factory: Factory) -> &Self {
        self.entries.insert(url.into(), CatalogEntry::Script(factory));
        self
    }

    /// Fail every fetch of `url`
    pub fn register_failure(&self, url: impl Into<String>, reason: impl Into<String>) -> &Self {
        self.entries
            .insert(url.into(), CatalogEntry::Failure(reason.into()));
        self
    }

    /// Serve a script at `url` that never calls define
    pub fn register_silent(&self, url: impl Into<String>) -> &Self {
        self.entries.insert(url.into(), CatalogEntry::Silent);
        self
    }

    /// Number of times `url` was inserted
    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches.get(url).map(|count| *count).unwrap_or(0)
    }

    /// Number of elements currently attached
    pub fn attached(&self) -> usize {
        self.attached.len()
    }

    /// URLs with a registered entry, sorted
    pub fn urls(&self) -> Vec<String> {
        let mut urls: Vec<_> = self.entries.iter().map(|e| e.key().clone()).collect();
        urls.sort();
        urls
    }
}

#[async_trait]
impl ScriptHost for CatalogHost {
    fn supports_load_events(&self) -> bool {
        !self.legacy
    }

    async fn insert(&self, request: ScriptRequest) -> Result<ScriptElement> {
        *self.fetches.entry(request.url.clone()).or_insert(0) += 1;
        let (element, ready) = ScriptElement::new(request.url.clone());
        self.attached.insert(element.id(), request.url.clone());
        trace!(url = %request.url, charset = %request.charset, "Attached script element");

        let entry = self.entries.get(&request.url).map(|e| e.value().clone());
        let done = if self.legacy {
            ReadyState::Loaded
        } else {
            ReadyState::Complete
        };

        tokio::spawn(async move {
            ready.set(ReadyState::Loading);
            tokio::task::yield_now().await;
            match entry {
                Some(CatalogEntry::Script(factory)) => {
                    if let Err(e) = request.scope.define(factory) {
                        debug!(url = %request.url, error = %e, "Script define was rejected");
                    }
                    ready.set(done);
                }
                Some(CatalogEntry::Silent) => ready.set(done),
                Some(CatalogEntry::Failure(reason)) => {
                    debug!(url = %request.url, reason = %reason, "Script failed");
                    ready.set(ReadyState::Failed);
                }
                None => {
                    debug!(url = %request.url, "No script registered");
                    ready.set(ReadyState::Failed);
                }
            }
        });

        Ok(element)
    }

    fn remove(&self, element: &ScriptElement) {
        self.attached.remove(&element.id());
    }
}
