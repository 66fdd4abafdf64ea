// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Filesystem script host
//!
//! Maps URLs under a base URL onto files under a root directory. Scripts are
//! never executed; their source is registered as an inert factory so the
//! dependency graph can be walked statically.

use crate::error::{LoaderError, Result};
use crate::factory::Factory;
use crate::fetcher::{ReadyState, ScriptElement, ScriptHost, ScriptRequest};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Script host backed by a directory
#[derive(Debug, Clone)]
pub struct FsHost {
    root: PathBuf,
    base_url: String,
    attached: Arc<DashMap<u64, String>>,
}

impl FsHost {
    /// Serve files under `root` for URLs starting with `base_url`
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            root: root.into(),
            base_url,
            attached: Arc::new(DashMap::new()),
        }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of elements currently attached
    pub fn attached(&self) -> usize {
        self.attached.len()
    }

    /// File backing `url`
    ///
    /// Query strings and fragments are ignored. URLs outside the base URL and
    /// paths escaping the root are rejected.
    pub fn path_for(&self, url: &str) -> Result<PathBuf> {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let relative = path.strip_prefix(&self.base_url).ok_or_else(|| {
            LoaderError::fetch(url, format!("outside of {}", self.base_url))
        })?;

        let relative = Path::new(relative);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(LoaderError::fetch(url, "path escapes the script root"));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ScriptHost for FsHost {
    async fn insert(&self, request: ScriptRequest) -> Result<ScriptElement> {
        let (element, ready) = ScriptElement::new(request.url.clone());
        self.attached.insert(element.id(), request.url.clone());
        ready.set(ReadyState::Loading);

        let path = match self.path_for(&request.url) {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Cannot map script URL");
                ready.set(ReadyState::Failed);
                return Ok(element);
            }
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(source) if source.trim().is_empty() => {
                debug!(path = %path.display(), "Empty script");
                ready.set(ReadyState::Complete);
            }
            Ok(source) => {
                debug!(path = %path.display(), "Read script");
                match request.scope.define(Factory::inert(source)) {
                    Ok(()) => ready.set(ReadyState::Complete),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Script define was rejected");
                        ready.set(ReadyState::Failed);
                    }
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read script");
                ready.set(ReadyState::Failed);
            }
        }
        Ok(element)
    }

    fn remove(&self, element: &ScriptElement) {
        self.attached.remove(&element.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_for() {
        let host = FsHost::new("/srv/scripts", "/app");
        assert_eq!(host.root(), Path::new("/srv/scripts"));
        assert_eq!(
            host.path_for("/app/lib/a.js?v=2").unwrap(),
            PathBuf::from("/srv/scripts/lib/a.js")
        );
        assert!(host.path_for("/other/a.js").is_err());
        assert!(host.path_for("/app/../etc/passwd").is_err());
    }
}
