// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Loader configuration
//!
//! A [`DomainConfig`] is the complete configuration of a domain. A [`Setup`]
//! is a partial update: scalar options replace, map options merge. Setups come
//! from `config()` calls, JSON files and environment variables.

use crate::error::{LoaderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Default `charset` attribute of injected scripts
pub const DEFAULT_CHARSET: &str = "utf-8";

/// Default ready-state polling period on hosts without load events
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Environment variable overriding `baseUrl`
pub const ENV_BASE_URL: &str = "SPACEY_BASE_URL";
/// Environment variable overriding `location`
pub const ENV_LOCATION: &str = "SPACEY_LOCATION";
/// Environment variable overriding `charset`
pub const ENV_CHARSET: &str = "SPACEY_CHARSET";

/// Configuration of a domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DomainConfig {
    /// Root for bare identifiers; made absolute against `location`
    pub base_url: String,

    /// URL of the page hosting the loader
    pub location: Option<String>,

    /// Alias -> URL prefix
    pub paths: BTreeMap<String, String>,

    /// Identifier -> replacement identifier
    pub libraries: BTreeMap<String, String>,

    /// Placeholder name -> value
    pub vars: BTreeMap<String, String>,

    /// `charset` attribute of injected scripts
    pub charset: String,

    /// `crossorigin` attribute of injected scripts
    pub crossorigin: Option<String>,

    /// Ready-state polling period in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            base_url: "/".to_string(),
            location: None,
            paths: BTreeMap::new(),
            libraries: BTreeMap::new(),
            vars: BTreeMap::new(),
            charset: DEFAULT_CHARSET.to_string(),
            crossorigin: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl DomainConfig {
    /// Load configuration: defaults, then an optional JSON file, then the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = path {
            config.apply(Setup::from_file(path)?);
        }

        config.apply(Setup::from_env());
        Ok(config)
    }

    /// Merge a partial update into this configuration
    pub fn apply(&mut self, setup: Setup) {
        if let Some(base_url) = setup.base_url {
            self.base_url = base_url;
        }
        if setup.location.is_some() {
            self.location = setup.location;
        }
        self.paths.extend(setup.paths);
        self.libraries.extend(setup.libraries);
        self.vars.extend(setup.vars);
        if let Some(charset) = setup.charset {
            self.charset = charset;
        }
        if setup.crossorigin.is_some() {
            self.crossorigin = setup.crossorigin;
        }
        if let Some(interval) = setup.poll_interval_ms {
            self.poll_interval_ms = interval;
        }
    }

    /// Polling period as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Partial configuration update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Setup {
    /// New `baseUrl`
    pub base_url: Option<String>,
    /// New page location
    pub location: Option<String>,
    /// Aliases to add or replace
    pub paths: BTreeMap<String, String>,
    /// Library substitutions to add or replace
    pub libraries: BTreeMap<String, String>,
    /// Variables to add or replace
    pub vars: BTreeMap<String, String>,
    /// New script charset
    pub charset: Option<String>,
    /// New `crossorigin` attribute
    pub crossorigin: Option<String>,
    /// New polling period
    pub poll_interval_ms: Option<u64>,
}

impl Setup {
    /// Setup that only changes `baseUrl`
    pub fn base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..Self::default()
        }
    }

    /// Parse a JSON setup
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| LoaderError::Config(e.to_string()))
    }

    /// Read a JSON setup from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Reading loader configuration");
        let content = std::fs::read_to_string(path)
            .map_err(|e| LoaderError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    /// Setup from `SPACEY_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Setup from any variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            base_url: lookup(ENV_BASE_URL),
            location: lookup(ENV_LOCATION),
            charset: lookup(ENV_CHARSET),
            ..Self::default()
        }
    }
}
