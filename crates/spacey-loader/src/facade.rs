// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Process-wide loader entry points
//!
//! The current domain is created lazily on first use, with the default
//! configuration and the shared [`catalog()`] as its script host. It can be
//! replaced at any time with [`set_current_domain`].

use crate::config::{DomainConfig, Setup};
use crate::domain::{Domain, References};
use crate::error::Result;
use crate::factory::Exports;
use crate::host::CatalogHost;
use parking_lot::RwLock;
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};

/// Attribute naming the base URL on the bootstrapping element
pub const ATTR_BASE_URL: &str = "data-baseurl";
/// Attribute naming the entry module on the bootstrapping element
pub const ATTR_MAIN: &str = "data-main";

static CATALOG: LazyLock<CatalogHost> = LazyLock::new(CatalogHost::new);

static CURRENT: LazyLock<RwLock<Option<Domain>>> = LazyLock::new(|| RwLock::new(None));

/// The shared script catalog of the default domain
pub fn catalog() -> CatalogHost {
    CATALOG.clone()
}

/// The current domain, created on first use
///
/// Creation needs a tokio runtime.
pub fn current_domain() -> Result<Domain> {
    if let Some(domain) = CURRENT.read().as_ref() {
        return Ok(domain.clone());
    }
    let mut current = CURRENT.write();
    if let Some(domain) = current.as_ref() {
        return Ok(domain.clone());
    }
    let domain = Domain::new(DomainConfig::default(), Arc::new(catalog()))?;
    *current = Some(domain.clone());
    Ok(domain)
}

/// Replace the current domain, returning the previous one
pub fn set_current_domain(domain: Domain) -> Option<Domain> {
    CURRENT.write().replace(domain)
}

/// Configure the current domain
pub fn config(setup: Setup) -> Result<()> {
    current_domain()?.configure(setup)
}

/// Load `references` in the current domain
pub fn run<F>(references: impl Into<References>, callback: F) -> Result<()>
where
    F: FnOnce(Result<Vec<Exports>>) + Send + 'static,
{
    current_domain()?.run(references, callback)
}

/// Bootstrap attributes of the element that loaded the loader
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bootstrap {
    /// `data-baseurl`
    pub base_url: Option<String>,
    /// `data-main`
    pub main: Option<String>,
}

impl Bootstrap {
    /// Read the attributes through `attribute`
    pub fn from_attributes(attribute: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name| attribute(name).filter(|value: &String| !value.is_empty());
        Self {
            base_url: non_empty(ATTR_BASE_URL),
            main: non_empty(ATTR_MAIN),
        }
    }

    /// Configure `domain` from `data-baseurl` and run `data-main`
    pub fn apply(&self, domain: &Domain) -> Result<()> {
        if let Some(base_url) = &self.base_url {
            domain.configure(Setup::base_url(base_url.clone()))?;
        }
        if let Some(main) = &self.main {
            info!(main = %main, base_url = %domain.base_url(), "Bootstrapping entry module");
            let main_id = main.clone();
            domain.run(main.as_str(), move |result| {
                if let Err(e) = result {
                    warn!(main = %main_id, error = %e, "Entry module failed to load");
                }
            })?;
        }
        Ok(())
    }
}

/// Bootstrap the current domain
pub fn bootstrap(attributes: &Bootstrap) -> Result<()> {
    attributes.apply(&current_domain()?)
}
