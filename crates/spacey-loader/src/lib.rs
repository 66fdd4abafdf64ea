// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # Spacey Loader
//!
//! Asynchronous script module loader and dependency resolver.
//!
//! Scripts register a factory through the [`DefineScope`] of the request that
//! fetched them. The factory's source is scanned for `require("...")` calls,
//! each identifier is resolved to a canonical URL by the [`Domain`], missing
//! modules are fetched through a [`ScriptHost`], and the factory runs once,
//! on first access to the module's exports, after its whole dependency
//! subtree has loaded.
//!
//! ## Example
//!
//! ```no_run
//! use spacey_loader::{CatalogHost, Domain, DomainConfig, Factory};
//! use std::sync::Arc;
//!
//! # async fn example() -> spacey_loader::Result<()> {
//! let host = CatalogHost::new();
//! host.register(
//!     "/app/main.js",
//!     Factory::new("function(require){ require('./util') }", |require, exports, _| {
//!         let util = require.get("./util")?;
//!         exports.set("util", util.value());
//!         Ok(None)
//!     }),
//! );
//! host.register("/app/util.js", Factory::inert("function(){}"));
//!
//! let domain = Domain::new(DomainConfig::default(), Arc::new(host))?;
//! let exports = domain.load("/app/main").await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod domain;
pub mod error;
pub mod facade;
pub mod factory;
pub mod fetcher;
pub mod host;
pub mod module;
pub mod registry;
pub mod scanner;
pub mod uri;

pub use config::{DomainConfig, Setup};
pub use domain::{DefineScope, Domain, References};
pub use error::{LoaderError, Result};
pub use facade::{Bootstrap, bootstrap, catalog, config, current_domain, run, set_current_domain};
pub use factory::{Definition, Exports, Factory};
pub use fetcher::{
    FetchStrategy, ReadySender, ReadyState, RequestId, ScriptElement, ScriptFetcher, ScriptHost,
    ScriptRequest,
};
pub use host::{CatalogEntry, CatalogHost, FsHost};
pub use module::{LoadCallback, Module, Require, Status};
pub use registry::ModuleRegistry;
pub use scanner::scan_dependencies;

/// Loader version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
