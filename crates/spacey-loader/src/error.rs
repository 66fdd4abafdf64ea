// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the module loader

use crate::module::Status;
use thiserror::Error;

/// Result type for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Errors that can occur while resolving, loading or executing modules
///
/// The type is `Clone` because a module that failed to load keeps its
/// failure and hands a copy to every later reader of its exports.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoaderError {
    /// Invalid argument passed to a public entry point
    #[error("ArgumentError: {0}")]
    Argument(String),

    /// The script behind a module could not be fetched
    #[error("Failed to fetch module '{url}': {reason}")]
    Fetch {
        /// Canonical URL of the broken module
        url: String,
        /// Reason reported by the script host
        reason: String,
    },

    /// Exports were read before the module finished loading
    #[error("Module '{url}' is not initialized (status: {status})")]
    NotLoaded {
        /// Canonical URL of the module
        url: String,
        /// Status at the time of the read
        status: Status,
    },

    /// `require()` was called with an identifier the factory never declared
    #[error("Cannot find dependency '{reference}' of module '{url}'")]
    DependencyNotFound {
        /// Identifier as written in the factory
        reference: String,
        /// Canonical URL of the requiring module
        url: String,
    },

    /// Circular dependency detected
    #[error("Circular dependency detected: {path}")]
    Cycle {
        /// The cycle, rendered as `a -> b -> a`
        path: String,
    },

    /// A module factory returned an error
    #[error("Factory of module '{url}' failed: {message}")]
    Factory {
        /// Canonical URL of the module
        url: String,
        /// Rendered error chain
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The domain owning a module was dropped
    #[error("The domain owning this module no longer exists")]
    DomainDropped,

    /// No async runtime available to drive fetches
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl LoaderError {
    /// Create a new argument error
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }

    /// Create a new fetch error
    pub fn fetch(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a cycle error from the modules on the cycle
    pub fn cycle(path: &[String]) -> Self {
        Self::Cycle {
            path: path.join(" -> "),
        }
    }
}
