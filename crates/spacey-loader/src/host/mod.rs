// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Script hosts
//!
//! - [`CatalogHost`]: in-memory scripts keyed by URL, with optional legacy
//!   (ready-state only) behavior
//! - [`FsHost`]: scripts read from a directory tree, mapped from URLs under a
//!   base URL

mod catalog;
mod fs;

pub use catalog::{CatalogEntry, CatalogHost};
pub use fs::FsHost;
