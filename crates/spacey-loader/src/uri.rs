// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! URI string helpers
//!
//! Module identifiers are plain strings that may be absolute URLs
//! (`https://cdn/x.js`, `//cdn/x.js`) or host-relative paths (`/app/x.js`).
//! The helpers here never touch the network and never fail.

use regex::Regex;
use std::sync::LazyLock;

static ABSOLUTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[a-zA-Z][a-zA-Z0-9+.\-]*:)?//").expect("valid regex"));

static ORIGIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-zA-Z][a-zA-Z0-9+.\-]*:)?//[^/?#]*").expect("valid regex")
});

static DIRNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^?#]*/").expect("valid regex"));

/// Check whether an identifier is an absolute URL (`scheme://` or `//`)
pub fn is_absolute(id: &str) -> bool {
    ABSOLUTE_RE.is_match(id)
}

/// Directory part of a URL, including the trailing slash
///
/// Query strings and fragments are ignored. A URL with an origin but no path
/// has the origin root as its directory. Returns an empty string when the
/// identifier has no directory part.
pub fn dirname(url: &str) -> String {
    let origin = origin(url);
    match DIRNAME_RE.find(url) {
        Some(m) if m.end() > origin.len() => m.as_str().to_string(),
        _ if !origin.is_empty() => format!("{origin}/"),
        _ => String::new(),
    }
}

/// Origin of an absolute URL (`https://host:port`), empty for paths
pub fn origin(url: &str) -> &str {
    ORIGIN_RE.find(url).map(|m| m.as_str()).unwrap_or("")
}

/// Join a relative identifier onto a directory
///
/// Leading `./` segments are dropped and leading `../` segments climb one
/// directory each, never above the origin root.
pub fn join(dir: &str, relative: &str) -> String {
    let root_len = origin(dir).len();
    let mut base = dir.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }

    let mut rest = relative;
    loop {
        if let Some(r) = rest.strip_prefix("./") {
            rest = r;
        } else if let Some(r) = rest.strip_prefix("../") {
            base = parent_dir(&base, root_len);
            rest = r;
        } else if rest == "." {
            rest = "";
        } else if rest == ".." {
            base = parent_dir(&base, root_len);
            rest = "";
        } else {
            break;
        }
    }

    base.push_str(rest);
    base
}

fn parent_dir(dir: &str, root_len: usize) -> String {
    let trimmed = &dir[..dir.len() - 1];
    match trimmed.rfind('/') {
        Some(pos) if pos >= root_len => dir[..=pos].to_string(),
        _ => dir.to_string(),
    }
}

/// Apply the `.js` extension rules to an identifier
///
/// - `dir/` is a directory and stays untouched
/// - a trailing `#` opts out of the extension and is stripped
/// - with a query string, `.js` must sit right before the first `?`
/// - anything else gets `.js` appended unless already present
pub fn normalize_extension(id: &str) -> String {
    if id.ends_with('/') {
        return id.to_string();
    }
    if let Some(stripped) = id.strip_suffix('#') {
        return stripped.to_string();
    }
    if let Some(q) = id.find('?') {
        let (path, query) = id.split_at(q);
        if path.ends_with(".js") {
            return id.to_string();
        }
        return format!("{path}.js{query}");
    }
    if id.ends_with(".js") {
        id.to_string()
    } else {
        format!("{id}.js")
    }
}
