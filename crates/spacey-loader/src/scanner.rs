// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Dependency scanning for factory source text
//!
//! This is a tagged pattern matcher, not a parser. A single alternation walks
//! the source and classifies every match as a string literal, a comment, a
//! regex literal, a `.require` property access or a real `require("x")` call.
//! Only the last kind contributes a dependency; everything else is consumed so
//! that `require` calls hidden inside strings or comments are not reported.
//!
//! Known blind spots:
//! - identifiers built at runtime (`require(prefix + "x")`) are invisible
//! - `$require(...)` and `obj.require(...)` are never dependencies
//! - two divisions on the same line (`a / b / c`) are taken for a regex
//!   literal and swallow any call between them

use regex::{Captures, Regex};
use std::sync::LazyLock;

static ESCAPED_BACKSLASH: &str = "\\\\";

static REQUIRE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"(?P<dstr>"(?:\\"|[^"])*")"#,
        r#"|(?P<sstr>'(?:\\'|[^'])*')"#,
        r#"|(?P<block>/\*[\s\S]*?\*/)"#,
        r#"|(?P<regex>/(?:\\/|[^/\r\n])+/)"#,
        r#"|(?P<line>//.*)"#,
        r#"|(?P<prop>\.\s*require)"#,
        r#"|(?:^|[^$])\brequire\s*\(\s*(?:"(?P<dq>.+?)"|'(?P<sq>.+?)')\s*\)"#,
    ))
    .expect("valid regex")
});

// Same alternation without regex literals, for rescanning after a division
static NO_REGEX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"(?P<dstr>"(?:\\"|[^"])*")"#,
        r#"|(?P<sstr>'(?:\\'|[^'])*')"#,
        r#"|(?P<block>/\*[\s\S]*?\*/)"#,
        r#"|(?P<line>//.*)"#,
        r#"|(?P<prop>\.\s*require)"#,
        r#"|(?:^|[^$])\brequire\s*\(\s*(?:"(?P<dq>.+?)"|'(?P<sq>.+?)')\s*\)"#,
    ))
    .expect("valid regex")
});

/// A classified match produced while scanning source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// Quoted string literal
    Str,
    /// `/* ... */`
    BlockComment,
    /// `/.../`
    RegexLiteral,
    /// `// ...`
    LineComment,
    /// `.require`, a property access rather than a declaration
    PropertyRequire,
    /// `require("id")` with the captured identifier
    Require(&'a str),
}

/// Walk `source` and yield every classified match in order
///
/// A regex literal whose closing `/` starts a `//` comment is a division
/// followed by a comment; scanning resumes after the division slash.
pub fn tokens(source: &str) -> impl Iterator<Item = Token<'_>> + '_ {
    let mut pos = 0;
    std::iter::from_fn(move || {
        let mut caps = REQUIRE_RE.captures_at(source, pos)?;
        if let Some(literal) = caps.name("regex") {
            if source[literal.end()..].starts_with('/') {
                caps = NO_REGEX_RE.captures_at(source, literal.start() + 1)?;
            }
        }
        pos = caps.get(0).map_or(source.len(), |m| m.end());
        Some(classify(&caps))
    })
}

fn classify<'a>(caps: &Captures<'a>) -> Token<'a> {
    if let Some(id) = caps.name("dq").or_else(|| caps.name("sq")) {
        Token::Require(id.as_str())
    } else if caps.name("dstr").is_some() || caps.name("sstr").is_some() {
        Token::Str
    } else if caps.name("block").is_some() {
        Token::BlockComment
    } else if caps.name("regex").is_some() {
        Token::RegexLiteral
    } else if caps.name("line").is_some() {
        Token::LineComment
    } else {
        Token::PropertyRequire
    }
}

/// Extract the dependency identifiers declared by `source`
///
/// Identifiers are returned in first-seen order. Duplicates are kept: every
/// `require` call occupies its own slot.
pub fn scan_dependencies(source: &str) -> Vec<String> {
    let cleaned = source.replace(ESCAPED_BACKSLASH, "");
    tokens(&cleaned)
        .filter_map(|token| match token {
            Token::Require(id) => Some(id.to_string()),
            _ => None,
        })
        .collect()
}
