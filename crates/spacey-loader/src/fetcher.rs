// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Script fetching through an injected script element
//!
//! A [`ScriptHost`] is the platform: it inserts a script element for a URL,
//! drives the element's ready state while the script downloads and runs, and
//! removes the element on request. The [`ScriptFetcher`] waits for the element
//! to settle either by listening for load/error events or, on hosts that do
//! not emit them, by polling the ready state.

use crate::domain::DefineScope;
use crate::error::{LoaderError, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, instrument, trace};

static NEXT_ELEMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of one fetch request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Ready state of an injected script element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Element created, nothing requested yet
    Uninitialized,
    /// Download in progress
    Loading,
    /// Downloaded, not yet run
    Interactive,
    /// Downloaded and run (legacy platforms stop here)
    Loaded,
    /// Downloaded and run, load event fired
    Complete,
    /// The script could not be fetched or run
    Failed,
}

impl ReadyState {
    /// Whether the element will not change state anymore
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Loaded | Self::Complete | Self::Failed)
    }
}

/// Everything a host needs to inject one script
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    /// Request identifier, shared with `scope`
    pub id: RequestId,
    /// Canonical URL of the script
    pub url: String,
    /// `charset` attribute of the element
    pub charset: String,
    /// `crossorigin` attribute of the element, when configured
    pub crossorigin: Option<String>,
    /// Where the script registers its definition
    pub scope: DefineScope,
}

/// Host-side half of a script element's ready state
#[derive(Debug)]
pub struct ReadySender(watch::Sender<ReadyState>);

impl ReadySender {
    /// Move the element to a new ready state
    pub fn set(&self, state: ReadyState) {
        self.0.send_replace(state);
    }
}

/// An injected script element as seen by the fetcher
#[derive(Debug, Clone)]
pub struct ScriptElement {
    id: u64,
    url: String,
    ready: watch::Receiver<ReadyState>,
}

impl ScriptElement {
    /// Create an element for `url` and the sender that drives its ready state
    pub fn new(url: impl Into<String>) -> (Self, ReadySender) {
        let (tx, rx) = watch::channel(ReadyState::Uninitialized);
        let element = Self {
            id: NEXT_ELEMENT_ID.fetch_add(1, Ordering::Relaxed),
            url: url.into(),
            ready: rx,
        };
        (element, ReadySender(tx))
    }

    /// Unique element id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// URL the element points at
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current ready state
    pub fn ready_state(&self) -> ReadyState {
        *self.ready.borrow()
    }
}

/// Platform abstraction for script injection
#[async_trait]
pub trait ScriptHost: Send + Sync {
    /// Whether elements report completion through load/error events
    fn supports_load_events(&self) -> bool {
        true
    }

    /// Insert a script element for the request
    async fn insert(&self, request: ScriptRequest) -> Result<ScriptElement>;

    /// Remove an element once its fetch has settled
    fn remove(&self, element: &ScriptElement);
}

/// How the fetcher learns that an element settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Wait for load/error events
    Events,
    /// Poll the ready state at a fixed period
    Polling {
        /// Polling period
        interval: Duration,
    },
}

impl FetchStrategy {
    /// Pick the strategy a host can support
    pub fn detect(host: &dyn ScriptHost, poll_interval: Duration) -> Self {
        if host.supports_load_events() {
            Self::Events
        } else {
            Self::Polling {
                interval: poll_interval.max(Duration::from_millis(1)),
            }
        }
    }
}

/// Fetches a single script; one instance per fetch attempt
#[derive(Debug)]
pub struct ScriptFetcher {
    strategy: FetchStrategy,
}

impl ScriptFetcher {
    /// Create a fetcher with an explicit strategy
    pub fn new(strategy: FetchStrategy) -> Self {
        Self { strategy }
    }

    /// The strategy in use
    pub fn strategy(&self) -> FetchStrategy {
        self.strategy
    }

    /// Inject the script, wait until it settles and remove the element
    #[instrument(skip(self, host, request), fields(url = %request.url, request = %request.id))]
    pub async fn fetch(self, host: &dyn ScriptHost, request: ScriptRequest) -> Result<()> {
        let url = request.url.clone();
        debug!(strategy = ?self.strategy, "Fetching script");

        let element = host.insert(request).await?;
        let outcome = match self.strategy {
            FetchStrategy::Events => wait_for_events(&url, element.ready.clone()).await,
            FetchStrategy::Polling { interval } => {
                poll_ready_state(&url, element.ready.clone(), interval).await
            }
        };
        host.remove(&element);

        match &outcome {
            Ok(()) => debug!(url = %url, "Script fetched"),
            Err(e) => debug!(url = %url, error = %e, "Script fetch failed"),
        }
        outcome
    }
}

fn settle(url: &str, state: ReadyState) -> Result<()> {
    match state {
        ReadyState::Failed => Err(LoaderError::fetch(url, "script failed to load")),
        _ => Ok(()),
    }
}

fn discarded(url: &str) -> LoaderError {
    LoaderError::fetch(url, "script element was discarded before it settled")
}

async fn wait_for_events(url: &str, mut ready: watch::Receiver<ReadyState>) -> Result<()> {
    let state = *ready
        .wait_for(ReadyState::is_settled)
        .await
        .map_err(|_| discarded(url))?;
    settle(url, state)
}

async fn poll_ready_state(
    url: &str,
    ready: watch::Receiver<ReadyState>,
    interval: Duration,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let state = *ready.borrow();
        trace!(url = %url, state = ?state, "Polled ready state");
        if state.is_settled() {
            return settle(url, state);
        }
        if ready.has_changed().is_err() {
            return Err(discarded(url));
        }
    }
}
