//! Network tap (light): per-page in-flight request accounting.
//!
//! The CDP adapter feeds `Network.*` events into the tap and polls
//! [`NetworkTapLight::is_quiet`] to decide when a navigation has settled.

pub mod config;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::config::TapConfig;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::trace;
use uuid::Uuid;

/// Identifier representing a page for which the tap is collecting data.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PageId(pub Uuid);

impl PageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::new()
    }
}

/// Cumulative counters for one page.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub req: u64,
    pub res2xx: u64,
    pub res3xx: u64,
    pub res4xx: u64,
    pub res5xx: u64,
    pub failed: u64,
    pub inflight: u64,
    pub quiet: bool,
    pub calm_for_ms: u64,
}

/// Errors emitted by the tap surface.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TapError {
    #[error("page not enabled")]
    PageNotEnabled,
}

/// CDP network events understood by the tap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TapEvent {
    RequestWillBeSent { request_id: String },
    ResponseReceived { status: i64 },
    LoadingFinished { request_id: String },
    LoadingFailed { request_id: String },
}

#[derive(Debug)]
struct Counters {
    inflight: HashSet<String>,
    requests: u64,
    res2xx: u64,
    res3xx: u64,
    res4xx: u64,
    res5xx: u64,
    failed: u64,
    calm_since: Option<Instant>,
}

impl Counters {
    fn new(now: Instant) -> Self {
        Self {
            inflight: HashSet::new(),
            requests: 0,
            res2xx: 0,
            res3xx: 0,
            res4xx: 0,
            res5xx: 0,
            failed: 0,
            calm_since: Some(now),
        }
    }

    fn register(&mut self, event: TapEvent, now: Instant, config: &TapConfig) {
        match event {
            // Redirects reuse the request id, so a set keeps them from double counting.
            TapEvent::RequestWillBeSent { request_id } => {
                if self.inflight.insert(request_id) {
                    self.requests += 1;
                }
            }
            TapEvent::ResponseReceived { status } => match status {
                200..=299 => self.res2xx += 1,
                300..=399 => self.res3xx += 1,
                400..=499 => self.res4xx += 1,
                500..=599 => self.res5xx += 1,
                _ => {}
            },
            TapEvent::LoadingFinished { request_id } => {
                self.inflight.remove(&request_id);
            }
            TapEvent::LoadingFailed { request_id } => {
                if self.inflight.remove(&request_id) {
                    self.failed += 1;
                }
            }
        }

        let calm = self.inflight.len() as u64 <= config.max_inflight;
        match (calm, self.calm_since) {
            (true, None) => self.calm_since = Some(now),
            (false, Some(_)) => self.calm_since = None,
            _ => {}
        }
    }

    fn calm_for_ms(&self, now: Instant) -> u64 {
        self.calm_since
            .map(|since| now.saturating_duration_since(since).as_millis() as u64)
            .unwrap_or(0)
    }

    fn quiet(&self, now: Instant, config: &TapConfig) -> bool {
        self.calm_since.is_some() && self.calm_for_ms(now) >= config.quiet_window_ms
    }

    fn snapshot(&self, now: Instant, config: &TapConfig) -> NetworkSnapshot {
        NetworkSnapshot {
            req: self.requests,
            res2xx: self.res2xx,
            res3xx: self.res3xx,
            res4xx: self.res4xx,
            res5xx: self.res5xx,
            failed: self.failed,
            inflight: self.inflight.len() as u64,
            quiet: self.quiet(now, config),
            calm_for_ms: self.calm_for_ms(now),
        }
    }
}

/// Tap registry keyed by page.
pub struct NetworkTapLight {
    states: DashMap<PageId, Arc<Mutex<Counters>>>,
    config: TapConfig,
}

impl NetworkTapLight {
    pub fn new() -> Self {
        Self::with_config(TapConfig::default())
    }

    pub fn with_config(config: TapConfig) -> Self {
        Self {
            states: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> TapConfig {
        self.config
    }

    pub async fn enable(&self, page: PageId) {
        self.states
            .entry(page)
            .or_insert_with(|| Arc::new(Mutex::new(Counters::new(Instant::now()))));
    }

    pub async fn disable(&self, page: PageId) -> Result<(), TapError> {
        self.states
            .remove(&page)
            .map(|_| ())
            .ok_or(TapError::PageNotEnabled)
    }

    /// Start a fresh accounting window, typically right before a navigation.
    pub async fn reset(&self, page: PageId) -> Result<(), TapError> {
        let state = self.state(page)?;
        let mut counters = state.lock().await;
        *counters = Counters::new(Instant::now());
        Ok(())
    }

    pub async fn ingest(&self, page: PageId, event: TapEvent) -> Result<(), TapError> {
        let state = self.state(page)?;
        let mut counters = state.lock().await;
        trace!(target: "network-tap", ?page, ?event, "network event");
        counters.register(event, Instant::now(), &self.config);
        Ok(())
    }

    pub async fn is_quiet(&self, page: PageId) -> Result<bool, TapError> {
        let state = self.state(page)?;
        let counters = state.lock().await;
        Ok(counters.quiet(Instant::now(), &self.config))
    }

    pub async fn current_snapshot(&self, page: PageId) -> Option<NetworkSnapshot> {
        let state = self.state(page).ok()?;
        let counters = state.lock().await;
        Some(counters.snapshot(Instant::now(), &self.config))
    }

    fn state(&self, page: PageId) -> Result<Arc<Mutex<Counters>>, TapError> {
        self.states
            .get(&page)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(TapError::PageNotEnabled)
    }
}

impl Default for NetworkTapLight {
    fn default() -> Self {
        Self::new()
    }
}
