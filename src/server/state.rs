use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::analysis::AnalysisService;

#[derive(Clone)]
pub struct ServeState {
    pub service: Arc<AnalysisService>,
    pub health: Arc<ServeHealth>,
}

impl ServeState {
    pub fn new(service: Arc<AnalysisService>, health: Arc<ServeHealth>) -> Self {
        Self { service, health }
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        self.health.snapshot()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub ready: bool,
    pub live: bool,
    pub last_ready_check: Option<u64>,
    pub last_error: Option<String>,
}

/// Liveness and readiness flags. Ready means the rule engine is loaded.
#[derive(Default)]
pub struct ServeHealth {
    live: AtomicBool,
    ready: AtomicBool,
    last_ready_check: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl ServeHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_live(&self) {
        self.live.store(true, Ordering::SeqCst);
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.update_last_check();
        self.set_error(None);
    }

    pub fn mark_unready(&self, error: impl Into<String>) {
        self.ready.store(false, Ordering::SeqCst);
        self.update_last_check();
        self.set_error(Some(error.into()));
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            ready: self.ready.load(Ordering::SeqCst),
            live: self.live.load(Ordering::SeqCst),
            last_ready_check: self.last_ready_check(),
            last_error: self
                .last_error
                .lock()
                .map(|guard| guard.clone())
                .unwrap_or_else(|poisoned| poisoned.into_inner().clone()),
        }
    }

    fn set_error(&self, error: Option<String>) {
        let mut guard = self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = error;
    }

    fn update_last_check(&self) {
        if let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) {
            self.last_ready_check
                .store(duration.as_secs(), Ordering::SeqCst);
        }
    }

    fn last_ready_check(&self) -> Option<u64> {
        match self.last_ready_check.load(Ordering::SeqCst) {
            0 => None,
            value => Some(value),
        }
    }
}
