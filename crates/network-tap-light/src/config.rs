//! Configuration types for the network tap (light).

use serde::{Deserialize, Serialize};

/// Quiet means at most `max_inflight` requests have been pending for `quiet_window_ms`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    pub quiet_window_ms: u64,
    pub max_inflight: u64,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            quiet_window_ms: 500,
            max_inflight: 2,
        }
    }
}
