//! Chromium DevTools Protocol adapter.
//!
//! Every audit gets its own [`CdpSession`]: a fresh Chromium process (or an isolated browser
//! context on an already running browser), a single page target, and a network tap that backs
//! the "network quiet" wait gate. Upper layers only see the [`Cdp`] and [`SessionLauncher`]
//! traits so they can run against fakes in tests.

use std::{env, path::PathBuf};

use which::which;

pub mod ids {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    pub use network_tap_light::PageId;

    /// Unique identifier for one launched audit session.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct SessionId(pub Uuid);

    impl SessionId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl Default for SessionId {
        fn default() -> Self {
            Self::new()
        }
    }
}

pub mod error {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use thiserror::Error;

    /// High-level error categories surfaced by the adapter.
    #[derive(Clone, Copy, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
    pub enum AdapterErrorKind {
        #[error("navigation timed out")]
        NavTimeout,
        #[error("cdp command timed out")]
        CommandTimeout,
        #[error("protocol error during navigation")]
        ProtocolError,
        #[error("navigation blocked by target")]
        NavBlocked,
        #[error("navigation failed")]
        NavFailed,
        #[error("cdp i/o failure")]
        CdpIo,
        #[error("page script raised an exception")]
        ScriptException,
        #[error("internal error")]
        Internal,
    }

    impl AdapterErrorKind {
        /// Classify the `errorText` returned by `Page.navigate` (e.g. `net::ERR_FAILED`).
        pub fn from_net_error(error_text: &str) -> Self {
            let code = error_text
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .trim_start_matches("net::");
            match code {
                "ERR_TIMED_OUT" | "ERR_CONNECTION_TIMED_OUT" => AdapterErrorKind::NavTimeout,
                "ERR_FAILED" | "ERR_BLOCKED_BY_RESPONSE" | "ERR_ACCESS_DENIED" => {
                    AdapterErrorKind::NavBlocked
                }
                code if code.ends_with("_PROTOCOL_ERROR") => AdapterErrorKind::ProtocolError,
                _ => AdapterErrorKind::NavFailed,
            }
        }
    }

    /// Enriched error metadata passed back to higher layers.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct AdapterError {
        pub kind: AdapterErrorKind,
        pub hint: Option<String>,
        pub retriable: bool,
        pub data: Option<serde_json::Value>,
    }

    impl fmt::Display for AdapterError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.kind)?;
            if let Some(hint) = &self.hint {
                write!(f, ": {}", hint)?;
            }
            Ok(())
        }
    }

    impl std::error::Error for AdapterError {}

    impl AdapterError {
        pub fn new(kind: AdapterErrorKind) -> Self {
            Self {
                kind,
                hint: None,
                retriable: false,
                data: None,
            }
        }

        pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
            self.hint = Some(hint.into());
            self
        }

        pub fn retriable(mut self, flag: bool) -> Self {
            self.retriable = flag;
            self
        }

        pub fn with_data(mut self, data: serde_json::Value) -> Self {
            self.data = Some(data);
            self
        }

        pub fn navigation(error_text: &str) -> Self {
            Self::new(AdapterErrorKind::from_net_error(error_text)).with_hint(error_text.to_string())
        }
    }
}

pub mod config {
    use crate::detect_chrome_executable;
    use serde::{Deserialize, Serialize};
    use std::{env, path::PathBuf};

    /// Configuration for launching Chromium and talking to it.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    #[serde(default)]
    pub struct CdpConfig {
        pub executable: PathBuf,
        pub headless: bool,
        pub no_sandbox: bool,
        pub extra_args: Vec<String>,
        pub default_deadline_ms: u64,
        pub launch_timeout_ms: u64,
        pub websocket_url: Option<String>,
    }

    impl Default for CdpConfig {
        fn default() -> Self {
            Self {
                executable: default_chrome_path(),
                headless: resolve_headless_default(),
                no_sandbox: true,
                extra_args: Vec::new(),
                default_deadline_ms: 30_000,
                launch_timeout_ms: 20_000,
                websocket_url: None,
            }
        }
    }

    fn resolve_headless_default() -> bool {
        match env::var("ACCESSLY_HEADLESS") {
            Ok(value) => {
                let lower = value.to_ascii_lowercase();
                !matches!(lower.as_str(), "0" | "false" | "no" | "off")
            }
            Err(_) => true,
        }
    }

    fn default_chrome_path() -> PathBuf {
        detect_chrome_executable().unwrap_or_default()
    }
}

pub mod commands;
pub mod metrics;
pub mod session;
pub mod transport;
pub mod util;

pub use commands::{ScreenshotFormat, ScreenshotOptions, WaitGate};
pub use config::CdpConfig;
pub use error::{AdapterError, AdapterErrorKind};
pub use ids::{PageId, SessionId};
pub use session::{Cdp, CdpSession, ChromiumLauncher, SessionLauncher};
pub use transport::{CdpTransport, ChromiumTransport, CommandTarget, NoopTransport, TransportEvent};

fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("ACCESSLY_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    for name in chrome_executable_names() {
        if let Ok(path) = which(name) {
            return Some(path);
        }
    }

    let skip_defaults = env::var("ACCESSLY_SKIP_OS_PATHS")
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false);

    if !skip_defaults {
        for candidate in os_specific_chrome_paths() {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}

fn chrome_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(any(target_os = "macos", target_os = "linux", target_os = "freebsd"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        &["chrome"]
    }
}

fn os_specific_chrome_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let mut paths = Vec::new();
        for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
            if let Ok(value) = env::var(key) {
                let root = PathBuf::from(value.trim());
                paths.push(root.join("Google/Chrome/Application/chrome.exe"));
                paths.push(root.join("Chromium/Application/chrome.exe"));
            }
        }
        paths
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        Vec::new()
    }
}
