//! Application configuration.
//!
//! Values come from a YAML file and are then overridden by environment variables.
//! Every section has defaults, so an absent file yields a working service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use cdp_adapter::{CdpConfig, ScreenshotOptions};
use network_tap_light::config::TapConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::audit::{AuditSettings, DEFAULT_AXE_SOURCE};
use crate::enricher::{DEFAULT_CONCURRENCY, DEFAULT_MAX_TOKENS};
use crate::llm::openai::{OpenAiConfig, DEFAULT_API_BASE};

pub const DEFAULT_ALLOWED_ORIGIN: &str = "https://accessly-ai.vercel.app";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub browser: CdpConfig,
    pub audit: AuditConfig,
    pub llm: LlmConfig,
    pub stealth: StealthConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5001,
            allowed_origins: vec![DEFAULT_ALLOWED_ORIGIN.into()],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub navigation_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub screenshot: bool,
    pub screenshot_quality: u8,
    pub network: TapConfig,
    /// File path or `http(s)` URL of the axe-core build.
    pub axe_source: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 60_000,
            settle_delay_ms: 3_000,
            screenshot: true,
            screenshot_quality: 80,
            network: TapConfig::default(),
            axe_source: DEFAULT_AXE_SOURCE.into(),
        }
    }
}

impl AuditConfig {
    pub fn settings(&self) -> AuditSettings {
        AuditSettings {
            navigation_timeout: Duration::from_millis(self.navigation_timeout_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            screenshot: self
                .screenshot
                .then(|| ScreenshotOptions::full_page_jpeg(self.screenshot_quality)),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_base: String,
    pub model: String,
    /// Usually supplied through `OPENAI_API_KEY` rather than the file.
    #[serde(skip_serializing)]
    pub api_keys: Vec<String>,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub concurrency: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.into(),
            model: "gpt-4o".into(),
            api_keys: Vec::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_secs: 30,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl LlmConfig {
    pub fn openai(&self) -> OpenAiConfig {
        OpenAiConfig {
            api_keys: self.api_keys.clone(),
            model: self.model.clone(),
            api_base: self.api_base.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StealthConfig {
    pub profile_path: Option<PathBuf>,
    pub profile: Option<String>,
}

impl Config {
    pub fn from_yaml_str(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(port) = get("PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "PORT",
                value: port,
            })?;
        }
        if let Some(origins) = get("ACCESSLY_ALLOWED_ORIGINS") {
            self.server.allowed_origins = split_list(&origins);
        }
        if let Some(keys) = get("OPENAI_API_KEY") {
            self.llm.api_keys = split_list(&keys);
        }
        if let Some(model) = get("OPENAI_MODEL") {
            self.llm.model = model;
        }
        if let Some(base) = get("OPENAI_API_BASE") {
            self.llm.api_base = base;
        }
        if let Some(source) = get("ACCESSLY_AXE_SOURCE") {
            self.audit.axe_source = source;
        }
        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug)]
pub struct LoadedConfig {
    pub config: Config,
    pub path: PathBuf,
}

/// `explicit`, else `config/config.yaml`, else `<config dir>/accessly/config.yaml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let local = PathBuf::from("config/config.yaml");
    if local.exists() {
        return local;
    }
    match dirs::config_dir() {
        Some(dir) => dir.join("accessly").join("config.yaml"),
        None => local,
    }
}

pub async fn load_config<F>(explicit: Option<&Path>, lookup: F) -> Result<LoadedConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let path = resolve_config_path(explicit);
    let mut config = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => {
            info!(path = %path.display(), "loaded configuration");
            Config::from_yaml_str(&raw, &path)?
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound && explicit.is_none() => {
            warn!(path = %path.display(), "config file not found, using defaults");
            Config::default()
        }
        Err(source) => return Err(ConfigError::Io { path, source }),
    };
    config.apply_env(lookup)?;
    Ok(LoadedConfig { config, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_service_contract() {
        let config = Config::default();
        assert_eq!(config.server.port, 5001);
        assert_eq!(config.server.allowed_origins, vec![DEFAULT_ALLOWED_ORIGIN]);
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.max_tokens, 250);
        let settings = config.audit.settings();
        assert_eq!(settings.navigation_timeout, Duration::from_secs(60));
        assert_eq!(settings.settle_delay, Duration::from_secs(3));
        assert_eq!(settings.screenshot, Some(ScreenshotOptions::full_page_jpeg(80)));
    }

    #[test]
    fn env_overrides_win() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("PORT", "8080"),
                ("OPENAI_API_KEY", "sk-a, sk-b,,"),
                ("OPENAI_MODEL", "gpt-4o-mini"),
                ("ACCESSLY_ALLOWED_ORIGINS", "http://localhost:3000,https://a.example"),
                ("ACCESSLY_AXE_SOURCE", "/opt/axe.min.js"),
                ("OPENAI_API_BASE", "  "),
            ]))
            .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.llm.api_keys, vec!["sk-a", "sk-b"]);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.api_base, DEFAULT_API_BASE);
        assert_eq!(config.server.allowed_origins.len(), 2);
        assert_eq!(config.audit.axe_source, "/opt/axe.min.js");
    }

    #[test]
    fn shipped_config_parses() {
        let config = Config::from_yaml_str(
            include_str!("../config/config.yaml"),
            Path::new("config/config.yaml"),
        )
        .unwrap();
        assert_eq!(config.server.port, 5001);
        assert_eq!(config.audit.network.max_inflight, 2);
        assert_eq!(config.audit.axe_source, DEFAULT_AXE_SOURCE);
    }

    #[test]
    fn bad_port_is_rejected() {
        let err = Config::default()
            .apply_env(env(&[("PORT", "http")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key: "PORT", .. }));
    }

    #[tokio::test]
    async fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  port: 7000\naudit:\n  screenshot: false\n  settle_delay_ms: 0\nllm:\n  concurrency: 8\n"
        )
        .unwrap();

        let loaded = load_config(Some(file.path()), env(&[])).await.unwrap();
        let config = loaded.config;
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.llm.concurrency, 8);
        assert!(config.audit.settings().screenshot.is_none());
        assert_eq!(config.audit.navigation_timeout_ms, 60_000);
    }

    #[tokio::test]
    async fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(matches!(
            load_config(Some(missing.as_path()), env(&[])).await,
            Err(ConfigError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_yaml_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server: [unclosed").unwrap();
        let err = load_config(Some(file.path()), env(&[])).await.unwrap_err();
        assert!(err.to_string().contains("failed to parse config file"));
    }
}
