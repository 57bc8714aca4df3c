use std::env;
use std::fs as stdfs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use cdp_adapter::ChromiumLauncher;
use stealth::StealthRuntime;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::analysis::AnalysisService;
use crate::audit::{AuditSettings, AxeScript, BrowserAuditRunner};
use crate::config::{self, Config, LoadedConfig};
use crate::enricher::SuggestionEnricher;
use crate::llm::OpenAiProvider;

/// Copy `config/local.env` entries into the environment unless already set.
pub fn load_local_env_overrides() {
    let path = Path::new("config/local.env");
    if !path.exists() {
        return;
    }

    match stdfs::read_to_string(path) {
        Ok(contents) => {
            for (key, value) in parse_env_lines(&contents) {
                if env::var(&key).is_err() {
                    env::set_var(key, value);
                }
            }
            info!(path = %path.display(), "loaded environment overrides from local.env");
        }
        Err(err) => {
            warn!(path = %path.display(), ?err, "failed to read local.env overrides");
        }
    }
}

fn parse_env_lines(contents: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            warn!(line = idx + 1, "invalid local.env entry; skipping");
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        pairs.push((key.to_string(), unquote(value.trim())));
    }
    pairs
}

fn unquote(value: &str) -> String {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return value[1..value.len() - 1].replace("\\n", "\n");
        }
    }
    value.to_string()
}

pub fn init_logging(level: &str, debug: bool, json: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .context("failed to install log subscriber")?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .context("failed to install log subscriber")?;
    }
    Ok(())
}

pub async fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    config::load_config(explicit, |key| env::var(key).ok())
        .await
        .context("failed to load configuration")
}

/// Wire the production pipeline: Chromium launcher, stealth profile, OpenAI enricher.
pub fn build_analysis_service(
    config: &Config,
    axe: Option<Arc<AxeScript>>,
    settings: AuditSettings,
) -> Result<AnalysisService> {
    let launcher =
        ChromiumLauncher::new(config.browser.clone()).with_tap_config(config.audit.network);
    if config.browser.websocket_url.is_none() && config.browser.executable.as_os_str().is_empty() {
        warn!("no Chromium executable detected; set ACCESSLY_CHROME or browser.executable");
    }

    let stealth = match &config.stealth.profile_path {
        Some(path) => StealthRuntime::from_bundle_path(path, config.stealth.profile.as_deref())
            .with_context(|| format!("failed to load stealth profiles from {}", path.display()))?,
        None => StealthRuntime::default(),
    };
    info!(profile = %stealth.profile().name, "stealth profile selected");

    let provider = OpenAiProvider::new(config.llm.openai()).context("failed to build OpenAI client")?;
    if !provider.has_keys() {
        warn!("OPENAI_API_KEY is not set; every suggestion will use the fallback text");
    }
    let enricher = SuggestionEnricher::new(Arc::new(provider))
        .with_max_tokens(config.llm.max_tokens)
        .with_concurrency(config.llm.concurrency);

    let runner = BrowserAuditRunner::new(Arc::new(launcher), stealth, axe, settings);
    Ok(AnalysisService::new(Arc::new(runner), enricher))
}
