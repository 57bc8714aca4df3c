use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::info;
use url::Url;

use super::output::{render, OutputFormat};
use super::runtime::build_analysis_service;
use crate::audit::AxeScript;
use crate::config::Config;

#[derive(Args, Clone, Debug)]
pub struct AnalyzeArgs {
    /// Page to audit
    pub url: String,

    /// Skip the full-page screenshot
    #[arg(long)]
    pub no_screenshot: bool,

    /// Write the screenshot to this file (JPEG)
    #[arg(long, value_name = "FILE", conflicts_with = "no_screenshot")]
    pub screenshot_out: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "human")]
    pub output: OutputFormat,
}

/// Reject blank or unparsable input before any browser or network work.
pub fn validate_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("Valid URL is required");
    }
    Url::parse(trimmed).with_context(|| format!("Valid URL is required (got '{trimmed}')"))
}

pub async fn cmd_analyze(args: AnalyzeArgs, config: Config) -> Result<()> {
    let url = validate_url(&args.url)?;

    let client = reqwest::Client::new();
    let axe = AxeScript::load(&config.audit.axe_source, &client)
        .await
        .context("failed to load axe-core")?;

    let mut settings = config.audit.settings();
    if args.no_screenshot {
        settings.screenshot = None;
    }
    let service = build_analysis_service(&config, Some(Arc::new(axe)), settings)?;
    let mut result = service.analyze(url.as_str()).await?;

    if let Some(path) = &args.screenshot_out {
        match result.screenshot.take() {
            Some(shot) => {
                let bytes = shot.decode().context("screenshot is not valid base64")?;
                tokio::fs::write(path, bytes)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(path = %path.display(), "screenshot saved");
            }
            None => bail!("no screenshot was captured"),
        }
    }

    println!("{}", render(&result, args.output)?);
    Ok(())
}
