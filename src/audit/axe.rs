//! axe-core injection and violation collection.

use std::path::Path;

use accessly_core_types::Issue;
use cdp_adapter::Cdp;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::errors::AnalyzeError;

pub const DEFAULT_AXE_SOURCE: &str =
    "https://cdnjs.cloudflare.com/ajax/libs/axe-core/4.10.2/axe.min.js";

/// Resolves to `[{id, description, impact}]` for violations only.
const RUN_VIOLATIONS: &str = r#"axe.run(document, { resultTypes: ['violations'] })
  .then(results => results.violations.map(v => ({
    id: v.id,
    description: v.description,
    impact: v.impact || null
  })))"#;

#[derive(Debug, Error)]
pub enum AxeLoadError {
    #[error("failed to read axe-core from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to download axe-core from {url}: {message}")]
    Http { url: String, message: String },
    #[error("axe-core source at {0} is empty")]
    Empty(String),
}

/// The rule engine source, loaded once and shared by every audit.
#[derive(Clone, Debug)]
pub struct AxeScript {
    source: String,
    origin: String,
}

impl AxeScript {
    pub fn from_source(source: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            origin: origin.into(),
        }
    }

    /// `location` is an `http(s)://` URL or a file path.
    pub async fn load(location: &str, client: &Client) -> Result<Self, AxeLoadError> {
        let source = if location.starts_with("http://") || location.starts_with("https://") {
            fetch(location, client).await?
        } else {
            read_file(Path::new(location)).await?
        };
        if source.trim().is_empty() {
            return Err(AxeLoadError::Empty(location.to_string()));
        }
        info!(origin = location, bytes = source.len(), "axe-core loaded");
        Ok(Self::from_source(source, location))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Inject the engine into the current document and return its violations.
    pub async fn collect_violations(&self, page: &dyn Cdp) -> Result<Vec<Issue>, AnalyzeError> {
        let present = page.evaluate_script("typeof window.axe === 'object'").await?;
        if present != Value::Bool(true) {
            page.evaluate_script(&format!("{}\n;void 0", self.source))
                .await?;
        }

        let raw = page.evaluate_script(RUN_VIOLATIONS).await?;
        let issues: Vec<Issue> = serde_json::from_value(raw)
            .map_err(|err| AnalyzeError::failed(format!("unexpected axe-core result: {err}")))?;
        debug!(violations = issues.len(), "axe-core finished");
        Ok(issues)
    }
}

async fn fetch(url: &str, client: &Client) -> Result<String, AxeLoadError> {
    let http_err = |message: String| AxeLoadError::Http {
        url: url.to_string(),
        message,
    };
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|err| http_err(err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(http_err(format!("status {status}")));
    }
    response.text().await.map_err(|err| http_err(err.to_string()))
}

async fn read_file(path: &Path) -> Result<String, AxeLoadError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| AxeLoadError::Io {
            path: path.display().to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "window.axe = {{}};").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let script = AxeScript::load(&path, &Client::new()).await.unwrap();
        assert_eq!(script.source(), "window.axe = {};");
        assert_eq!(script.origin(), path);
    }

    #[tokio::test]
    async fn empty_or_missing_files_are_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().to_string();
        assert!(matches!(
            AxeScript::load(&path, &Client::new()).await,
            Err(AxeLoadError::Empty(_))
        ));
        assert!(matches!(
            AxeScript::load("/definitely/not/here/axe.js", &Client::new()).await,
            Err(AxeLoadError::Io { .. })
        ));
    }
}
