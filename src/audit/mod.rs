//! Drives one browser session through a full accessibility audit.

pub mod axe;

use std::sync::Arc;
use std::time::Duration;

use accessly_core_types::{AuditOutcome, Screenshot};
use async_trait::async_trait;
use cdp_adapter::{Cdp, ScreenshotOptions, SessionLauncher, WaitGate};
use stealth::StealthRuntime;
use tracing::{debug, info, warn};

pub use self::axe::{AxeLoadError, AxeScript, DEFAULT_AXE_SOURCE};
use crate::errors::AnalyzeError;

#[async_trait]
pub trait AuditRunner: Send + Sync {
    async fn run(&self, url: &str) -> Result<AuditOutcome, AnalyzeError>;
}

#[derive(Clone, Debug)]
pub struct AuditSettings {
    pub navigation_timeout: Duration,
    /// Wait after navigation so client-side rendering can finish.
    pub settle_delay: Duration,
    /// `None` skips the capture.
    pub screenshot: Option<ScreenshotOptions>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(60),
            settle_delay: Duration::from_secs(3),
            screenshot: Some(ScreenshotOptions::default()),
        }
    }
}

pub struct BrowserAuditRunner {
    launcher: Arc<dyn SessionLauncher>,
    stealth: StealthRuntime,
    axe: Option<Arc<AxeScript>>,
    settings: AuditSettings,
}

impl BrowserAuditRunner {
    pub fn new(
        launcher: Arc<dyn SessionLauncher>,
        stealth: StealthRuntime,
        axe: Option<Arc<AxeScript>>,
        settings: AuditSettings,
    ) -> Self {
        Self {
            launcher,
            stealth,
            axe,
            settings,
        }
    }

    pub fn has_rule_engine(&self) -> bool {
        self.axe.is_some()
    }

    async fn audit_page(
        &self,
        page: &dyn Cdp,
        url: &str,
        axe: &AxeScript,
    ) -> Result<AuditOutcome, AnalyzeError> {
        self.stealth.configure_page(page).await?;
        page.navigate(url, WaitGate::NetworkQuiet, self.settings.navigation_timeout)
            .await?;
        debug!(url, "navigation settled");

        if !self.settings.settle_delay.is_zero() {
            tokio::time::sleep(self.settings.settle_delay).await;
        }

        let screenshot = match &self.settings.screenshot {
            Some(options) => {
                let bytes = page.screenshot(options).await?;
                Some(Screenshot::from_bytes(&bytes))
            }
            None => None,
        };

        let issues = axe.collect_violations(page).await?;
        Ok(AuditOutcome { issues, screenshot })
    }
}

#[async_trait]
impl AuditRunner for BrowserAuditRunner {
    async fn run(&self, url: &str) -> Result<AuditOutcome, AnalyzeError> {
        let axe = self
            .axe
            .as_deref()
            .ok_or_else(|| AnalyzeError::failed("axe-core script is not loaded"))?;

        let page = self.launcher.launch().await?;
        let outcome = self.audit_page(page.as_ref(), url, axe).await;
        if let Err(err) = page.close().await {
            warn!(url, error = %err, "failed to close browser session");
        }

        match &outcome {
            Ok(result) => info!(
                url,
                violations = result.issues.len(),
                screenshot = result.screenshot.is_some(),
                "audit complete"
            ),
            Err(err) => warn!(url, error = %err, "audit failed"),
        }
        outcome
    }
}
