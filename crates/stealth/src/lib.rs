//! Stealth profiles for audit pages.
//!
//! Sites that fingerprint headless Chrome tend to serve an error page instead of their
//! content. Before navigating, the audit applies a [`StealthProfile`]: a desktop user agent,
//! a matching `Accept-Language` header, and init scripts that mask automation markers.

pub mod config;

use std::collections::BTreeMap;
use std::path::Path;

use cdp_adapter::{AdapterError, Cdp};
use thiserror::Error;
use tracing::debug;

pub use crate::config::{ConfigError, StealthProfile, StealthProfileBundle};

const HIDE_WEBDRIVER: &str =
    "Object.defineProperty(navigator, 'webdriver', { get: () => false });";

#[derive(Clone, Debug, Error)]
pub enum StealthError {
    #[error("cdp I/O failure: {0}")]
    CdpIo(String),
}

impl From<AdapterError> for StealthError {
    fn from(err: AdapterError) -> Self {
        let hint = err
            .hint
            .clone()
            .unwrap_or_else(|| format!("cdp error {:?}", err.kind));
        StealthError::CdpIo(hint)
    }
}

/// Applies one profile to every page it is handed.
#[derive(Clone, Debug, Default)]
pub struct StealthRuntime {
    profile: StealthProfile,
}

impl StealthRuntime {
    pub fn new(profile: StealthProfile) -> Self {
        Self { profile }
    }

    /// Load a bundle file and pick `name`, or the bundle default when `None`.
    pub fn from_bundle_path(
        path: impl AsRef<Path>,
        name: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let bundle = config::load_bundle_from_path(path)?;
        Ok(Self::new(bundle.select(name)?))
    }

    pub fn profile(&self) -> &StealthProfile {
        &self.profile
    }

    /// Scripts registered on the page, in evaluation order.
    pub fn init_scripts(&self) -> Vec<&str> {
        let mut scripts = Vec::with_capacity(self.profile.init_scripts.len() + 1);
        if self.profile.hide_webdriver {
            scripts.push(HIDE_WEBDRIVER);
        }
        scripts.extend(self.profile.init_scripts.iter().map(String::as_str));
        scripts
    }

    /// Must run before the first navigation so init scripts see the document.
    pub async fn configure_page(&self, page: &dyn Cdp) -> Result<(), StealthError> {
        let profile = &self.profile;
        if !profile.user_agent.is_empty() {
            page.set_user_agent(
                &profile.user_agent,
                profile.accept_language.as_deref(),
                profile.platform.as_deref(),
            )
            .await?;
        }

        if let Some(language) = &profile.accept_language {
            let mut headers = BTreeMap::new();
            headers.insert("Accept-Language".to_string(), language.clone());
            page.set_extra_headers(&headers).await?;
        }

        for script in self.init_scripts() {
            page.add_init_script(script).await?;
        }

        debug!(target: "stealth", profile = %profile.name, "stealth profile applied");
        Ok(())
    }
}
