//! Profile definitions and bundle loading.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use thiserror::Error;

pub const DESKTOP_CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to deserialize profile bundle: {0}")]
    Deserialize(String),
    #[error("unknown stealth profile '{0}'")]
    UnknownProfile(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StealthProfileBundle {
    pub profiles: Vec<StealthProfile>,
    /// Profile used when no name is requested. Falls back to the first profile.
    #[serde(default)]
    pub default: Option<String>,
}

impl StealthProfileBundle {
    pub fn select(&self, name: Option<&str>) -> Result<StealthProfile, ConfigError> {
        let wanted = name.or(self.default.as_deref());
        match wanted {
            Some(name) => self
                .profiles
                .iter()
                .find(|profile| profile.name == name)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownProfile(name.to_string())),
            None => self
                .profiles
                .first()
                .cloned()
                .ok_or_else(|| ConfigError::Deserialize("bundle has no profiles".into())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StealthProfile {
    pub name: String,
    pub user_agent: String,
    #[serde(default)]
    pub accept_language: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default = "default_true")]
    pub hide_webdriver: bool,
    /// Extra scripts evaluated on every new document, after the built-in ones.
    #[serde(default)]
    pub init_scripts: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl StealthProfile {
    /// Windows desktop Chrome, US English.
    pub fn desktop_chrome() -> Self {
        Self {
            name: "desktop-chrome".into(),
            user_agent: DESKTOP_CHROME_UA.into(),
            accept_language: Some("en-US,en;q=0.9".into()),
            platform: None,
            locale: Some("en-US".into()),
            hide_webdriver: true,
            init_scripts: Vec::new(),
        }
    }
}

impl Default for StealthProfile {
    fn default() -> Self {
        Self::desktop_chrome()
    }
}

pub fn load_bundle_from_reader<R: Read>(
    mut reader: R,
) -> Result<StealthProfileBundle, ConfigError> {
    let mut buf = String::new();
    reader.read_to_string(&mut buf)?;
    parse_bundle_str(&buf)
}

pub fn load_bundle_from_path(path: impl AsRef<Path>) -> Result<StealthProfileBundle, ConfigError> {
    let file = File::open(path.as_ref())?;
    load_bundle_from_reader(file)
}

pub fn parse_bundle_str(raw: &str) -> Result<StealthProfileBundle, ConfigError> {
    match serde_json::from_str(raw) {
        Ok(bundle) => Ok(bundle),
        Err(json_err) => serde_yaml::from_str(raw).map_err(|yaml_err| {
            ConfigError::Deserialize(format!(
                "json error: {}; yaml error: {}",
                json_err, yaml_err
            ))
        }),
    }
}
