//! Command parameter types exposed by the CDP adapter interface.

use serde::{Deserialize, Serialize};

/// Condition a navigation waits for before it resolves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitGate {
    /// `document.readyState` reached `interactive` or `complete`.
    DomReady,
    /// DOM ready, then the network tap reports a quiet window.
    NetworkQuiet,
}

/// Options for capturing screenshots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotOptions {
    pub format: ScreenshotFormat,
    /// Capture the whole scrollable document instead of the viewport.
    pub full_page: bool,
}

impl ScreenshotOptions {
    pub fn full_page_jpeg(quality: u8) -> Self {
        Self {
            format: ScreenshotFormat::Jpeg {
                quality: Some(quality),
            },
            full_page: true,
        }
    }
}

impl Default for ScreenshotOptions {
    fn default() -> Self {
        Self::full_page_jpeg(80)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ScreenshotFormat {
    Png,
    Jpeg { quality: Option<u8> },
}

impl ScreenshotFormat {
    pub(crate) fn to_params(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut params = serde_json::Map::new();
        match self {
            ScreenshotFormat::Png => {
                params.insert("format".into(), "png".into());
            }
            ScreenshotFormat::Jpeg { quality } => {
                params.insert("format".into(), "jpeg".into());
                if let Some(quality) = quality {
                    params.insert("quality".into(), (*quality).min(100).into());
                }
            }
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_full_page_jpeg_80() {
        let opts = ScreenshotOptions::default();
        assert!(opts.full_page);
        let params = opts.format.to_params();
        assert_eq!(params["format"], "jpeg");
        assert_eq!(params["quality"], 80);
    }

    #[test]
    fn png_has_no_quality() {
        let params = ScreenshotFormat::Png.to_params();
        assert_eq!(params["format"], "png");
        assert!(!params.contains_key("quality"));
    }
}
