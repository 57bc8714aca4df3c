//! Shared data model for the audit pipeline.
//!
//! Everything in here is produced once per request and dropped with the response;
//! nothing is persisted.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Remediation text per issue identifier.
pub type SuggestionMap = HashMap<String, String>;

/// Severity reported by the rule engine for a violation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Minor,
    Moderate,
    Serious,
    Critical,
}

impl Impact {
    pub fn as_str(&self) -> &'static str {
        match self {
            Impact::Minor => "minor",
            Impact::Moderate => "moderate",
            Impact::Serious => "serious",
            Impact::Critical => "critical",
        }
    }

    /// Serious and critical violations are the ones that cost score points.
    pub fn is_severe(&self) -> bool {
        matches!(self, Impact::Serious | Impact::Critical)
    }
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown impact '{0}'")]
pub struct UnknownImpact(pub String);

impl FromStr for Impact {
    type Err = UnknownImpact;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "minor" => Ok(Impact::Minor),
            "moderate" => Ok(Impact::Moderate),
            "serious" => Ok(Impact::Serious),
            "critical" => Ok(Impact::Critical),
            other => Err(UnknownImpact(other.to_string())),
        }
    }
}

/// A single failed accessibility rule on the audited page.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub description: String,
    #[serde(default, deserialize_with = "lenient_impact")]
    pub impact: Option<Impact>,
}

impl Issue {
    pub fn new(id: impl Into<String>, description: impl Into<String>, impact: Option<Impact>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            impact,
        }
    }

    pub fn is_severe(&self) -> bool {
        self.impact.map(|impact| impact.is_severe()).unwrap_or(false)
    }
}

/// Unknown or missing impact strings collapse to `None` instead of failing the audit.
fn lenient_impact<'de, D>(deserializer: D) -> Result<Option<Impact>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|value| value.parse().ok()))
}

/// Full-page capture, base64 encoded for transport.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Screenshot(String);

impl Screenshot {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(STANDARD.encode(bytes))
    }

    pub fn as_base64(&self) -> &str {
        &self.0
    }

    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.0)
    }
}

/// Output of one audit run before enrichment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuditOutcome {
    pub issues: Vec<Issue>,
    pub screenshot: Option<Screenshot>,
}

/// Response body returned for a successful analysis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub issues: Vec<Issue>,
    pub suggestions: SuggestionMap,
    pub score: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<Screenshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn impact_parses_case_insensitively() {
        assert_eq!("Critical".parse::<Impact>(), Ok(Impact::Critical));
        assert_eq!(" minor ".parse::<Impact>(), Ok(Impact::Minor));
        assert!("blocker".parse::<Impact>().is_err());
    }

    #[test]
    fn issue_tolerates_null_and_unknown_impact() {
        let issue: Issue = serde_json::from_value(json!({
            "id": "region",
            "description": "All page content should be contained by landmarks",
            "impact": null
        }))
        .unwrap();
        assert_eq!(issue.impact, None);

        let issue: Issue = serde_json::from_value(json!({
            "id": "region",
            "description": "d",
            "impact": "catastrophic"
        }))
        .unwrap();
        assert_eq!(issue.impact, None);

        let issue: Issue =
            serde_json::from_value(json!({ "id": "region", "description": "d" })).unwrap();
        assert_eq!(issue.impact, None);
    }

    #[test]
    fn result_omits_missing_screenshot() {
        let result = AnalysisResult {
            issues: vec![Issue::new("image-alt", "Images must have alternate text", Some(Impact::Critical))],
            suggestions: SuggestionMap::from([("image-alt".to_string(), "Add alt text.".to_string())]),
            score: 90,
            screenshot: None,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("screenshot").is_none());
        assert_eq!(value["issues"][0]["impact"], "critical");
        assert_eq!(value["score"], 90);
    }

    #[test]
    fn screenshot_encodes_base64() {
        let shot = Screenshot::from_bytes(b"\xff\xd8jpeg");
        assert_eq!(shot.decode().unwrap(), b"\xff\xd8jpeg".to_vec());
        assert_eq!(serde_json::to_value(&shot).unwrap(), json!(shot.as_base64()));
    }
}
