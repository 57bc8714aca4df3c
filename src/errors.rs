//! Errors surfaced at the analysis boundary.
//!
//! Every failure that reaches a caller is one of three kinds. Suggestion failures never get
//! here: the enricher absorbs them per issue.

use cdp_adapter::{AdapterError, AdapterErrorKind};
use stealth::StealthError;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AnalyzeError {
    /// Missing, non-string or blank URL. Raised before any external call.
    #[error("Valid URL is required")]
    InvalidInput,
    /// The site refused the automated session or did not settle in time.
    #[error("This website blocks automated scanning or took too long to load.")]
    NavigationBlocked,
    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),
}

impl AnalyzeError {
    /// Label used for the outcome dimension of analysis metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            AnalyzeError::InvalidInput => "invalid_input",
            AnalyzeError::NavigationBlocked => "blocked",
            AnalyzeError::AnalysisFailed(_) => "failed",
        }
    }

    pub fn failed(cause: impl Into<String>) -> Self {
        AnalyzeError::AnalysisFailed(cause.into())
    }
}

impl From<AdapterError> for AnalyzeError {
    fn from(err: AdapterError) -> Self {
        match err.kind {
            AdapterErrorKind::NavTimeout
            | AdapterErrorKind::ProtocolError
            | AdapterErrorKind::NavBlocked => AnalyzeError::NavigationBlocked,
            AdapterErrorKind::CommandTimeout
            | AdapterErrorKind::NavFailed
            | AdapterErrorKind::CdpIo
            | AdapterErrorKind::ScriptException
            | AdapterErrorKind::Internal => AnalyzeError::AnalysisFailed(err.to_string()),
        }
    }
}

impl From<StealthError> for AnalyzeError {
    fn from(err: StealthError) -> Self {
        AnalyzeError::AnalysisFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_kinds_map_to_the_blocked_message() {
        for kind in [
            AdapterErrorKind::NavTimeout,
            AdapterErrorKind::ProtocolError,
            AdapterErrorKind::NavBlocked,
        ] {
            let err = AnalyzeError::from(AdapterError::new(kind).with_hint("net::ERR_FAILED"));
            assert_eq!(err, AnalyzeError::NavigationBlocked);
            assert_eq!(
                err.to_string(),
                "This website blocks automated scanning or took too long to load."
            );
        }
    }

    #[test]
    fn other_kinds_wrap_the_cause() {
        let err = AnalyzeError::from(
            AdapterError::new(AdapterErrorKind::NavFailed).with_hint("net::ERR_NAME_NOT_RESOLVED"),
        );
        assert_eq!(
            err.to_string(),
            "Analysis failed: navigation failed: net::ERR_NAME_NOT_RESOLVED"
        );
        assert_eq!(err.outcome(), "failed");
    }

    #[test]
    fn command_deadline_is_an_analysis_failure() {
        let err = AnalyzeError::from(
            AdapterError::new(AdapterErrorKind::CommandTimeout)
                .with_hint("Page.captureScreenshot timed out"),
        );
        assert_eq!(
            err.to_string(),
            "Analysis failed: cdp command timed out: Page.captureScreenshot timed out"
        );
        assert_eq!(err.outcome(), "failed");
    }
}
