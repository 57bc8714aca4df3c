//! Request handling: validate, audit, enrich, score.

use std::sync::Arc;
use std::time::Instant;

use accessly_core_types::AnalysisResult;
use tracing::{info, warn};

use crate::audit::AuditRunner;
use crate::enricher::SuggestionEnricher;
use crate::errors::AnalyzeError;
use crate::metrics;
use crate::score::calculate_score;

pub struct AnalysisService {
    runner: Arc<dyn AuditRunner>,
    enricher: SuggestionEnricher,
}

impl AnalysisService {
    pub fn new(runner: Arc<dyn AuditRunner>, enricher: SuggestionEnricher) -> Self {
        Self { runner, enricher }
    }

    pub async fn analyze(&self, url: &str) -> Result<AnalysisResult, AnalyzeError> {
        let started = Instant::now();
        let result = self.run_pipeline(url).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(err) => err.outcome(),
        };
        metrics::record_analysis(outcome, started.elapsed());
        result
    }

    async fn run_pipeline(&self, url: &str) -> Result<AnalysisResult, AnalyzeError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(AnalyzeError::InvalidInput);
        }

        info!(url, "analyzing");
        let audit = self.runner.run(url).await.map_err(|err| {
            warn!(url, error = %err, "analysis failed");
            err
        })?;
        let suggestions = self.enricher.enrich(&audit.issues).await;
        let score = calculate_score(&audit.issues);
        info!(url, issues = audit.issues.len(), score, "analysis complete");

        Ok(AnalysisResult {
            issues: audit.issues,
            suggestions,
            score,
            screenshot: audit.screenshot,
        })
    }
}
