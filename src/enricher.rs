//! Per-issue remediation text from the language model.

use std::collections::HashSet;
use std::sync::Arc;

use accessly_core_types::{Issue, SuggestionMap};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::llm::{fix_prompt, CompletionProvider};
use crate::metrics;

pub const FALLBACK_SUGGESTION: &str = "Refer to accessibility guidelines";
pub const DEFAULT_MAX_TOKENS: u32 = 250;
pub const DEFAULT_CONCURRENCY: usize = 4;

pub struct SuggestionEnricher {
    provider: Arc<dyn CompletionProvider>,
    max_tokens: u32,
    concurrency: usize,
}

impl SuggestionEnricher {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            provider,
            max_tokens: DEFAULT_MAX_TOKENS,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// One entry per distinct issue id. Never fails: a failed request yields
    /// [`FALLBACK_SUGGESTION`] for that issue only.
    pub async fn enrich(&self, issues: &[Issue]) -> SuggestionMap {
        let mut seen = HashSet::new();
        let unique: Vec<Issue> = issues
            .iter()
            .filter(|issue| seen.insert(issue.id.as_str()))
            .cloned()
            .collect();

        stream::iter(unique.into_iter().map(|issue| async move {
            let text = self.suggest(&issue).await;
            (issue.id, text)
        }))
        .buffer_unordered(self.concurrency)
        .collect::<SuggestionMap>()
        .await
    }

    async fn suggest(&self, issue: &Issue) -> String {
        let prompt = fix_prompt(&issue.description);
        match self.provider.complete(&prompt, self.max_tokens).await {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    warn!(issue = %issue.id, "empty suggestion, using fallback");
                    metrics::record_suggestion_fallback();
                    FALLBACK_SUGGESTION.to_string()
                } else {
                    debug!(issue = %issue.id, chars = text.len(), "suggestion ready");
                    text.to_string()
                }
            }
            Err(err) => {
                warn!(issue = %issue.id, error = %err, "suggestion request failed");
                metrics::record_suggestion_fallback();
                FALLBACK_SUGGESTION.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use accessly_core_types::Impact;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedProvider {
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError> {
            assert_eq!(max_tokens, DEFAULT_MAX_TOKENS);
            self.prompts.lock().unwrap().push(prompt.to_string());
            if prompt.contains("quota") {
                Err(LlmError::RateLimited("quota".into()))
            } else if prompt.contains("blank") {
                Ok("   \n".into())
            } else {
                Ok("  Add a text alternative.  ".into())
            }
        }
    }

    fn issue(id: &str, description: &str) -> Issue {
        Issue::new(id, description, Some(Impact::Serious))
    }

    #[tokio::test]
    async fn failures_fall_back_per_issue() {
        let provider = ScriptedProvider::new();
        let enricher = SuggestionEnricher::new(provider.clone());
        let map = enricher
            .enrich(&[
                issue("image-alt", "Images must have alternate text"),
                issue("color-contrast", "quota exceeded trigger"),
                issue("label", "blank answer"),
            ])
            .await;

        assert_eq!(map.len(), 3);
        assert_eq!(map["image-alt"], "Add a text alternative.");
        assert_eq!(map["color-contrast"], FALLBACK_SUGGESTION);
        assert_eq!(map["label"], FALLBACK_SUGGESTION);
    }

    #[tokio::test]
    async fn duplicate_ids_are_enriched_once() {
        let provider = ScriptedProvider::new();
        let enricher = SuggestionEnricher::new(provider.clone()).with_concurrency(0);
        let map = enricher
            .enrich(&[
                issue("region", "first description"),
                issue("region", "second description"),
            ])
            .await;

        assert_eq!(map.len(), 1);
        let prompts = provider.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("first description"));
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn enrich_future_can_cross_threads() {
        let enricher = SuggestionEnricher::new(ScriptedProvider::new());
        let issues = vec![issue("image-alt", "Images must have alternate text")];
        let pending = enricher.enrich(&issues);
        assert_send(&pending);
    }

    #[tokio::test]
    async fn enrichment_runs_inside_spawned_task() {
        let enricher = Arc::new(SuggestionEnricher::new(ScriptedProvider::new()));
        let issues = vec![issue("image-alt", "Images must have alternate text")];
        let map = tokio::spawn(async move { enricher.enrich(&issues).await })
            .await
            .unwrap();
        assert_eq!(map["image-alt"], "Add a text alternative.");
    }

    #[tokio::test]
    async fn no_issues_means_no_calls() {
        let provider = ScriptedProvider::new();
        let map = SuggestionEnricher::new(provider.clone()).enrich(&[]).await;
        assert!(map.is_empty());
        assert!(provider.prompts.lock().unwrap().is_empty());
    }
}
