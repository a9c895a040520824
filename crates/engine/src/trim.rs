//! Token-budget trimming.
//!
//! After every append the assembled context (system prompt plus history) is
//! measured with the backend's token counter, and the oldest turns are
//! evicted until it fits the budget. A single remaining turn is never
//! evicted even when it alone exceeds the budget.
//!
//! Counting is fail-open: if the backend cannot produce a total the pass
//! stops without evicting anything further.

use crate::history::ConversationHistory;
use gemline_core::provider::InferenceBackend;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of one trim pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrimReport {
    /// Turns evicted from the head.
    pub evicted: usize,
    /// Last measured total, if the backend produced one.
    pub tokens: Option<u32>,
    /// The pass stopped because counting failed.
    pub fail_open: bool,
}

/// Evicts head turns until the context fits a token budget.
pub struct Trimmer {
    backend: Arc<dyn InferenceBackend>,
    model: String,
    budget: u32,
}

impl Trimmer {
    pub fn new(backend: Arc<dyn InferenceBackend>, model: impl Into<String>, budget: u32) -> Self {
        Self {
            backend,
            model: model.into(),
            budget,
        }
    }

    /// Run one trim pass over `history` with `system_prompt` leading the context.
    pub async fn trim(&self, history: &mut ConversationHistory, system_prompt: &str) -> TrimReport {
        let mut report = TrimReport::default();

        loop {
            let contents = history.assemble(system_prompt);
            let total = match self.backend.count_tokens(&self.model, &contents).await {
                Ok(Some(total)) => total,
                Ok(None) => {
                    debug!(model = %self.model, "Token count unavailable, keeping history");
                    report.fail_open = true;
                    break;
                }
                Err(e) => {
                    warn!(model = %self.model, error = %e, "Token count failed, keeping history");
                    report.fail_open = true;
                    break;
                }
            };
            report.tokens = Some(total);

            if total <= self.budget || history.len() <= 1 {
                break;
            }
            history.evict_oldest();
            report.evicted += 1;
        }

        if report.evicted > 0 {
            debug!(
                evicted = report.evicted,
                tokens = ?report.tokens,
                budget = self.budget,
                "Trimmed conversation history"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{CountMode, ScriptedBackend, char_tokens};
    use gemline_core::message::Turn;

    fn trimmer(mode: CountMode, budget: u32) -> (Arc<ScriptedBackend>, Trimmer) {
        let backend = Arc::new(ScriptedBackend::new(mode));
        let trimmer = Trimmer::new(backend.clone(), "models/test", budget);
        (backend, trimmer)
    }

    fn history_of(sizes: &[usize]) -> ConversationHistory {
        let mut history = ConversationHistory::new();
        for (i, size) in sizes.iter().enumerate() {
            let body: String = std::iter::repeat_n(char::from(b'a' + i as u8), *size).collect();
            history.push(Turn::user_text(body));
        }
        history
    }

    #[tokio::test]
    async fn within_budget_is_untouched() {
        let (_, t) = trimmer(CountMode::Chars, 100);
        let mut history = history_of(&[10, 10]);
        let report = t.trim(&mut history, "").await;
        assert_eq!(report.evicted, 0);
        assert_eq!(report.tokens, Some(20));
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn evicts_head_first_and_no_more_than_needed() {
        // Ten turns of 500 tokens against a budget of 2000.
        let (_, t) = trimmer(CountMode::Chars, 2000);
        let mut history = history_of(&[500; 10]);
        let report = t.trim(&mut history, "").await;

        assert_eq!(report.evicted, 6);
        assert_eq!(history.len(), 4);
        assert!(char_tokens(&history.assemble("")) <= 2000);
        // The newest four survive, in order.
        let heads: Vec<char> = history
            .iter()
            .map(|t| t.text().chars().next().unwrap())
            .collect();
        assert_eq!(heads, vec!['g', 'h', 'i', 'j']);
    }

    #[tokio::test]
    async fn system_prompt_counts_against_budget() {
        let (_, t) = trimmer(CountMode::Chars, 30);
        let mut history = history_of(&[10, 10, 10]);
        let prompt = "p".repeat(10);
        t.trim(&mut history, &prompt).await;
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn single_oversized_turn_is_kept() {
        let (backend, t) = trimmer(CountMode::Chars, 5);
        let mut history = history_of(&[3, 50]);
        let report = t.trim(&mut history, "").await;

        assert_eq!(report.evicted, 1);
        assert_eq!(history.len(), 1);
        assert_eq!(report.tokens, Some(50));
        // Terminates: one count before the eviction, one after.
        assert_eq!(backend.count_calls(), 2);
    }

    #[tokio::test]
    async fn count_failure_is_fail_open() {
        let (backend, t) = trimmer(CountMode::Fail, 1);
        let mut history = history_of(&[100, 100, 100]);
        let report = t.trim(&mut history, "").await;

        assert!(report.fail_open);
        assert_eq!(report.evicted, 0);
        assert_eq!(history.len(), 3);
        assert_eq!(backend.count_calls(), 1);
    }

    #[tokio::test]
    async fn missing_total_is_fail_open() {
        let (_, t) = trimmer(CountMode::Unavailable, 1);
        let mut history = history_of(&[100, 100]);
        let report = t.trim(&mut history, "").await;
        assert!(report.fail_open);
        assert_eq!(report.tokens, None);
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn empty_history_terminates() {
        let (_, t) = trimmer(CountMode::Chars, 1);
        let mut history = ConversationHistory::new();
        let report = t.trim(&mut history, "a long system prompt").await;
        assert_eq!(report.evicted, 0);
        assert!(history.is_empty());
    }
}
