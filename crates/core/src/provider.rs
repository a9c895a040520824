//! InferenceBackend trait: the abstraction over the hosted language model.
//!
//! A backend can measure a context in tokens and generate a reply for it.
//! The relay ships one implementation (Gemini); tests use scripted mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{Part, Turn};

/// One generated alternative: its parts in model order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub parts: Vec<Part>,
}

impl Candidate {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            parts: vec![Part::text(content)],
        }
    }
}

/// The result of a generation call.
///
/// A backend either reports a flat text field or an ordered list of
/// candidates; [`GenerateResult::reply_text`] is the single extraction rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum GenerateResult {
    PlainText(String),
    Candidates(Vec<Candidate>),
}

impl GenerateResult {
    /// The reply text carried by this result.
    ///
    /// Flat text wins when non-empty. Otherwise candidates are scanned in
    /// order and the first non-empty text part is returned. Empty string when
    /// nothing textual was produced.
    pub fn reply_text(&self) -> String {
        match self {
            GenerateResult::PlainText(text) if !text.is_empty() => text.clone(),
            GenerateResult::PlainText(_) => String::new(),
            GenerateResult::Candidates(candidates) => candidates
                .iter()
                .flat_map(|c| c.parts.iter())
                .filter_map(Part::as_text)
                .find(|t| !t.is_empty())
                .map(str::to_string)
                .unwrap_or_default(),
        }
    }
}

/// The core inference trait.
///
/// `contents` is the fully assembled context: the system prompt turn first,
/// then the conversation history in order.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// A human-readable name for this backend (e.g., "gemini").
    fn name(&self) -> &str;

    /// Count the tokens of `contents`.
    ///
    /// `Ok(None)` means the backend answered but gave no usable count.
    async fn count_tokens(
        &self,
        model: &str,
        contents: &[Turn],
    ) -> std::result::Result<Option<u32>, ProviderError>;

    /// Generate a reply for `contents`.
    async fn generate_content(
        &self,
        model: &str,
        contents: &[Turn],
    ) -> std::result::Result<GenerateResult, ProviderError>;

    /// Health check: can we reach the backend with our credentials?
    async fn health_check(&self, _model: &str) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}
