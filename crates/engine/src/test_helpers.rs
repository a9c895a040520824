//! Shared test helpers for the engine modules.

use gemline_core::channel::{Channel, MediaContent};
use gemline_core::error::{ChannelError, ProviderError};
use gemline_core::message::{Part, Turn};
use gemline_core::provider::{GenerateResult, InferenceBackend};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// How [`ScriptedBackend`] answers token-count requests.
#[derive(Debug, Clone, Copy)]
pub enum CountMode {
    /// One token per text character and one per media byte.
    Chars,
    /// Every count request fails.
    Fail,
    /// The backend answers but without a usable total.
    Unavailable,
}

/// Token count used by [`CountMode::Chars`].
pub fn char_tokens(contents: &[Turn]) -> u32 {
    contents
        .iter()
        .flat_map(|t| t.parts.iter())
        .map(|p| match p {
            Part::Text { content } => content.chars().count() as u32,
            Part::InlineMedia { bytes, .. } => bytes.len() as u32,
        })
        .sum()
}

/// Inference backend that replays scripted generation results.
///
/// Once the script runs out it echoes the last turn of the request.
pub struct ScriptedBackend {
    count_mode: CountMode,
    responses: Mutex<VecDeque<Result<GenerateResult, ProviderError>>>,
    requests: Mutex<Vec<Vec<Turn>>>,
    count_calls: Mutex<usize>,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    pub fn new(count_mode: CountMode) -> Self {
        Self {
            count_mode,
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            count_calls: Mutex::new(0),
            delay: None,
        }
    }

    pub fn with_responses(self, responses: Vec<Result<GenerateResult, ProviderError>>) -> Self {
        *self.responses.lock().unwrap() = responses.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every `generate_content` payload received so far.
    pub fn requests(&self) -> Vec<Vec<Turn>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count_calls(&self) -> usize {
        *self.count_calls.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn count_tokens(
        &self,
        _model: &str,
        contents: &[Turn],
    ) -> Result<Option<u32>, ProviderError> {
        *self.count_calls.lock().unwrap() += 1;
        match self.count_mode {
            CountMode::Chars => Ok(Some(char_tokens(contents))),
            CountMode::Fail => Err(ProviderError::Network("count unavailable".into())),
            CountMode::Unavailable => Ok(None),
        }
    }

    async fn generate_content(
        &self,
        _model: &str,
        contents: &[Turn],
    ) -> Result<GenerateResult, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.requests.lock().unwrap().push(contents.to_vec());
        let scripted = self.responses.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            let last = contents.last().map(Turn::text).unwrap_or_default();
            Ok(GenerateResult::PlainText(format!("echo: {last}")))
        })
    }
}

/// Channel that records replies and serves canned media.
#[derive(Default)]
pub struct RecordingChannel {
    replies: Mutex<Vec<(String, String)>>,
    failures_left: Mutex<usize>,
    content: Mutex<HashMap<String, MediaContent>>,
    fetch_delay: Option<Duration>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` reply attempts.
    pub fn failing_replies(self, n: usize) -> Self {
        *self.failures_left.lock().unwrap() = n;
        self
    }

    pub fn with_content(self, message_id: &str, bytes: Vec<u8>, mime_type: &str) -> Self {
        self.content.lock().unwrap().insert(
            message_id.to_string(),
            MediaContent {
                bytes,
                mime_type: mime_type.to_string(),
            },
        );
        self
    }

    /// Make every content download take `delay`.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Successfully delivered `(reply_token, text)` pairs.
    pub fn replies(&self) -> Vec<(String, String)> {
        self.replies.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn reply(&self, reply_token: &str, text: &str) -> Result<(), ChannelError> {
        {
            let mut failures = self.failures_left.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(ChannelError::DeliveryFailed {
                    channel: "recording".into(),
                    reason: "status 500: scripted failure".into(),
                });
            }
        }
        self.replies
            .lock()
            .unwrap()
            .push((reply_token.to_string(), text.to_string()));
        Ok(())
    }

    async fn fetch_content(&self, message_id: &str) -> Result<MediaContent, ChannelError> {
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.content
            .lock()
            .unwrap()
            .get(message_id)
            .cloned()
            .ok_or_else(|| ChannelError::ContentUnavailable {
                message_id: message_id.to_string(),
                reason: "status 404".into(),
            })
    }
}
