//! Reply pipelines.
//!
//! [`ConversationEngine`] owns the prompt and history stores and runs the
//! text and image reply cycles against an [`InferenceBackend`]. Each cycle
//! (append, trim, generate, append, trim) runs inside the per-key critical
//! section provided by [`HistoryStore::lock`], so replies from one sender
//! are recorded in arrival order and user/model turns stay paired.

use crate::command::Command;
use crate::history::HistoryStore;
use crate::media::{self, DownscaleOptions};
use crate::prompt::SystemPromptStore;
use crate::reply::{MAX_PROMPT_ECHO_CHARS, take_chars, truncate_for_transport};
use crate::trim::Trimmer;
use gemline_config::{AppConfig, MessagesConfig};
use gemline_core::error::ProviderError;
use gemline_core::message::{ConversationKey, Part, Role, Turn};
use gemline_core::provider::InferenceBackend;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Tunables for a [`ConversationEngine`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Model identifier passed to the backend
    pub model: String,
    /// Default system prompt
    pub system_prompt: String,
    /// Maximum context size in backend tokens
    pub token_budget: u32,
    pub media: DownscaleOptions,
    pub texts: MessagesConfig,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.gemini.model.clone(),
            system_prompt: config.conversation.system_prompt.clone(),
            token_budget: config.conversation.history_token_budget,
            media: DownscaleOptions::from_config(&config.media),
            texts: config.messages.clone(),
        }
    }
}

/// Conversation state plus the reply pipelines that mutate it.
pub struct ConversationEngine {
    backend: Arc<dyn InferenceBackend>,
    model: String,
    prompts: SystemPromptStore,
    histories: HistoryStore,
    trimmer: Trimmer,
    media: DownscaleOptions,
    texts: MessagesConfig,
}

impl ConversationEngine {
    pub fn new(backend: Arc<dyn InferenceBackend>, settings: EngineSettings) -> Self {
        let trimmer = Trimmer::new(
            Arc::clone(&backend),
            settings.model.clone(),
            settings.token_budget,
        );
        Self {
            backend,
            model: settings.model,
            prompts: SystemPromptStore::new(settings.system_prompt),
            histories: HistoryStore::new(),
            trimmer,
            media: settings.media,
            texts: settings.texts,
        }
    }

    pub fn histories(&self) -> &HistoryStore {
        &self.histories
    }

    pub fn texts(&self) -> &MessagesConfig {
        &self.texts
    }

    /// What gets recorded as the model turn for `text`.
    fn recorded_reply(&self, text: &str) -> String {
        if text.is_empty() {
            self.texts.no_content.clone()
        } else {
            text.to_string()
        }
    }

    /// Run one text exchange for `key` and return the transport-ready reply.
    ///
    /// Inference failures are logged and yield an empty reply; the exchange
    /// is still recorded with the no-content placeholder as the model turn.
    pub async fn generate_text_reply(&self, user_text: &str, key: &ConversationKey) -> String {
        let mut history = self.histories.lock(key).await;
        let system_prompt = self.prompts.get(key);

        history.push(Turn::user_text(user_text));
        self.trimmer.trim(&mut history, &system_prompt).await;

        let contents = history.assemble(&system_prompt);
        let text = match self.backend.generate_content(&self.model, &contents).await {
            Ok(result) => result.reply_text(),
            Err(e) => {
                error!(key = %key, error = %e, "Text generation failed");
                String::new()
            }
        };

        history.push(Turn::model_text(self.recorded_reply(&text)));
        self.trimmer.trim(&mut history, &system_prompt).await;

        info!(key = %key, chars = text.chars().count(), turns = history.len(), "Text reply ready");
        truncate_for_transport(&text)
    }

    /// Guidance text sent ahead of an image.
    fn image_guidance(&self, system_prompt: &str, user_text: Option<&str>) -> String {
        match user_text.map(str::trim).filter(|t| !t.is_empty()) {
            Some(extra) => format!(
                "{system_prompt}\n\n{}{extra}",
                self.texts.user_supplement_prefix
            ),
            None => format!(
                "{system_prompt}\n\n{}",
                self.texts.image_default_instruction
            ),
        }
    }

    /// Downscale off the async executor.
    async fn prepare_image(&self, bytes: Vec<u8>, mime_type: &str) -> (Vec<u8>, String) {
        if media::is_passthrough(&bytes, mime_type, &self.media) {
            return (bytes, media::effective_mime(mime_type).to_string());
        }

        let opts = self.media;
        let mime = mime_type.to_string();
        let original = bytes.clone();
        match tokio::task::spawn_blocking(move || media::downscale(bytes, &mime, &opts)).await {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(error = %e, "Image downscale task failed, sending original");
                (original, media::effective_mime(mime_type).to_string())
            }
        }
    }

    async fn infer_image(
        &self,
        guidance: String,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<String, ProviderError> {
        let contents = vec![Turn::new(
            Role::User,
            vec![Part::text(guidance), Part::media(bytes, mime_type)],
        )];
        let result = self.backend.generate_content(&self.model, &contents).await?;
        Ok(result.reply_text())
    }

    /// Describe an image without touching the conversation history.
    ///
    /// The payload is the guidance text followed by the (downscaled) image.
    pub async fn generate_image_reply(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        key: &ConversationKey,
        user_text: Option<&str>,
    ) -> Result<String, ProviderError> {
        let guidance = self.image_guidance(&self.prompts.get(key), user_text);
        let (bytes, mime_type) = self.prepare_image(bytes, mime_type).await;
        let text = self.infer_image(guidance, bytes, &mime_type).await?;
        Ok(truncate_for_transport(&text))
    }

    /// Run one image exchange for `key`, recording both turns.
    ///
    /// The key's lock is taken before any preparation, so the exchange
    /// keeps its place relative to other messages for `key`. The image is
    /// downscaled once and the same bytes are both recorded and sent. On
    /// inference failure the placeholder model turn is still recorded and
    /// the error is returned so the caller can apologize.
    pub async fn image_reply(
        &self,
        key: &ConversationKey,
        bytes: Vec<u8>,
        mime_type: &str,
        user_text: Option<&str>,
    ) -> Result<String, ProviderError> {
        let mut history = self.histories.lock(key).await;
        let system_prompt = self.prompts.get(key);
        let (bytes, mime_type) = self.prepare_image(bytes, mime_type).await;

        history.push(Turn::new(
            Role::User,
            vec![
                Part::text(self.texts.image_marker.clone()),
                Part::media(bytes.clone(), mime_type.clone()),
            ],
        ));
        self.trimmer.trim(&mut history, &system_prompt).await;

        let guidance = self.image_guidance(&system_prompt, user_text);
        let outcome = self.infer_image(guidance, bytes, &mime_type).await;
        if let Err(e) = &outcome {
            error!(key = %key, error = %e, "Image generation failed");
        }

        let text = outcome.as_deref().unwrap_or_default();
        history.push(Turn::model_text(self.recorded_reply(text)));
        self.trimmer.trim(&mut history, &system_prompt).await;

        info!(key = %key, mime = %mime_type, turns = history.len(), "Image reply ready");
        outcome.map(|text| truncate_for_transport(&text))
    }

    /// Apply a control command for `key` and return the confirmation text.
    pub async fn run_command(&self, key: &ConversationKey, command: Command) -> String {
        debug!(key = %key, command = ?command, "Running command");
        match command {
            Command::SetPrompt(text) => {
                self.prompts.set(key, &text);
                let current = self.prompts.get(key);
                format!(
                    "{}\n{}",
                    self.texts.prompt_updated,
                    take_chars(&current, MAX_PROMPT_ECHO_CHARS)
                )
            }
            Command::ShowPrompt => {
                let current = self.prompts.get(key);
                format!(
                    "{}\n{}",
                    self.texts.prompt_current,
                    take_chars(&current, MAX_PROMPT_ECHO_CHARS)
                )
            }
            Command::ResetPrompt => {
                self.prompts.reset(key);
                self.texts.prompt_reset.clone()
            }
            Command::ClearHistory => {
                let removed = self.histories.clear(key).await;
                debug!(key = %key, removed, "History cleared");
                self.texts.history_cleared.clone()
            }
        }
    }
}
