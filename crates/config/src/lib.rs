//! Configuration loading, validation, and management for gemline.
//!
//! Loads configuration from `~/.gemline/config.toml` (or an explicit path)
//! with environment variable overrides. The environment variable names are
//! the ones a LINE bot deployment usually already has set
//! (`LINE_CHANNEL_ACCESS_TOKEN`, `GEMINI_API_KEY`, `PORT`, ...).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.gemline/config.toml`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LINE Messaging API credentials and endpoints
    #[serde(default)]
    pub line: LineConfig,

    /// Gemini API credentials, model and endpoint
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Conversation defaults (system prompt, token budget)
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Image preprocessing limits
    #[serde(default)]
    pub media: MediaConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// User-visible reply texts
    #[serde(default)]
    pub messages: MessagesConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("line", &self.line)
            .field("gemini", &self.gemini)
            .field("conversation", &self.conversation)
            .field("media", &self.media)
            .field("gateway", &self.gateway)
            .field("messages", &self.messages)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LineConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_access_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_secret: Option<String>,

    #[serde(default = "default_line_api_base")]
    pub api_base_url: String,

    /// Content downloads are served from a separate host.
    #[serde(default = "default_line_data_base")]
    pub data_base_url: String,

    #[serde(default = "default_line_timeout")]
    pub timeout_secs: u64,
}

fn default_line_api_base() -> String {
    "https://api.line.me".into()
}
fn default_line_data_base() -> String {
    "https://api-data.line.me".into()
}
fn default_line_timeout() -> u64 {
    30
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            channel_access_token: None,
            channel_secret: None,
            api_base_url: default_line_api_base(),
            data_base_url: default_line_data_base(),
            timeout_secs: default_line_timeout(),
        }
    }
}

impl std::fmt::Debug for LineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineConfig")
            .field("channel_access_token", &redact(&self.channel_access_token))
            .field("channel_secret", &redact(&self.channel_secret))
            .field("api_base_url", &self.api_base_url)
            .field("data_base_url", &self.data_base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model id, with or without the `models/` prefix
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_gemini_base")]
    pub base_url: String,

    #[serde(default = "default_gemini_timeout")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "gemini-1.5-flash".into()
}
fn default_gemini_base() -> String {
    "https://generativelanguage.googleapis.com".into()
}
fn default_gemini_timeout() -> u64 {
    60
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: default_gemini_base(),
            timeout_secs: default_gemini_timeout(),
        }
    }
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Default system prompt for conversations without an override
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Token ceiling for system prompt + history
    #[serde(default = "default_history_token_budget")]
    pub history_token_budget: u32,
}

fn default_system_prompt() -> String {
    "你是一個樂於助人的 LINE 助理，回答要簡潔、有禮貌，以繁體中文回覆。".into()
}
fn default_history_token_budget() -> u32 {
    2000
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            history_token_budget: default_history_token_budget(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Images above this size (or of another type) are re-encoded.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Longer side cap in pixels when re-encoding.
    #[serde(default = "default_max_side")]
    pub max_side: u32,
}

fn default_max_upload_bytes() -> usize {
    4 * 1024 * 1024
}
fn default_max_side() -> u32 {
    1600
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            max_side: default_max_side(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_port() -> u16 {
    3000
}
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

/// Every text the bot sends or stores on its own behalf.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagesConfig {
    /// Stored (and sent) when the model produced no text
    pub no_content: String,
    /// Text part of the user turn recorded for an image
    pub image_marker: String,
    /// Appended to the system prompt when an image arrives without text
    pub image_default_instruction: String,
    /// Prefix for user-supplied text accompanying an image
    pub user_supplement_prefix: String,
    pub prompt_updated: String,
    pub prompt_current: String,
    pub prompt_reset: String,
    pub history_cleared: String,
    pub error_apology: String,
    pub image_error_apology: String,
    pub image_missing: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            no_content: "（無內容）".into(),
            image_marker: "(使用者傳送了一張圖片)".into(),
            image_default_instruction: "請根據圖片內容給出有幫助且精簡的描述。".into(),
            user_supplement_prefix: "使用者補充：".into(),
            prompt_updated: "已更新本對話的系統提示詞為：".into(),
            prompt_current: "目前系統提示詞：".into(),
            prompt_reset: "已重置本對話的系統提示詞，改用預設設定。".into(),
            history_cleared: "已清除本對話的記憶（歷史）。".into(),
            error_apology: "抱歉，系統暫時發生錯誤，請稍後再試 🙏".into(),
            image_error_apology: "抱歉，圖片解析時發生錯誤，請稍後再試 🙏".into(),
            image_missing: "抱歉，沒有取得圖片內容。".into(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path`, or the default location when `None`,
    /// then apply environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_dir().join("config.toml"),
        };
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path (no env overrides).
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (highest priority).
    ///
    /// Blank values are ignored so an exported-but-empty variable does not
    /// wipe a value from the file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("LINE_CHANNEL_ACCESS_TOKEN") {
            self.line.channel_access_token = Some(v);
        }
        if let Some(v) = get("LINE_CHANNEL_SECRET") {
            self.line.channel_secret = Some(v);
        }
        if let Some(v) = get("GEMINI_API_KEY") {
            self.gemini.api_key = Some(v);
        }
        if let Some(v) = get("GEMINI_MODEL") {
            self.gemini.model = v;
        }
        if let Some(v) = get("SYSTEM_PROMPT") {
            self.conversation.system_prompt = v;
        }
        if let Some(v) = get("HISTORY_TOKEN_BUDGET") {
            self.conversation.history_token_budget =
                v.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    var: "HISTORY_TOKEN_BUDGET".into(),
                    value: v.clone(),
                })?;
        }
        if let Some(v) = get("PORT") {
            self.gateway.port = v.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "PORT".into(),
                value: v.clone(),
            })?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".gemline")
    }

    /// Validate value ranges. Secrets are checked separately by
    /// [`AppConfig::require_secrets`] so `config`/`doctor` work without them.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.conversation.history_token_budget == 0 {
            return Err(ConfigError::ValidationError(
                "conversation.history_token_budget must be > 0".into(),
            ));
        }
        if self.media.max_side == 0 {
            return Err(ConfigError::ValidationError(
                "media.max_side must be > 0".into(),
            ));
        }
        if self.media.max_upload_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "media.max_upload_bytes must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Ensure every credential needed to serve traffic is present.
    pub fn require_secrets(&self) -> Result<(), ConfigError> {
        let missing: Vec<&str> = [
            ("LINE_CHANNEL_ACCESS_TOKEN", &self.line.channel_access_token),
            ("LINE_CHANNEL_SECRET", &self.line.channel_secret),
            ("GEMINI_API_KEY", &self.gemini.api_key),
        ]
        .into_iter()
        .filter(|(_, v)| v.as_deref().is_none_or(|s| s.trim().is_empty()))
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingSecret(missing.join(", ")))
        }
    }

    /// Copy with every credential replaced by a placeholder, for display.
    pub fn redacted(&self) -> Self {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]".to_string());
        let mut copy = self.clone();
        copy.line.channel_access_token = mask(&self.line.channel_access_token);
        copy.line.channel_secret = mask(&self.line.channel_secret);
        copy.gemini.api_key = mask(&self.gemini.api_key);
        copy
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv { var: String, value: String },

    #[error("Missing required settings: {0}")]
    MissingSecret(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
