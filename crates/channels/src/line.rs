//! LINE Messaging API channel adapter.
//!
//! Implements the Channel trait for a LINE Official Account:
//! - validates the `X-Line-Signature` header (base64 HMAC-SHA256 of the raw body)
//! - decodes webhook deliveries into [`InboundEvent`]s
//! - replies through the one-shot reply token
//! - downloads image content from the data API host

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use gemline_core::channel::{Channel, EventSource, InboundEvent, InboundMessage, MediaContent};
use gemline_core::error::ChannelError;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "X-Line-Signature";

/// Default MIME type when the content API omits `Content-Type`.
const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

/// LINE channel configuration.
#[derive(Clone)]
pub struct LineChannelConfig {
    /// Long-lived channel access token.
    pub access_token: String,
    /// Channel secret used for webhook signatures.
    pub channel_secret: String,
    pub api_base_url: String,
    pub data_base_url: String,
    pub timeout: std::time::Duration,
}

impl std::fmt::Debug for LineChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineChannelConfig")
            .field("access_token", &"[REDACTED]")
            .field("channel_secret", &"[REDACTED]")
            .field("api_base_url", &self.api_base_url)
            .field("data_base_url", &self.data_base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LineChannelConfig {
    /// Build from the `[line]` config section. Both secrets must be present.
    pub fn from_app_config(config: &gemline_config::LineConfig) -> Result<Self, ChannelError> {
        let access_token = config.channel_access_token.clone().ok_or_else(|| {
            ChannelError::NotConfigured("LINE_CHANNEL_ACCESS_TOKEN is not set".into())
        })?;
        let channel_secret = config
            .channel_secret
            .clone()
            .ok_or_else(|| ChannelError::NotConfigured("LINE_CHANNEL_SECRET is not set".into()))?;

        Ok(Self {
            access_token,
            channel_secret,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            data_base_url: config.data_base_url.trim_end_matches('/').to_string(),
            timeout: std::time::Duration::from_secs(config.timeout_secs),
        })
    }
}

/// LINE channel adapter.
pub struct LineChannel {
    config: LineChannelConfig,
    client: reqwest::Client,
}

impl LineChannel {
    pub fn new(config: LineChannelConfig) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChannelError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn map_transport_error(e: reqwest::Error, on: impl FnOnce(String) -> ChannelError) -> ChannelError {
        if e.is_timeout() {
            ChannelError::Timeout(e.to_string())
        } else {
            on(e.to_string())
        }
    }
}

/// Compute the base64 HMAC-SHA256 signature LINE sends for `payload`.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(payload);
    BASE64.encode(mac.finalize().into_bytes())
}

/// Check `signature` (base64) against the HMAC-SHA256 of `payload`.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let provided = match BASE64.decode(signature.trim()) {
        Ok(b) => b,
        Err(_) => return false,
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&provided).is_ok()
}

/// Decode a webhook body into typed events.
///
/// Only `message` events are kept. Text and image messages are mapped to
/// their variants; every other message type becomes `Unsupported`. A source
/// that does not decode is kept as an empty [`EventSource`].
pub fn parse_webhook(payload: &[u8]) -> Result<Vec<InboundEvent>, ChannelError> {
    let body: WebhookBody = serde_json::from_slice(payload)
        .map_err(|e| ChannelError::InvalidPayload(e.to_string()))?;

    let events = body
        .events
        .into_iter()
        .filter_map(|event| {
            if event.kind != "message" {
                debug!(event_type = %event.kind, "Skipping non-message event");
                return None;
            }
            let message = match event.message {
                Some(m) => m,
                None => {
                    warn!("Message event without message body");
                    return None;
                }
            };
            let source = event
                .source
                .and_then(|v| serde_json::from_value::<EventSource>(v).ok())
                .unwrap_or_default();
            let message = match message.kind.as_str() {
                "text" => InboundMessage::Text {
                    text: message.text.unwrap_or_default(),
                },
                "image" => InboundMessage::Image {
                    id: message.id.filter(|id| !id.is_empty()),
                },
                other => InboundMessage::Unsupported {
                    kind: other.to_string(),
                },
            };
            Some(InboundEvent {
                source,
                reply_token: event.reply_token,
                message,
            })
        })
        .collect();

    Ok(events)
}

#[async_trait]
impl Channel for LineChannel {
    fn name(&self) -> &str {
        "line"
    }

    async fn reply(&self, reply_token: &str, text: &str) -> Result<(), ChannelError> {
        let url = format!("{}/v2/bot/message/reply", self.config.api_base_url);
        let body = ReplyRequest {
            reply_token,
            messages: vec![TextMessage { kind: "text", text }],
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                Self::map_transport_error(e, |reason| ChannelError::DeliveryFailed {
                    channel: "line".into(),
                    reason,
                })
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %error_body, "LINE reply failed");
            return Err(ChannelError::DeliveryFailed {
                channel: "line".into(),
                reason: format!("status {}: {error_body}", status.as_u16()),
            });
        }

        info!(content_len = text.chars().count(), "LINE reply sent");
        Ok(())
    }

    async fn fetch_content(&self, message_id: &str) -> Result<MediaContent, ChannelError> {
        let url = format!(
            "{}/v2/bot/message/{message_id}/content",
            self.config.data_base_url
        );
        let unavailable = |reason: String| ChannelError::ContentUnavailable {
            message_id: message_id.to_string(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| Self::map_transport_error(e, unavailable))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(format!("status {}", status.as_u16())));
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::map_transport_error(e, unavailable))?;
        if bytes.is_empty() {
            return Err(unavailable("empty body".into()));
        }

        debug!(message_id, size = bytes.len(), mime = %mime_type, "Downloaded message content");
        Ok(MediaContent {
            bytes: bytes.to_vec(),
            mime_type,
        })
    }

    async fn health_check(&self) -> Result<bool, ChannelError> {
        let url = format!("{}/v2/bot/info", self.config.api_base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| Self::map_transport_error(e, ChannelError::NotConfigured))?;
        Ok(response.status().is_success())
    }
}

// --- LINE wire types ---

#[derive(Debug, Deserialize)]
struct WebhookBody {
    #[serde(default)]
    #[allow(dead_code)]
    destination: Option<String>,
    #[serde(default)]
    events: Vec<WireEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    reply_token: Option<String>,
    #[serde(default)]
    source: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRequest<'a> {
    reply_token: &'a str,
    messages: Vec<TextMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct TextMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}
