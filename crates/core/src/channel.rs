//! Channel trait: the abstraction over the messaging platform.
//!
//! A Channel turns raw webhook deliveries into [`InboundEvent`]s upstream of
//! the engine, and gives the engine two outbound capabilities: fetching an
//! attached media blob and sending a one-shot reply.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Where an inbound event came from, as reported by the platform.
///
/// Deliberately loose: every field is optional so that a malformed source
/// still decodes and can be classified as the `global` conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    /// `user`, `group` or `room`
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
}

impl EventSource {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: "user".into(),
            user_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self {
            kind: "group".into(),
            group_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn room(id: impl Into<String>) -> Self {
        Self {
            kind: "room".into(),
            room_id: Some(id.into()),
            ..Self::default()
        }
    }
}

/// The payload of an inbound message event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Text {
        text: String,
    },
    Image {
        /// Platform message id used to download the content.
        #[serde(default)]
        id: Option<String>,
    },
    /// Stickers, audio, follow events and the like; acknowledged and ignored.
    Unsupported {
        kind: String,
    },
}

/// One typed event from a webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub source: EventSource,

    /// One-shot handle for replying; absent for events that cannot be answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_token: Option<String>,

    pub message: InboundMessage,
}

impl InboundEvent {
    pub fn text(source: EventSource, reply_token: &str, text: &str) -> Self {
        Self {
            source,
            reply_token: Some(reply_token.to_string()),
            message: InboundMessage::Text {
                text: text.to_string(),
            },
        }
    }

    pub fn image(source: EventSource, reply_token: &str, message_id: &str) -> Self {
        Self {
            source,
            reply_token: Some(reply_token.to_string()),
            message: InboundMessage::Image {
                id: Some(message_id.to_string()),
            },
        }
    }
}

/// Downloaded message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaContent {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// The core Channel trait.
///
/// Implementations handle platform-specific authentication, endpoints and
/// message formatting.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name (e.g., "line").
    fn name(&self) -> &str;

    /// Send a single text message through a one-shot reply handle.
    async fn reply(&self, reply_token: &str, text: &str) -> std::result::Result<(), ChannelError>;

    /// Download the binary content attached to a message.
    async fn fetch_content(
        &self,
        message_id: &str,
    ) -> std::result::Result<MediaContent, ChannelError>;

    /// Health check: is the channel configured and operational?
    async fn health_check(&self) -> std::result::Result<bool, ChannelError> {
        Ok(true)
    }
}
