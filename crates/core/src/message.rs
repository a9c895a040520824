//! Conversation keys, turns and content parts.
//!
//! These are the value objects that flow through the relay:
//! LINE delivers an event → the engine derives a [`ConversationKey`] → the
//! history for that key grows by [`Turn`]s → the turns are sent to Gemini.

use serde::{Deserialize, Serialize};

/// Stable identifier for a conversational context.
///
/// One of `user:<id>`, `group:<id>`, `room:<id>` or the `global` fallback.
/// It is the sole join key across prompt overrides and histories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub const GLOBAL: &'static str = "global";

    pub fn user(id: &str) -> Self {
        Self(format!("user:{id}"))
    }

    pub fn group(id: &str) -> Self {
        Self(format!("group:{id}"))
    }

    pub fn room(id: &str) -> Self {
        Self(format!("room:{id}"))
    }

    /// Fallback key for sources that cannot be classified.
    pub fn global() -> Self {
        Self(Self::GLOBAL.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_global(&self) -> bool {
        self.0 == Self::GLOBAL
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The author of a turn, in the model's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The LINE user (or group/room member)
    User,
    /// The language model
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// Atomic content unit within a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    Text { content: String },
    InlineMedia { bytes: Vec<u8>, mime_type: String },
}

impl Part {
    pub fn text(content: impl Into<String>) -> Self {
        Part::Text {
            content: content.into(),
        }
    }

    pub fn media(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Part::InlineMedia {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// The text of a `Text` part, `None` for media.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { content } => Some(content),
            Part::InlineMedia { .. } => None,
        }
    }
}

/// One role-tagged message unit. Part order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    /// A user turn with a single text part.
    pub fn user_text(content: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(content)])
    }

    /// A model turn with a single text part.
    pub fn model_text(content: impl Into<String>) -> Self {
        Self::new(Role::Model, vec![Part::text(content)])
    }

    /// Concatenated text of all text parts (media parts are skipped).
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }
}
