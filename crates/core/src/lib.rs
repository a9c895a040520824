//! # gemline core
//!
//! Domain types, traits, and error definitions for the gemline relay.
//! This crate has no framework dependencies: it defines the model that the
//! provider, channel, engine and gateway crates implement against.
//!
//! - [`message`]: conversation keys, turns and parts
//! - [`provider`]: the inference backend seam (token counting, generation)
//! - [`channel`]: the messaging platform seam (inbound events, replies, media)

pub mod channel;
pub mod error;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use channel::{Channel, EventSource, InboundEvent, InboundMessage, MediaContent};
pub use error::{ChannelError, ProviderError};
pub use message::{ConversationKey, Part, Role, Turn};
pub use provider::{Candidate, GenerateResult, InferenceBackend};
