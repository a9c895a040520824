//! Messaging platform channel implementations for gemline.
//!
//! A channel verifies and decodes inbound webhook deliveries and provides
//! the outbound calls the engine needs (reply, content download).
//!
//! Available channels:
//! - **LINE**: LINE Messaging API (webhook + reply token)

pub mod line;

pub use line::{LineChannel, LineChannelConfig, SIGNATURE_HEADER, parse_webhook, sign_payload, verify_signature};
