//! # gemline engine
//!
//! Per-conversation state and the reply pipelines built on it:
//!
//! - [`identity`]: event source → conversation key
//! - [`prompt`]: system prompt overrides
//! - [`history`]: conversation histories with per-key locking
//! - [`trim`]: token-budget trimming
//! - [`media`]: image downscaling before upload
//! - [`pipeline`]: text and image reply cycles
//! - [`command`]: in-chat control commands
//! - [`dispatch`]: event routing and the fail-soft reply policy

pub mod command;
pub mod dispatch;
pub mod history;
pub mod identity;
pub mod media;
pub mod pipeline;
pub mod prompt;
pub mod reply;
pub mod trim;

#[cfg(test)]
mod test_helpers;

pub use command::Command;
pub use dispatch::{DispatchError, Dispatcher, MessageKind, fallback_reply};
pub use history::{ConversationHistory, HistoryStore};
pub use identity::resolve_key;
pub use media::{DownscaleOptions, downscale};
pub use pipeline::{ConversationEngine, EngineSettings};
pub use prompt::SystemPromptStore;
pub use reply::truncate_for_transport;
pub use trim::{TrimReport, Trimmer};
