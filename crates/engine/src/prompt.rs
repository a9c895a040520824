//! Per-conversation system prompt overrides.

use gemline_core::message::ConversationKey;
use std::collections::HashMap;
use std::sync::RwLock;

/// Maps conversation keys to system prompt overrides.
///
/// Reads share the lock; writes are exclusive. The lock is never held
/// across an await point.
pub struct SystemPromptStore {
    default_prompt: String,
    overrides: RwLock<HashMap<ConversationKey, String>>,
}

impl SystemPromptStore {
    pub fn new(default_prompt: impl Into<String>) -> Self {
        Self {
            default_prompt: default_prompt.into(),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// The effective prompt for `key`: its override, or the default.
    pub fn get(&self, key: &ConversationKey) -> String {
        let overrides = self.overrides.read().unwrap_or_else(|e| e.into_inner());
        overrides
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.default_prompt.clone())
    }

    /// Install `text` (trimmed) as the override for `key`.
    ///
    /// Blank text removes the override instead.
    pub fn set(&self, key: &ConversationKey, text: &str) {
        let trimmed = text.trim();
        let mut overrides = self.overrides.write().unwrap_or_else(|e| e.into_inner());
        if trimmed.is_empty() {
            overrides.remove(key);
        } else {
            overrides.insert(key.clone(), trimmed.to_string());
        }
    }

    /// Drop the override for `key`, restoring the default.
    pub fn reset(&self, key: &ConversationKey) {
        self.set(key, "");
    }
}
