//! Conversation history and the per-key session map.
//!
//! A [`ConversationHistory`] is an ordered queue of turns, oldest first.
//! Turns are appended at the tail and evicted at the head; nothing edits a
//! turn in place. The [`HistoryStore`] maps each [`ConversationKey`] to its
//! own async mutex so that one sender's pipelines run one at a time while
//! different senders proceed in parallel.

use gemline_core::message::{ConversationKey, Part, Role, Turn};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Ordered turns for one conversation.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: VecDeque<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn at the tail.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
    }

    /// Evict the oldest turn.
    pub fn evict_oldest(&mut self) -> Option<Turn> {
        self.turns.pop_front()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Build the request context: the system prompt as a leading user turn,
    /// followed by the history in order.
    pub fn assemble(&self, system_prompt: &str) -> Vec<Turn> {
        let mut contents = Vec::with_capacity(self.turns.len() + 1);
        contents.push(Turn::user_text(system_prompt));
        contents.extend(self.turns.iter().cloned());
        contents
    }
}

type Session = Arc<Mutex<ConversationHistory>>;

/// All live conversations, keyed by sender.
///
/// The map lock is synchronous and only held to look up or insert a session;
/// it is never held while waiting on a session lock.
#[derive(Default)]
pub struct HistoryStore {
    sessions: RwLock<HashMap<ConversationKey, Session>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn session(&self, key: &ConversationKey) -> Session {
        {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            if let Some(session) = sessions.get(key) {
                return Arc::clone(session);
            }
        }
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(sessions.entry(key.clone()).or_default())
    }

    /// Enter the critical section for `key`, creating its history lazily.
    ///
    /// Waiters are served in arrival order.
    pub async fn lock(&self, key: &ConversationKey) -> OwnedMutexGuard<ConversationHistory> {
        self.session(key).lock_owned().await
    }

    /// Append one turn to the history for `key`.
    pub async fn append(&self, key: &ConversationKey, role: Role, parts: Vec<Part>) {
        self.lock(key).await.push(Turn::new(role, parts));
    }

    /// Drop the history for `key`. Returns whether any turns were removed.
    ///
    /// Waits for an in-flight pipeline on the same key to finish first. The
    /// map entry itself is only removed when nobody else is queued on it, so
    /// a waiting pipeline never ends up writing into an orphaned session.
    pub async fn clear(&self, key: &ConversationKey) -> bool {
        let session = {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            match sessions.get(key) {
                Some(session) => Arc::clone(session),
                None => return false,
            }
        };

        let mut history = session.lock().await;
        let removed = !history.is_empty();
        history.clear();

        {
            let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            // One reference here, one in the map.
            let idle = Arc::strong_count(&session) == 2;
            let same = sessions
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current, &session));
            if idle && same {
                sessions.remove(key);
            }
        }

        drop(history);
        removed
    }

    /// Copy of the turns currently recorded for `key`.
    pub async fn snapshot(&self, key: &ConversationKey) -> Vec<Turn> {
        let session = {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            sessions.get(key).map(Arc::clone)
        };
        match session {
            Some(session) => session.lock().await.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Whether a session exists for `key`.
    pub fn contains(&self, key: &ConversationKey) -> bool {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.contains_key(key)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
