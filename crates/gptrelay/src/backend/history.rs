//! Bounded message history for rebuilding conversation context
//!
//! The keyed backend is stateless upstream, so every turn replays the chain of
//! earlier messages reachable through `parent_message_id`. Messages are kept
//! in an LRU cache; a chain simply stops at the first evicted ancestor.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

/// Role of a conversation participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A message remembered for later context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub parent_message_id: Option<String>,
}

pub struct MessageHistory {
    messages: Mutex<LruCache<String, StoredMessage>>,
    max_context: usize,
}

impl MessageHistory {
    /// Create a history holding at most `capacity` messages and replaying at
    /// most `max_context` of them per turn
    pub fn new(capacity: usize, max_context: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            messages: Mutex::new(LruCache::new(capacity)),
            max_context,
        }
    }

    pub fn insert(&self, message: StoredMessage) {
        let mut messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        messages.put(message.id.clone(), message);
    }

    /// Walk the parent chain starting at `parent_message_id`, oldest first
    pub fn context(&self, parent_message_id: Option<&str>) -> Vec<StoredMessage> {
        let mut messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        let mut chain = Vec::new();
        let mut next = parent_message_id.map(str::to_string);

        while let Some(id) = next {
            if chain.len() >= self.max_context {
                break;
            }
            let Some(message) = messages.get(&id) else {
                break;
            };
            next = message.parent_message_id.clone();
            chain.push(message.clone());
        }

        chain.reverse();
        chain
    }

    pub fn len(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
