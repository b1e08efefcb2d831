//! Authoritative message store collaborator.
//!
//! Persistence is an external concern; the hub only depends on the
//! [`MessageStore`] trait. [`MemoryStore`] is the in-process implementation
//! used by the binary and by tests. The store assigns each message its
//! authoritative id exactly once and owns the persisted status lifecycle.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use courant_shared::message::{Message, MessageContent, MessageStatus};
use courant_shared::types::{CorrelationId, MessageId, UserId};

use crate::error::{Result, ServerError};

pub trait MessageStore: Send + Sync {
    /// Persist a new message. The store assigns the authoritative id and
    /// the `Sent` status; the client-side `Sending` stub never reaches it.
    fn create(
        &self,
        sender: UserId,
        receiver: UserId,
        correlation_id: CorrelationId,
        content: MessageContent,
        reply_to: Option<MessageId>,
    ) -> Result<Message>;

    fn get(&self, id: MessageId) -> Result<Message>;

    /// Every message between the two users, in creation order
    /// (created_at, then id as the tiebreak).
    fn conversation(&self, a: UserId, b: UserId) -> Result<Vec<Message>>;

    /// Monotonic status advance. Returns `false` (without touching the
    /// record) when the transition would move backwards.
    fn advance_status(&self, id: MessageId, next: MessageStatus, at: DateTime<Utc>)
        -> Result<bool>;

    /// Flip every message from `sender` to `receiver` that is below `Read`.
    /// Returns the ids that changed.
    fn mark_read(
        &self,
        sender: UserId,
        receiver: UserId,
        at: DateTime<Utc>,
    ) -> Result<Vec<MessageId>>;

    /// Set (`Some`) or clear (`None`) one user's reaction. Last writer
    /// wins: a user's new emoji replaces their previous one. Returns the
    /// full reaction snapshot. Rejected on deleted messages.
    fn set_reaction(
        &self,
        id: MessageId,
        user: UserId,
        emoji: Option<&str>,
    ) -> Result<BTreeMap<UserId, String>>;

    /// Tombstone a message. Terminal; repeated deletion is idempotent.
    fn delete(&self, id: MessageId, at: DateTime<Utc>) -> Result<DateTime<Utc>>;
}

/// In-memory store, mutex over the message map.
pub struct MemoryStore {
    messages: Mutex<BTreeMap<MessageId, StoredMessage>>,
}

struct StoredMessage {
    message: Message,
    deleted_at: Option<DateTime<Utc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<MessageId, StoredMessage>> {
        // A poisoned mutex means a panic mid-mutation; propagating the
        // inner state is still sound for this map.
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore for MemoryStore {
    fn create(
        &self,
        sender: UserId,
        receiver: UserId,
        correlation_id: CorrelationId,
        content: MessageContent,
        reply_to: Option<MessageId>,
    ) -> Result<Message> {
        let message = Message {
            id: MessageId::new(),
            correlation_id,
            sender,
            receiver,
            content,
            reply_to,
            reactions: BTreeMap::new(),
            is_deleted: false,
            status: MessageStatus::Sent,
            created_at: Utc::now(),
            delivered_at: None,
            read_at: None,
        };

        self.lock().insert(
            message.id,
            StoredMessage {
                message: message.clone(),
                deleted_at: None,
            },
        );
        Ok(message)
    }

    fn get(&self, id: MessageId) -> Result<Message> {
        self.lock()
            .get(&id)
            .map(|s| s.message.clone())
            .ok_or(ServerError::MessageNotFound(id))
    }

    fn conversation(&self, a: UserId, b: UserId) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .lock()
            .values()
            .filter(|s| {
                (s.message.sender == a && s.message.receiver == b)
                    || (s.message.sender == b && s.message.receiver == a)
            })
            .map(|s| s.message.clone())
            .collect();
        messages.sort_by(|x, y| x.created_at.cmp(&y.created_at).then(x.id.cmp(&y.id)));
        Ok(messages)
    }

    fn advance_status(
        &self,
        id: MessageId,
        next: MessageStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut messages = self.lock();
        let stored = messages.get_mut(&id).ok_or(ServerError::MessageNotFound(id))?;
        Ok(stored.message.advance_status(next, at))
    }

    fn mark_read(
        &self,
        sender: UserId,
        receiver: UserId,
        at: DateTime<Utc>,
    ) -> Result<Vec<MessageId>> {
        let mut affected = Vec::new();
        for stored in self.lock().values_mut() {
            let m = &mut stored.message;
            if m.sender == sender
                && m.receiver == receiver
                && m.advance_status(MessageStatus::Read, at)
            {
                affected.push(m.id);
            }
        }
        Ok(affected)
    }

    fn set_reaction(
        &self,
        id: MessageId,
        user: UserId,
        emoji: Option<&str>,
    ) -> Result<BTreeMap<UserId, String>> {
        let mut messages = self.lock();
        let stored = messages.get_mut(&id).ok_or(ServerError::MessageNotFound(id))?;
        if stored.message.is_deleted {
            return Err(ServerError::MessageDeleted(id));
        }

        match emoji {
            Some(emoji) => {
                stored.message.reactions.insert(user, emoji.to_string());
            }
            None => {
                stored.message.reactions.remove(&user);
            }
        }
        Ok(stored.message.reactions.clone())
    }

    fn delete(&self, id: MessageId, at: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let mut messages = self.lock();
        let stored = messages.get_mut(&id).ok_or(ServerError::MessageNotFound(id))?;

        if let Some(existing) = stored.deleted_at {
            return Ok(existing);
        }
        stored.message.tombstone();
        stored.deleted_at = Some(at);
        Ok(at)
    }
}
