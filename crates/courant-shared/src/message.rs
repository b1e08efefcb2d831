//! The message model shared by the hub, the wire protocol and the local
//! cache, together with its forward-only status lifecycle.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CallType, CorrelationId, MessageId, UserId};

/// Delivery status of a message, as seen by its sender.
///
/// Transitions only ever move forward:
/// `Sending -> {Sent, Failed}`, `Sent -> {Delivered, Failed}`,
/// `Delivered -> Read`. `Failed` and `Read` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageStatus {
    /// Optimistic local stub, not yet acknowledged by the store.
    Sending,
    /// Persisted by the store; the receiver has no live connection yet.
    Sent,
    /// Pushed to at least one of the receiver's live connections.
    Delivered,
    /// The receiver opened the conversation.
    Read,
    /// Submission failed; surfaced to the user with a manual retry.
    Failed,
}

impl MessageStatus {
    /// Position in the forward lattice. `Failed` sits outside it.
    fn rank(self) -> u8 {
        match self {
            MessageStatus::Sending => 0,
            MessageStatus::Sent => 1,
            MessageStatus::Delivered => 2,
            MessageStatus::Read => 3,
            MessageStatus::Failed => u8::MAX,
        }
    }

    /// Whether a transition from `self` to `next` is a legal forward step.
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        match (self, next) {
            // Failure is only reachable before the receiver saw anything.
            (MessageStatus::Sending, MessageStatus::Failed) => true,
            (MessageStatus::Sent, MessageStatus::Failed) => true,
            (MessageStatus::Failed, _) | (_, MessageStatus::Failed) => false,
            (a, b) => a.rank() < b.rank(),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Read | MessageStatus::Failed)
    }
}

/// Message payload variants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    /// Reference to an uploaded image blob (media pipeline is external).
    Image { blob: String },
    /// Reference to an uploaded voice note blob.
    Voice { blob: String, seconds: u32 },
    /// Record of a finished or missed call, rendered inline in the thread.
    CallLog { call_type: CallType, seconds: u32 },
}

/// A chat message between two users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Authoritative identifier, assigned once by the store.
    pub id: MessageId,
    /// The client-side key the sender used for its optimistic stub.
    pub correlation_id: CorrelationId,
    pub sender: UserId,
    pub receiver: UserId,
    pub content: MessageContent,
    /// Message this one replies to, if any.
    pub reply_to: Option<MessageId>,
    /// At most one emoji per reacting user; a new reaction replaces.
    pub reactions: BTreeMap<UserId, String>,
    /// Tombstone flag. Terminal: once set, content edits and reactions
    /// are rejected and only metadata survives.
    pub is_deleted: bool,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Advance the status monotonically. Returns `true` if the transition
    /// applied, `false` if it would have moved backwards (in which case the
    /// message is untouched -- a late `Delivered` never overwrites `Read`).
    pub fn advance_status(&mut self, next: MessageStatus, at: DateTime<Utc>) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        self.status = next;
        match next {
            MessageStatus::Delivered => self.delivered_at = Some(at),
            MessageStatus::Read => {
                // A push can jump Sent -> Read when the receiver already has
                // the thread open; keep delivered_at populated.
                if self.delivered_at.is_none() {
                    self.delivered_at = Some(at);
                }
                self.read_at = Some(at);
            }
            _ => {}
        }
        true
    }

    /// Replace the tombstoned message's content. Keeps who/when metadata.
    pub fn tombstone(&mut self) {
        self.is_deleted = true;
        self.content = MessageContent::Text(String::new());
        self.reactions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(status: MessageStatus) -> Message {
        Message {
            id: MessageId::new(),
            correlation_id: CorrelationId::new(),
            sender: UserId::new(),
            receiver: UserId::new(),
            content: MessageContent::Text("salut".into()),
            reply_to: None,
            reactions: BTreeMap::new(),
            is_deleted: false,
            status,
            created_at: Utc::now(),
            delivered_at: None,
            read_at: None,
        }
    }

    #[test]
    fn test_status_only_moves_forward() {
        let mut m = message(MessageStatus::Sent);
        assert!(m.advance_status(MessageStatus::Delivered, Utc::now()));
        assert!(m.advance_status(MessageStatus::Read, Utc::now()));

        // Late delivery receipt after read: ignored.
        assert!(!m.advance_status(MessageStatus::Delivered, Utc::now()));
        assert_eq!(m.status, MessageStatus::Read);
        assert!(m.read_at.is_some());
    }

    #[test]
    fn test_failed_only_from_sending_or_sent() {
        let mut m = message(MessageStatus::Sending);
        assert!(m.advance_status(MessageStatus::Failed, Utc::now()));

        let mut m = message(MessageStatus::Delivered);
        assert!(!m.advance_status(MessageStatus::Failed, Utc::now()));
        assert_eq!(m.status, MessageStatus::Delivered);
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut m = message(MessageStatus::Failed);
        assert!(!m.advance_status(MessageStatus::Sent, Utc::now()));
        assert!(!m.advance_status(MessageStatus::Read, Utc::now()));
    }

    #[test]
    fn test_read_jump_fills_delivered_at() {
        let mut m = message(MessageStatus::Sent);
        assert!(m.advance_status(MessageStatus::Read, Utc::now()));
        assert!(m.delivered_at.is_some());
    }

    #[test]
    fn test_tombstone_clears_content_and_reactions() {
        let mut m = message(MessageStatus::Delivered);
        m.reactions.insert(UserId::new(), "❤️".into());
        m.tombstone();
        assert!(m.is_deleted);
        assert!(m.reactions.is_empty());
        assert_eq!(m.content, MessageContent::Text(String::new()));
    }
}
