//! Optimistic per-conversation message state.
//!
//! The list renders instantly: a submitted message appears as a `Sending`
//! stub before any network round trip, keyed by its correlation id until
//! the store acknowledgment replaces it with the authoritative record.
//! Everything that arrives afterwards (pushes, receipts, reaction and
//! deletion snapshots) is applied idempotently and monotonically, so
//! duplicate or out-of-order events can never corrupt the view.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::debug;

use courant_shared::message::{Message, MessageContent, MessageStatus};
use courant_shared::types::{CorrelationId, MessageId, UserId};

pub struct ConversationState {
    me: UserId,
    counterpart: UserId,
    messages: Vec<Message>,
    /// Correlation key -> provisional id of the local stub. Entries live
    /// until the store acknowledges or the user abandons a failed send.
    pending: HashMap<CorrelationId, MessageId>,
}

impl ConversationState {
    pub fn new(me: UserId, counterpart: UserId) -> Self {
        Self {
            me,
            counterpart,
            messages: Vec::new(),
            pending: HashMap::new(),
        }
    }

    pub fn counterpart(&self) -> UserId {
        self.counterpart
    }

    /// Rendered list, in authoritative order with unacknowledged stubs
    /// in their optimistic position.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    fn position_of(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    fn resort(&mut self) {
        self.messages
            .sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    }

    /// Create the locally-visible `Sending` stub. Synchronous; runs before
    /// any network I/O so perceived latency is zero.
    pub fn push_local(
        &mut self,
        correlation_id: CorrelationId,
        content: MessageContent,
        reply_to: Option<MessageId>,
    ) -> &Message {
        let stub = Message {
            // Provisional id, replaced wholesale on acknowledgment. Never
            // leaves this process.
            id: MessageId::new(),
            correlation_id,
            sender: self.me,
            receiver: self.counterpart,
            content,
            reply_to,
            reactions: BTreeMap::new(),
            is_deleted: false,
            status: MessageStatus::Sending,
            created_at: Utc::now(),
            delivered_at: None,
            read_at: None,
        };
        self.pending.insert(correlation_id, stub.id);
        let idx = self.messages.len();
        self.messages.push(stub);
        &self.messages[idx]
    }

    /// Store acknowledgment: swap the stub for the authoritative record,
    /// keyed by correlation id -- never by content equality, so two sends
    /// with identical text cannot collide. Without a matching stub (another
    /// device submitted it) the record is inserted like a push.
    pub fn resolve_submission(&mut self, correlation_id: CorrelationId, message: Message) -> bool {
        match self.pending.remove(&correlation_id) {
            Some(stub_id) => {
                let Some(pos) = self.position_of(stub_id) else {
                    // Stub cleared by a full refresh in between; fall back
                    // to an idempotent insert.
                    return self.apply_push(message);
                };
                self.messages[pos] = message;
                self.resort();
                true
            }
            None => self.apply_push(message),
        }
    }

    /// Submission failure: the stub goes to `Failed`, terminal with a
    /// manual retry affordance. Unknown correlations are ignored.
    pub fn submission_failed(&mut self, correlation_id: CorrelationId) -> bool {
        let Some(&stub_id) = self.pending.get(&correlation_id) else {
            return false;
        };
        let Some(pos) = self.position_of(stub_id) else {
            return false;
        };
        self.messages[pos].advance_status(MessageStatus::Failed, Utc::now())
    }

    /// Manual retry of a failed send: the old stub is replaced by a fresh
    /// `Sending` one under a new correlation id. Returns what the caller
    /// needs to build the new submission.
    pub fn retry_failed(
        &mut self,
        correlation_id: CorrelationId,
    ) -> Option<(CorrelationId, MessageContent, Option<MessageId>)> {
        let stub_id = self.pending.remove(&correlation_id)?;
        let pos = self.position_of(stub_id)?;
        if self.messages[pos].status != MessageStatus::Failed {
            // Not actually failed; put the entry back untouched.
            self.pending.insert(correlation_id, stub_id);
            return None;
        }

        let old = self.messages.remove(pos);
        let fresh = CorrelationId::new();
        self.push_local(fresh, old.content.clone(), old.reply_to);
        Some((fresh, old.content, old.reply_to))
    }

    /// Apply a pushed message. Idempotent by authoritative id: a duplicate
    /// push (reconnect replay) is a stale duplicate and changes nothing.
    pub fn apply_push(&mut self, message: Message) -> bool {
        if self.position_of(message.id).is_some() {
            debug!(id = %message.id, "stale duplicate push discarded");
            return false;
        }
        self.messages.push(message);
        self.resort();
        true
    }

    /// Delivery receipt for one of my messages. Unknown ids (not yet
    /// synced here) are ignored; a receipt behind `Read` is refused by the
    /// monotonic merge.
    pub fn apply_delivered(&mut self, id: MessageId, at: DateTime<Utc>) -> bool {
        match self.position_of(id) {
            Some(pos) => self.messages[pos].advance_status(MessageStatus::Delivered, at),
            None => false,
        }
    }

    /// The counterpart opened the thread: everything I sent them below
    /// `Read` advances. Returns how many messages moved.
    pub fn apply_read_receipt(&mut self, at: DateTime<Utc>) -> usize {
        let me = self.me;
        self.messages
            .iter_mut()
            .filter(|m| m.sender == me)
            .map(|m| m.advance_status(MessageStatus::Read, at))
            .filter(|applied| *applied)
            .count()
    }

    /// I opened the thread: the counterpart's messages flip locally.
    pub fn mark_read_local(&mut self, at: DateTime<Utc>) -> usize {
        let counterpart = self.counterpart;
        self.messages
            .iter_mut()
            .filter(|m| m.sender == counterpart)
            .map(|m| m.advance_status(MessageStatus::Read, at))
            .filter(|applied| *applied)
            .count()
    }

    /// Full reaction snapshot for one message (never a diff). Rejected on
    /// tombstoned or unknown messages.
    pub fn apply_reaction_snapshot(
        &mut self,
        id: MessageId,
        reactions: BTreeMap<UserId, String>,
    ) -> bool {
        let Some(pos) = self.position_of(id) else {
            return false;
        };
        if self.messages[pos].is_deleted {
            return false;
        }
        self.messages[pos].reactions = reactions;
        true
    }

    pub fn apply_deleted(&mut self, id: MessageId) -> bool {
        let Some(pos) = self.position_of(id) else {
            return false;
        };
        if self.messages[pos].is_deleted {
            return false;
        }
        self.messages[pos].tombstone();
        true
    }

    /// Replace the rendered list with an authoritative one (cache render or
    /// fetch completion). The fetched list always wins; the only survivors
    /// are local stubs the store has not acknowledged yet, which exist
    /// nowhere else.
    pub fn replace_all(&mut self, fetched: Vec<Message>) {
        let mut pending_stubs: Vec<Message> = Vec::new();
        for stub_id in self.pending.values() {
            if let Some(pos) = self.position_of(*stub_id) {
                pending_stubs.push(self.messages[pos].clone());
            }
        }

        self.messages = fetched;
        // A stub whose authoritative twin made it into the fetch is
        // reconciled on the spot.
        for stub in pending_stubs {
            if let Some(authoritative) = self
                .messages
                .iter()
                .find(|m| m.correlation_id == stub.correlation_id)
            {
                let correlation = authoritative.correlation_id;
                self.pending.remove(&correlation);
            } else {
                self.messages.push(stub);
            }
        }
        self.resort();
    }
}
