use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::message::{Message, MessageContent};
use crate::types::{CallType, ConnectionId, CorrelationId, MessageId, UserId};

/// Why a call offer was turned down.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CallRejectReason {
    /// The target already has a non-idle call session.
    Busy,
    /// The target explicitly declined.
    Declined,
    /// The target has no live connection.
    Unreachable,
}

/// Frames sent by a client to the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientFrame {
    /// Must be the first frame on a fresh connection. Authentication is an
    /// external concern; the hub trusts the session layer in front of it.
    Register { user: UserId },

    /// Submit a new message for persistence and push delivery.
    SendMessage {
        correlation_id: CorrelationId,
        receiver: UserId,
        content: MessageContent,
        reply_to: Option<MessageId>,
    },

    /// Receiver-side confirmation that a pushed message landed.
    AckDelivered { message_id: MessageId },

    /// The viewer opened the conversation with `counterpart`; flip every
    /// message from them that is below `Read`.
    MarkRead { counterpart: UserId },

    AddReaction { message_id: MessageId, emoji: String },
    RemoveReaction { message_id: MessageId },
    DeleteMessage { message_id: MessageId },

    /// Full authoritative fetch of one conversation (cache reconciliation).
    FetchConversation { counterpart: UserId },

    CallInitiate { receiver: UserId, call_type: CallType },
    CallAccept { caller: UserId },
    CallReject { caller: UserId, reason: CallRejectReason },
    CallEnd { counterpart: UserId },

    /// Opaque negotiation payload (SDP/ICE or anything else) relayed
    /// verbatim to the target; the hub never inspects it.
    Signal { target: UserId, payload: Vec<u8> },
}

/// Frames pushed by the hub to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerFrame {
    /// Registration acknowledged; carries the connection's identity.
    Registered { connection_id: ConnectionId },

    /// Full snapshot of the online set, pushed after every presence flip.
    PresenceSnapshot { online: Vec<UserId> },

    /// The store accepted the sender's submission; the message now carries
    /// its authoritative id and the stub keyed by `correlation_id` must be
    /// replaced.
    MessageAccepted {
        correlation_id: CorrelationId,
        message: Message,
    },

    /// Submission failed; the stub goes to `Failed`.
    SendFailed {
        correlation_id: CorrelationId,
        reason: String,
    },

    /// A new message for this client (it is the receiver).
    MessagePushed { message: Message },

    /// The receiver confirmed a push; sender copies advance to `Delivered`.
    MessageDelivered {
        message_id: MessageId,
        at: DateTime<Utc>,
    },

    /// `read_by` opened the conversation; every message this client sent
    /// them below `Read` advances.
    MessagesRead {
        read_by: UserId,
        at: DateTime<Utc>,
    },

    /// Full reaction snapshot for one message, never a diff.
    ReactionUpdated {
        message_id: MessageId,
        reactions: BTreeMap<UserId, String>,
    },

    MessageDeleted {
        message_id: MessageId,
        deleted_at: DateTime<Utc>,
    },

    /// Authoritative, ordered conversation listing (reconciliation fetch).
    ConversationSnapshot {
        counterpart: UserId,
        messages: Vec<Message>,
    },

    CallIncoming { caller: UserId, call_type: CallType },
    CallAccepted { by: UserId },
    CallRejected { by: UserId, reason: CallRejectReason },
    CallEnded { by: UserId },

    Signal { from: UserId, payload: Vec<u8> },
}

impl ClientFrame {
    /// Serialize to binary (bincode).
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
        Ok(bincode::deserialize(data)?)
    }
}

impl ServerFrame {
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
        Ok(bincode::deserialize(data)?)
    }
}
