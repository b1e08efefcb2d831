//! UI-facing events.
//!
//! The session pushes these over an unbounded channel; the embedding shell
//! (desktop app, TUI, test harness) decides how to render them. Every
//! payload is `Serialize` so it can cross an IPC boundary unchanged.

use serde::Serialize;

use courant_shared::types::{CallType, CorrelationId, UserId};

#[derive(Debug, Clone, Serialize)]
pub enum ClientEvent {
    /// The online set changed; full snapshot, not a delta.
    PresenceChanged { online: Vec<UserId> },

    /// Something in the conversation with `counterpart` changed (new
    /// message, status advance, reaction, deletion, full refresh). The UI
    /// re-reads the session's message list.
    ConversationUpdated { counterpart: UserId },

    /// A submission failed; the stub is `Failed` with a manual retry.
    SendFailed {
        correlation_id: CorrelationId,
        reason: String,
    },

    /// Someone is calling.
    IncomingCall { caller: UserId, call_type: CallType },

    /// The local call session moved; the UI re-reads the call state.
    CallStateChanged,

    /// Opaque negotiation payload for the media layer.
    CallSignal { from: UserId, payload: Vec<u8> },
}
