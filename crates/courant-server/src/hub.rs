//! The hub ties the connection registry, the message store collaborator and
//! the per-connection outboxes together. One instance is shared by every
//! transport connection; per-module `impl Hub` blocks add the delivery
//! pipeline (`delivery.rs`), presence fan-out (`presence.rs`) and call
//! signaling relay (`signaling.rs`).

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use courant_shared::protocol::{ClientFrame, ServerFrame};
use courant_shared::types::{ConnectionId, UserId};

use crate::registry::{ConnectionRegistry, PresenceChange};
use crate::store::MessageStore;

pub struct Hub {
    pub(crate) registry: ConnectionRegistry,
    pub(crate) store: Arc<dyn MessageStore>,
}

impl Hub {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            store,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Attach a fresh transport connection. The new connection immediately
    /// receives its identity and a presence snapshot; everyone else only
    /// hears about it if the user just came online.
    pub async fn connect(&self, user: UserId, conn: ConnectionId, tx: mpsc::Sender<ServerFrame>) {
        let change = self.registry.register(user, conn, tx.clone()).await;

        let _ = tx.send(ServerFrame::Registered { connection_id: conn }).await;

        // Exactly one snapshot reaches the new connection: the presence
        // broadcast when this connect flipped the user online, a direct
        // send otherwise.
        if change == PresenceChange::CameOnline {
            info!(user = %user.short(), "user came online");
            self.broadcast_presence().await;
        } else {
            let _ = tx
                .send(ServerFrame::PresenceSnapshot {
                    online: self.registry.online_users().await,
                })
                .await;
        }
    }

    /// Detach a connection (socket closed, or implicit after a failed push).
    pub async fn disconnect(&self, conn: ConnectionId) {
        if let Some((user, change)) = self.registry.deregister(conn).await {
            if change == PresenceChange::WentOffline {
                info!(user = %user.short(), "user went offline");
                self.broadcast_presence().await;
            }
        }
    }

    /// Dispatch one decoded frame from `user`'s connection.
    pub async fn handle_frame(&self, user: UserId, frame: ClientFrame) {
        match frame {
            ClientFrame::Register { user: requested } => {
                // Registration is consumed by the transport handshake; a
                // second one on a live connection is a protocol slip.
                warn!(user = %user.short(), requested = %requested.short(), "duplicate register frame ignored");
            }
            ClientFrame::SendMessage {
                correlation_id,
                receiver,
                content,
                reply_to,
            } => {
                self.handle_send(user, receiver, correlation_id, content, reply_to)
                    .await;
            }
            ClientFrame::AckDelivered { message_id } => {
                self.handle_ack_delivered(user, message_id).await;
            }
            ClientFrame::MarkRead { counterpart } => {
                self.handle_mark_read(user, counterpart).await;
            }
            ClientFrame::AddReaction { message_id, emoji } => {
                self.handle_reaction(user, message_id, Some(emoji)).await;
            }
            ClientFrame::RemoveReaction { message_id } => {
                self.handle_reaction(user, message_id, None).await;
            }
            ClientFrame::DeleteMessage { message_id } => {
                self.handle_delete(user, message_id).await;
            }
            ClientFrame::FetchConversation { counterpart } => {
                self.handle_fetch(user, counterpart).await;
            }
            ClientFrame::CallInitiate {
                receiver,
                call_type,
            } => {
                self.handle_call_initiate(user, receiver, call_type).await;
            }
            ClientFrame::CallAccept { caller } => {
                self.handle_call_accept(user, caller).await;
            }
            ClientFrame::CallReject { caller, reason } => {
                self.handle_call_reject(user, caller, reason).await;
            }
            ClientFrame::CallEnd { counterpart } => {
                self.handle_call_end(user, counterpart).await;
            }
            ClientFrame::Signal { target, payload } => {
                self.handle_signal(user, target, payload).await;
            }
        }
    }
}
