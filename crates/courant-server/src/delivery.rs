//! Message delivery pipeline, server half.
//!
//! Persist via the store collaborator, acknowledge the sender, push to the
//! receiver's live connections, and relay the receipt/reaction/deletion
//! events that drive the status lifecycle. Delivered is granted on
//! confirmed push only: the receiving client answers `AckDelivered` when a
//! pushed message lands, and only then do the sender's copies advance.
//! An offline receiver discovers messages through its next reconciliation
//! fetch; there is no retry timer and no replay backlog.

use chrono::Utc;
use tracing::{debug, warn};

use courant_shared::message::{MessageContent, MessageStatus};
use courant_shared::protocol::ServerFrame;
use courant_shared::types::{CorrelationId, MessageId, UserId};

use crate::hub::Hub;

impl Hub {
    pub(crate) async fn handle_send(
        &self,
        sender: UserId,
        receiver: UserId,
        correlation_id: CorrelationId,
        content: MessageContent,
        reply_to: Option<MessageId>,
    ) {
        let message = match self
            .store
            .create(sender, receiver, correlation_id, content, reply_to)
        {
            Ok(message) => message,
            Err(e) => {
                // Surfaced to the initiating user only; their stub goes to
                // Failed with a manual retry.
                warn!(sender = %sender.short(), error = %e, "message submission failed");
                let dead = self
                    .registry
                    .send_to_user(
                        sender,
                        &ServerFrame::SendFailed {
                            correlation_id,
                            reason: e.to_string(),
                        },
                    )
                    .await;
                self.reap(dead).await;
                return;
            }
        };

        debug!(
            id = %message.id,
            sender = %sender.short(),
            receiver = %receiver.short(),
            "message persisted"
        );

        // Ack every sender connection so other devices pick up the message.
        let mut dead = self
            .registry
            .send_to_user(
                sender,
                &ServerFrame::MessageAccepted {
                    correlation_id,
                    message: message.clone(),
                },
            )
            .await;

        // Push to the receiver if reachable; otherwise the message stays at
        // Sent until their next fetch.
        if self.registry.is_online(receiver).await {
            dead.extend(
                self.registry
                    .send_to_user(receiver, &ServerFrame::MessagePushed { message })
                    .await,
            );
        }
        self.reap(dead).await;
    }

    /// Receiver confirmed a push; advance the store and tell the sender.
    pub(crate) async fn handle_ack_delivered(&self, acker: UserId, message_id: MessageId) {
        let message = match self.store.get(message_id) {
            Ok(message) => message,
            Err(e) => {
                debug!(id = %message_id, error = %e, "delivery ack for unknown message");
                return;
            }
        };
        if message.receiver != acker {
            warn!(id = %message_id, acker = %acker.short(), "delivery ack from non-receiver ignored");
            return;
        }

        let at = Utc::now();
        match self.store.advance_status(message_id, MessageStatus::Delivered, at) {
            // Duplicate ack from a second device: already at or past
            // Delivered, nothing to announce.
            Ok(false) => {}
            Ok(true) => {
                let dead = self
                    .registry
                    .send_to_user(
                        message.sender,
                        &ServerFrame::MessageDelivered { message_id, at },
                    )
                    .await;
                self.reap(dead).await;
            }
            Err(e) => warn!(id = %message_id, error = %e, "failed to record delivery"),
        }
    }

    /// The viewer opened the conversation with `counterpart`; flip every
    /// message from them below Read and send a receipt to each of the
    /// original sender's live connections.
    pub(crate) async fn handle_mark_read(&self, viewer: UserId, counterpart: UserId) {
        let at = Utc::now();
        let affected = match self.store.mark_read(counterpart, viewer, at) {
            Ok(affected) => affected,
            Err(e) => {
                warn!(viewer = %viewer.short(), error = %e, "mark-read failed");
                return;
            }
        };
        if affected.is_empty() {
            return;
        }

        debug!(
            viewer = %viewer.short(),
            counterpart = %counterpart.short(),
            count = affected.len(),
            "conversation marked read"
        );

        let dead = self
            .registry
            .send_to_user(
                counterpart,
                &ServerFrame::MessagesRead {
                    read_by: viewer,
                    at,
                },
            )
            .await;
        self.reap(dead).await;
    }

    /// Add (`Some`) or remove (`None`) a reaction, then push the full
    /// snapshot of the message's reactions to both parties.
    pub(crate) async fn handle_reaction(
        &self,
        user: UserId,
        message_id: MessageId,
        emoji: Option<String>,
    ) {
        let message = match self.store.get(message_id) {
            Ok(message) => message,
            Err(e) => {
                debug!(id = %message_id, error = %e, "reaction on unknown message ignored");
                return;
            }
        };
        if user != message.sender && user != message.receiver {
            warn!(id = %message_id, user = %user.short(), "reaction from non-participant ignored");
            return;
        }

        let reactions = match self.store.set_reaction(message_id, user, emoji.as_deref()) {
            Ok(reactions) => reactions,
            Err(e) => {
                debug!(id = %message_id, error = %e, "reaction rejected");
                return;
            }
        };

        let frame = ServerFrame::ReactionUpdated {
            message_id,
            reactions,
        };
        let mut dead = self.registry.send_to_user(message.sender, &frame).await;
        dead.extend(self.registry.send_to_user(message.receiver, &frame).await);
        self.reap(dead).await;
    }

    pub(crate) async fn handle_delete(&self, user: UserId, message_id: MessageId) {
        let message = match self.store.get(message_id) {
            Ok(message) => message,
            Err(e) => {
                debug!(id = %message_id, error = %e, "deletion of unknown message ignored");
                return;
            }
        };
        if user != message.sender && user != message.receiver {
            warn!(id = %message_id, user = %user.short(), "deletion from non-participant ignored");
            return;
        }

        let deleted_at = match self.store.delete(message_id, Utc::now()) {
            Ok(deleted_at) => deleted_at,
            Err(e) => {
                warn!(id = %message_id, error = %e, "deletion failed");
                return;
            }
        };

        let frame = ServerFrame::MessageDeleted {
            message_id,
            deleted_at,
        };
        let mut dead = self.registry.send_to_user(message.sender, &frame).await;
        dead.extend(self.registry.send_to_user(message.receiver, &frame).await);
        self.reap(dead).await;
    }

    /// Full authoritative listing for the cache synchronizer.
    pub(crate) async fn handle_fetch(&self, viewer: UserId, counterpart: UserId) {
        let messages = match self.store.conversation(viewer, counterpart) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(viewer = %viewer.short(), error = %e, "conversation fetch failed");
                return;
            }
        };

        let dead = self
            .registry
            .send_to_user(
                viewer,
                &ServerFrame::ConversationSnapshot {
                    counterpart,
                    messages,
                },
            )
            .await;
        self.reap(dead).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use courant_shared::types::ConnectionId;

    use super::*;
    use crate::store::{MemoryStore, MessageStore};

    struct TestClient {
        user: UserId,
        rx: mpsc::Receiver<ServerFrame>,
    }

    impl TestClient {
        /// Next frame that is not a presence or registration notification.
        async fn next_data_frame(&mut self) -> ServerFrame {
            loop {
                match self.rx.recv().await.expect("channel open") {
                    ServerFrame::Registered { .. } | ServerFrame::PresenceSnapshot { .. } => {}
                    frame => return frame,
                }
            }
        }
    }

    async fn connect(hub: &Hub) -> TestClient {
        connect_as(hub, UserId::new()).await
    }

    async fn connect_as(hub: &Hub, user: UserId) -> TestClient {
        let (tx, rx) = mpsc::channel(32);
        hub.connect(user, ConnectionId::new(), tx).await;
        TestClient { user, rx }
    }

    fn text(s: &str) -> MessageContent {
        MessageContent::Text(s.into())
    }

    #[tokio::test]
    async fn test_send_acks_sender_and_pushes_receiver() {
        let hub = Hub::new(Arc::new(MemoryStore::new()));
        let mut alice = connect(&hub).await;
        let mut bob = connect(&hub).await;

        let corr = CorrelationId::new();
        hub.handle_send(alice.user, bob.user, corr, text("salut"), None)
            .await;

        let accepted = alice.next_data_frame().await;
        let message = match accepted {
            ServerFrame::MessageAccepted {
                correlation_id,
                message,
            } => {
                assert_eq!(correlation_id, corr);
                assert_eq!(message.status, MessageStatus::Sent);
                message
            }
            other => panic!("expected MessageAccepted, got {other:?}"),
        };

        match bob.next_data_frame().await {
            ServerFrame::MessagePushed { message: pushed } => assert_eq!(pushed.id, message.id),
            other => panic!("expected MessagePushed, got {other:?}"),
        }

        // Bob's client acks the push; Alice sees Delivered.
        hub.handle_ack_delivered(bob.user, message.id).await;
        match alice.next_data_frame().await {
            ServerFrame::MessageDelivered { message_id, .. } => assert_eq!(message_id, message.id),
            other => panic!("expected MessageDelivered, got {other:?}"),
        }

        // A duplicate ack announces nothing further.
        hub.handle_ack_delivered(bob.user, message.id).await;
        hub.handle_mark_read(bob.user, alice.user).await;
        match alice.next_data_frame().await {
            ServerFrame::MessagesRead { read_by, .. } => assert_eq!(read_by, bob.user),
            other => panic!("expected MessagesRead, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_offline_receiver_stays_at_sent() {
        let store = Arc::new(MemoryStore::new());
        let hub = Hub::new(store.clone());
        let mut alice = connect(&hub).await;
        let bob = UserId::new(); // never connects

        hub.handle_send(alice.user, bob, CorrelationId::new(), text("hello"), None)
            .await;

        let id = match alice.next_data_frame().await {
            ServerFrame::MessageAccepted { message, .. } => message.id,
            other => panic!("expected MessageAccepted, got {other:?}"),
        };
        assert_eq!(store.get(id).unwrap().status, MessageStatus::Sent);

        // Bob reconnects later; the reconciliation fetch carries the
        // message he missed (push has no replay backlog).
        let mut bob_client = connect_as(&hub, bob).await;
        hub.handle_fetch(bob_client.user, alice.user).await;
        match bob_client.next_data_frame().await {
            ServerFrame::ConversationSnapshot { messages, .. } => {
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].id, id);
            }
            other => panic!("expected ConversationSnapshot, got {other:?}"),
        }
        // Reconciliation alone does not mark delivery.
        assert_eq!(store.get(id).unwrap().status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn test_ack_from_non_receiver_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        let hub = Hub::new(store.clone());
        let mut alice = connect(&hub).await;
        let bob = connect(&hub).await;
        let mallory = connect(&hub).await;

        hub.handle_send(alice.user, bob.user, CorrelationId::new(), text("x"), None)
            .await;
        let id = match alice.next_data_frame().await {
            ServerFrame::MessageAccepted { message, .. } => message.id,
            other => panic!("expected MessageAccepted, got {other:?}"),
        };

        hub.handle_ack_delivered(mallory.user, id).await;
        assert_eq!(store.get(id).unwrap().status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn test_reaction_snapshot_reaches_both_parties() {
        let hub = Hub::new(Arc::new(MemoryStore::new()));
        let mut alice = connect(&hub).await;
        let mut bob = connect(&hub).await;

        hub.handle_send(alice.user, bob.user, CorrelationId::new(), text("x"), None)
            .await;
        let id = match alice.next_data_frame().await {
            ServerFrame::MessageAccepted { message, .. } => message.id,
            other => panic!("expected MessageAccepted, got {other:?}"),
        };
        let _ = bob.next_data_frame().await; // the push

        let bob_user = bob.user;
        hub.handle_reaction(bob_user, id, Some("❤️".into())).await;
        hub.handle_reaction(bob_user, id, Some("😂".into())).await;

        // Both parties converge on the final snapshot.
        for client in [&mut alice, &mut bob] {
            let mut last = None;
            for _ in 0..2 {
                match client.next_data_frame().await {
                    ServerFrame::ReactionUpdated { reactions, .. } => last = Some(reactions),
                    other => panic!("expected ReactionUpdated, got {other:?}"),
                }
            }
            let last = last.unwrap();
            assert_eq!(last.len(), 1);
            assert_eq!(last.get(&bob_user).map(String::as_str), Some("😂"));
        }
    }

    #[tokio::test]
    async fn test_delete_pushes_tombstone_and_blocks_reactions() {
        let store = Arc::new(MemoryStore::new());
        let hub = Hub::new(store.clone());
        let mut alice = connect(&hub).await;
        let mut bob = connect(&hub).await;

        hub.handle_send(alice.user, bob.user, CorrelationId::new(), text("oups"), None)
            .await;
        let id = match alice.next_data_frame().await {
            ServerFrame::MessageAccepted { message, .. } => message.id,
            other => panic!("expected MessageAccepted, got {other:?}"),
        };
        let _ = bob.next_data_frame().await;

        hub.handle_delete(alice.user, id).await;
        for client in [&mut alice, &mut bob] {
            match client.next_data_frame().await {
                ServerFrame::MessageDeleted { message_id, .. } => assert_eq!(message_id, id),
                other => panic!("expected MessageDeleted, got {other:?}"),
            }
        }

        // Reaction after deletion is rejected server-side: no frame goes out.
        hub.handle_reaction(bob.user, id, Some("❤️".into())).await;
        assert!(store.get(id).unwrap().reactions.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_returns_creation_order() {
        let hub = Hub::new(Arc::new(MemoryStore::new()));
        let mut alice = connect(&hub).await;
        let mut bob = connect(&hub).await;

        for text_body in ["un", "deux", "trois"] {
            hub.handle_send(
                alice.user,
                bob.user,
                CorrelationId::new(),
                text(text_body),
                None,
            )
            .await;
            let _ = alice.next_data_frame().await;
            let _ = bob.next_data_frame().await;
        }

        hub.handle_fetch(bob.user, alice.user).await;
        match bob.next_data_frame().await {
            ServerFrame::ConversationSnapshot { messages, .. } => {
                assert_eq!(messages.len(), 3);
                assert!(messages.windows(2).all(|w| {
                    (w[0].created_at, w[0].id) <= (w[1].created_at, w[1].id)
                }));
            }
            other => panic!("expected ConversationSnapshot, got {other:?}"),
        }
    }
}
