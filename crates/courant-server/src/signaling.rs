//! Call signaling relay.
//!
//! The hub brokers the call-setup handshake between two users but never
//! interprets it: offer/answer/candidate payloads are opaque bytes relayed
//! verbatim to the target's connections, and the busy decision belongs to
//! the target's own client. The only short-circuit here is the registry
//! check on initiation -- ringing an offline user is answered with an
//! immediate `Unreachable` rejection instead.

use tracing::debug;

use courant_shared::protocol::{CallRejectReason, ServerFrame};
use courant_shared::types::{CallType, UserId};

use crate::hub::Hub;

impl Hub {
    pub(crate) async fn handle_call_initiate(
        &self,
        caller: UserId,
        receiver: UserId,
        call_type: CallType,
    ) {
        if !self.registry.is_online(receiver).await {
            debug!(
                caller = %caller.short(),
                receiver = %receiver.short(),
                "call target offline, rejecting"
            );
            let dead = self
                .registry
                .send_to_user(
                    caller,
                    &ServerFrame::CallRejected {
                        by: receiver,
                        reason: CallRejectReason::Unreachable,
                    },
                )
                .await;
            self.reap(dead).await;
            return;
        }

        debug!(
            caller = %caller.short(),
            receiver = %receiver.short(),
            call_type = ?call_type,
            "relaying call offer"
        );
        let dead = self
            .registry
            .send_to_user(receiver, &ServerFrame::CallIncoming { caller, call_type })
            .await;
        self.reap(dead).await;
    }

    pub(crate) async fn handle_call_accept(&self, acceptor: UserId, caller: UserId) {
        let dead = self
            .registry
            .send_to_user(caller, &ServerFrame::CallAccepted { by: acceptor })
            .await;
        self.reap(dead).await;
    }

    pub(crate) async fn handle_call_reject(
        &self,
        rejector: UserId,
        caller: UserId,
        reason: CallRejectReason,
    ) {
        let dead = self
            .registry
            .send_to_user(caller, &ServerFrame::CallRejected { by: rejector, reason })
            .await;
        self.reap(dead).await;
    }

    pub(crate) async fn handle_call_end(&self, ender: UserId, counterpart: UserId) {
        let dead = self
            .registry
            .send_to_user(counterpart, &ServerFrame::CallEnded { by: ender })
            .await;
        self.reap(dead).await;
    }

    /// Opaque negotiation payload; relayed byte-for-byte.
    pub(crate) async fn handle_signal(&self, from: UserId, target: UserId, payload: Vec<u8>) {
        let dead = self
            .registry
            .send_to_user(target, &ServerFrame::Signal { from, payload })
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
    use crate::store::MemoryStore;

    struct TestClient {
        user: UserId,
        rx: mpsc::Receiver<ServerFrame>,
    }

    impl TestClient {
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
        let user = UserId::new();
        let (tx, rx) = mpsc::channel(32);
        hub.connect(user, ConnectionId::new(), tx).await;
        TestClient { user, rx }
    }

    #[tokio::test]
    async fn test_offer_accept_end_relay() {
        let hub = Hub::new(Arc::new(MemoryStore::new()));
        let mut alice = connect(&hub).await;
        let mut bob = connect(&hub).await;

        hub.handle_call_initiate(alice.user, bob.user, CallType::Video)
            .await;
        match bob.next_data_frame().await {
            ServerFrame::CallIncoming { caller, call_type } => {
                assert_eq!(caller, alice.user);
                assert_eq!(call_type, CallType::Video);
            }
            other => panic!("expected CallIncoming, got {other:?}"),
        }

        hub.handle_call_accept(bob.user, alice.user).await;
        match alice.next_data_frame().await {
            ServerFrame::CallAccepted { by } => assert_eq!(by, bob.user),
            other => panic!("expected CallAccepted, got {other:?}"),
        }

        // Negotiation payloads pass through untouched.
        let blob = vec![1u8, 2, 3, 255];
        hub.handle_signal(alice.user, bob.user, blob.clone()).await;
        match bob.next_data_frame().await {
            ServerFrame::Signal { from, payload } => {
                assert_eq!(from, alice.user);
                assert_eq!(payload, blob);
            }
            other => panic!("expected Signal, got {other:?}"),
        }

        hub.handle_call_end(alice.user, bob.user).await;
        match bob.next_data_frame().await {
            ServerFrame::CallEnded { by } => assert_eq!(by, alice.user),
            other => panic!("expected CallEnded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_offline_target_rejected_unreachable() {
        let hub = Hub::new(Arc::new(MemoryStore::new()));
        let mut alice = connect(&hub).await;
        let ghost = UserId::new();

        hub.handle_call_initiate(alice.user, ghost, CallType::Audio)
            .await;
        match alice.next_data_frame().await {
            ServerFrame::CallRejected { by, reason } => {
                assert_eq!(by, ghost);
                assert_eq!(reason, CallRejectReason::Unreachable);
            }
            other => panic!("expected CallRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_busy_reject_relayed_to_caller_only() {
        let hub = Hub::new(Arc::new(MemoryStore::new()));
        let mut carol = connect(&hub).await;
        let alice = connect(&hub).await;

        // Alice's client decided she is busy; the hub just relays.
        hub.handle_call_reject(alice.user, carol.user, CallRejectReason::Busy)
            .await;
        match carol.next_data_frame().await {
            ServerFrame::CallRejected { by, reason } => {
                assert_eq!(by, alice.user);
                assert_eq!(reason, CallRejectReason::Busy);
            }
            other => panic!("expected CallRejected, got {other:?}"),
        }
    }
}
