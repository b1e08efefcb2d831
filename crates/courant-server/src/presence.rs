//! Presence broadcaster.
//!
//! After each registry mutation that flips a user's presence, every live
//! connection receives a full snapshot of the online set rather than a
//! delta, so a client that missed one churn event self-corrects on the
//! next. Broadcast is fire-and-forget per connection; a closed channel is
//! reaped as an implicit deregister and never blocks the others.

use tracing::debug;

use courant_shared::protocol::ServerFrame;
use courant_shared::types::ConnectionId;

use crate::hub::Hub;

impl Hub {
    /// Push the current online set to every connection, then reap any
    /// connections whose channel turned out to be closed.
    pub(crate) async fn broadcast_presence(&self) {
        let online = self.registry.online_users().await;
        debug!(online = online.len(), "broadcasting presence snapshot");

        let dead = self
            .registry
            .broadcast(&ServerFrame::PresenceSnapshot { online })
            .await;
        self.reap(dead).await;
    }

    /// Implicitly deregister connections that failed a push. Deregistering
    /// can flip presence, which broadcasts again and may surface more dead
    /// connections; the loop runs until the registry settles.
    pub(crate) async fn reap(&self, mut dead: Vec<ConnectionId>) {
        while !dead.is_empty() {
            let mut flipped = false;
            for conn in dead.drain(..) {
                if let Some((_, change)) = self.registry.deregister(conn).await {
                    if change == crate::registry::PresenceChange::WentOffline {
                        flipped = true;
                    }
                }
            }

            if flipped {
                let online = self.registry.online_users().await;
                dead = self
                    .registry
                    .broadcast(&ServerFrame::PresenceSnapshot { online })
                    .await;
            }
        }
    }
}
