//! Connection registry.
//!
//! Authoritative, in-memory mapping from user identity to the set of live
//! transport connections. This is the single source of truth for presence;
//! no persisted "online" column is ever consulted for delivery decisions.
//!
//! Mutations take the write lock, so concurrent connect/disconnect for the
//! same or different users can never lose an update. Fan-out uses
//! non-blocking `try_send`: a slow or closed connection drops its frame and
//! is reported back as dead rather than blocking the others.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use courant_shared::protocol::ServerFrame;
use courant_shared::types::{ConnectionId, UserId};

/// How a registry mutation affected the user's presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    /// The user's first connection arrived.
    CameOnline,
    /// The user's last connection left.
    WentOffline,
    /// The user had other connections before and after.
    Unchanged,
}

/// Tracks every live connection, grouped by owning user.
pub struct ConnectionRegistry {
    users: RwLock<HashMap<UserId, HashMap<ConnectionId, mpsc::Sender<ServerFrame>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection under the user's key.
    pub async fn register(
        &self,
        user: UserId,
        conn: ConnectionId,
        sender: mpsc::Sender<ServerFrame>,
    ) -> PresenceChange {
        let mut users = self.users.write().await;
        let connections = users.entry(user).or_default();
        let was_empty = connections.is_empty();
        connections.insert(conn, sender);

        debug!(
            user = %user.short(),
            conn = %conn,
            connections = connections.len(),
            "registered connection"
        );

        if was_empty {
            PresenceChange::CameOnline
        } else {
            PresenceChange::Unchanged
        }
    }

    /// Remove a connection by id, determining the owning user. Returns the
    /// owner and whether the removal flipped their presence; `None` when the
    /// connection was already gone (deregistering twice is harmless).
    pub async fn deregister(&self, conn: ConnectionId) -> Option<(UserId, PresenceChange)> {
        let mut users = self.users.write().await;

        let owner = users
            .iter()
            .find(|(_, conns)| conns.contains_key(&conn))
            .map(|(user, _)| *user)?;

        let connections = users.get_mut(&owner)?;
        connections.remove(&conn);
        let now_offline = connections.is_empty();
        if now_offline {
            users.remove(&owner);
        }

        debug!(
            user = %owner.short(),
            conn = %conn,
            offline = now_offline,
            "deregistered connection"
        );

        let change = if now_offline {
            PresenceChange::WentOffline
        } else {
            PresenceChange::Unchanged
        };
        Some((owner, change))
    }

    /// True iff the user has at least one live connection.
    pub async fn is_online(&self, user: UserId) -> bool {
        self.users
            .read()
            .await
            .get(&user)
            .map(|conns| !conns.is_empty())
            .unwrap_or(false)
    }

    /// Snapshot of the user's live connection ids.
    pub async fn connections_for(&self, user: UserId) -> Vec<ConnectionId> {
        self.users
            .read()
            .await
            .get(&user)
            .map(|conns| conns.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every user with at least one live connection.
    pub async fn online_users(&self) -> Vec<UserId> {
        let mut online: Vec<UserId> = self.users.read().await.keys().copied().collect();
        online.sort();
        online
    }

    /// Push a frame to every connection of one user. Returns the ids of
    /// connections whose channel was closed or full; the caller reaps those
    /// as implicit deregisters. Never blocks on a slow connection.
    pub async fn send_to_user(&self, user: UserId, frame: &ServerFrame) -> Vec<ConnectionId> {
        let users = self.users.read().await;
        let Some(connections) = users.get(&user) else {
            return Vec::new();
        };

        let mut dead = Vec::new();
        for (conn, tx) in connections {
            match tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!(user = %user.short(), conn = %conn, "connection closed mid-push");
                    dead.push(*conn);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Backpressured consumer. Drop the frame; the snapshot
                    // semantics of presence/reactions make this self-healing
                    // and the next reconciliation fetch covers messages.
                    debug!(user = %user.short(), conn = %conn, "dropping frame for slow connection");
                }
            }
        }
        dead
    }

    /// Push a frame to every live connection of every user.
    pub async fn broadcast(&self, frame: &ServerFrame) -> Vec<ConnectionId> {
        let targets: Vec<UserId> = self.users.read().await.keys().copied().collect();
        let mut dead = Vec::new();
        for user in targets {
            dead.extend(self.send_to_user(user, frame).await);
        }
        dead
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (mpsc::Sender<ServerFrame>, mpsc::Receiver<ServerFrame>) {
        mpsc::channel(8)
    }

    #[tokio::test]
    async fn test_register_deregister_flips_presence() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let conn = ConnectionId::new();
        let (tx, _rx) = channel();

        assert!(!registry.is_online(user).await);

        let change = registry.register(user, conn, tx).await;
        assert_eq!(change, PresenceChange::CameOnline);
        assert!(registry.is_online(user).await);

        let (owner, change) = registry.deregister(conn).await.unwrap();
        assert_eq!(owner, user);
        assert_eq!(change, PresenceChange::WentOffline);
        assert!(!registry.is_online(user).await);
    }

    #[tokio::test]
    async fn test_multi_device_presence() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let mut rxs = Vec::new();
        let conns: Vec<ConnectionId> = (0..3).map(|_| ConnectionId::new()).collect();

        for (i, conn) in conns.iter().enumerate() {
            let (tx, rx) = channel();
            rxs.push(rx);
            let change = registry.register(user, *conn, tx).await;
            if i == 0 {
                assert_eq!(change, PresenceChange::CameOnline);
            } else {
                assert_eq!(change, PresenceChange::Unchanged);
            }
        }
        assert_eq!(registry.connections_for(user).await.len(), 3);

        // N connections, N-1 disconnects: still online.
        for conn in &conns[..2] {
            let (_, change) = registry.deregister(*conn).await.unwrap();
            assert_eq!(change, PresenceChange::Unchanged);
        }
        assert!(registry.is_online(user).await);

        // The last disconnect flips it.
        let (_, change) = registry.deregister(conns[2]).await.unwrap();
        assert_eq!(change, PresenceChange::WentOffline);
        assert!(!registry.is_online(user).await);
    }

    #[tokio::test]
    async fn test_deregister_unknown_connection_is_noop() {
        let registry = ConnectionRegistry::new();
        assert!(registry.deregister(ConnectionId::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_send_reports_closed_connections() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let live = ConnectionId::new();
        let dead = ConnectionId::new();

        let (live_tx, mut live_rx) = channel();
        let (dead_tx, dead_rx) = channel();
        registry.register(user, live, live_tx).await;
        registry.register(user, dead, dead_tx).await;
        drop(dead_rx);

        let reaped = registry
            .send_to_user(user, &ServerFrame::PresenceSnapshot { online: vec![user] })
            .await;
        assert_eq!(reaped, vec![dead]);

        // The live connection still got its frame.
        assert!(matches!(
            live_rx.try_recv().unwrap(),
            ServerFrame::PresenceSnapshot { .. }
        ));
    }

    #[tokio::test]
    async fn test_online_users_snapshot() {
        let registry = ConnectionRegistry::new();
        let a = UserId::new();
        let b = UserId::new();
        let (tx_a, _rx_a) = channel();
        let (tx_b, _rx_b) = channel();

        registry.register(a, ConnectionId::new(), tx_a).await;
        registry.register(b, ConnectionId::new(), tx_b).await;

        let online = registry.online_users().await;
        assert_eq!(online.len(), 2);
        assert!(online.contains(&a) && online.contains(&b));
    }
}
