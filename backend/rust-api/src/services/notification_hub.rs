use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::metrics::{record_delivery, REALTIME_CONNECTIONS_ACTIVE};
use crate::models::realtime::ServerEvent;

/// Live realtime connections keyed by user id.
///
/// One user may hold several sockets (tabs, devices); each gets its own
/// channel. Delivery is best-effort: the database is the source of truth and
/// an offline user picks notifications up through the REST listing.
#[derive(Default)]
pub struct NotificationHub {
    rooms: RwLock<HashMap<String, HashMap<Uuid, mpsc::UnboundedSender<ServerEvent>>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the user's room; the receiver yields events pushed to that user
    pub async fn register(&self, user_id: &str) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();

        self.rooms
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id, tx);

        REALTIME_CONNECTIONS_ACTIVE.inc();
        tracing::debug!(user_id, %connection_id, "Realtime connection registered");
        (connection_id, rx)
    }

    pub async fn unregister(&self, user_id: &str, connection_id: Uuid) {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(user_id) else {
            return;
        };
        if room.remove(&connection_id).is_some() {
            REALTIME_CONNECTIONS_ACTIVE.dec();
        }
        if room.is_empty() {
            rooms.remove(user_id);
        }
        tracing::debug!(user_id, %connection_id, "Realtime connection closed");
    }

    /// Returns true when at least one live connection received the event
    pub async fn push(&self, user_id: &str, event: ServerEvent) -> bool {
        let mut dead = Vec::new();
        let mut delivered = false;

        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(user_id) {
                for (connection_id, tx) in room {
                    if tx.send(event.clone()).is_ok() {
                        delivered = true;
                    } else {
                        dead.push(*connection_id);
                    }
                }
            }
        }

        for connection_id in dead {
            self.unregister(user_id, connection_id).await;
        }

        if !delivered {
            tracing::debug!(user_id, "No live connection; realtime push dropped");
        }
        record_delivery(delivered);
        delivered
    }

    pub async fn connection_count(&self) -> usize {
        self.rooms.read().await.values().map(HashMap::len).sum()
    }

    /// Drops every sender so open sockets observe a closed channel
    pub async fn shutdown(&self) {
        let mut rooms = self.rooms.write().await;
        let closed: usize = rooms.values().map(HashMap::len).sum();
        rooms.clear();
        REALTIME_CONNECTIONS_ACTIVE.sub(closed as i64);
        tracing::info!(closed, "Realtime hub shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_reaches_every_connection_of_user() {
        let hub = NotificationHub::new();
        let (_, mut first) = hub.register("u1").await;
        let (_, mut second) = hub.register("u1").await;
        let (_, mut other) = hub.register("u2").await;

        assert!(hub.push("u1", ServerEvent::Pong).await);
        assert_eq!(first.recv().await, Some(ServerEvent::Pong));
        assert_eq!(second.recv().await, Some(ServerEvent::Pong));
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_push_to_offline_user_is_dropped() {
        let hub = NotificationHub::new();
        assert!(!hub.push("ghost", ServerEvent::Pong).await);
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_unregister_removes_empty_room() {
        let hub = NotificationHub::new();
        let (id, _rx) = hub.register("u1").await;
        assert_eq!(hub.connection_count().await, 1);
        hub.unregister("u1", id).await;
        assert_eq!(hub.connection_count().await, 0);
        assert!(!hub.push("u1", ServerEvent::Pong).await);
    }

    #[tokio::test]
    async fn test_dead_receivers_are_pruned() {
        let hub = NotificationHub::new();
        let (_, rx) = hub.register("u1").await;
        drop(rx);
        assert!(!hub.push("u1", ServerEvent::Pong).await);
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_channels() {
        let hub = NotificationHub::new();
        let (_, mut rx) = hub.register("u1").await;
        hub.shutdown().await;
        assert_eq!(rx.recv().await, None);
    }
}
