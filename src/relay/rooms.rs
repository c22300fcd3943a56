//! Room membership for live relay connections.
//!
//! Rooms are keyed by conversation id. A connection may sit in several rooms;
//! all of its memberships are dropped when it disconnects.
//!
//! ```text
//! Room: p1-t1          Room: p2-t7
//! ├── conn-a           └── conn-d
//! └── conn-b
//! ```

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, RwLock};
use tracing::warn;
use uuid::Uuid;

use super::protocol::ServerFrame;

/// Identifier the relay assigns to each websocket connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Connection {
    outbound: mpsc::Sender<ServerFrame>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

/// Tracks which connections are in which rooms and fans frames out to them.
///
/// Holds nothing durable; a restarted relay simply starts empty and clients rejoin.
pub struct RoomRegistry {
    inner: RwLock<Registry>,
    channel_capacity: usize,
}

impl RoomRegistry {
    /// `channel_capacity` bounds each connection's outbound queue. Frames for a
    /// connection whose queue is full are dropped.
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Registry::default()),
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Register a new connection and return its id plus the queue of frames to write to it.
    pub async fn register(&self) -> (ConnectionId, mpsc::Receiver<ServerFrame>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        self.inner.write().await.connections.insert(
            id.clone(),
            Connection {
                outbound: tx,
                rooms: HashSet::new(),
            },
        );
        (id, rx)
    }

    /// Add `id` to `room`. Earlier memberships are kept.
    /// Returns false if the connection is not registered.
    pub async fn join(&self, id: &ConnectionId, room: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Some(conn) = inner.connections.get_mut(id) else {
            return false;
        };
        conn.rooms.insert(room.to_string());
        inner
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(id.clone());
        true
    }

    /// Queue `frame` for every member of `room` except `sender`.
    /// Returns how many connections it was queued for.
    pub async fn broadcast_from(&self, sender: &ConnectionId, room: &str, frame: ServerFrame) -> usize {
        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(room) else {
            return 0;
        };

        let mut delivered = 0;
        for member in members.iter().filter(|m| *m != sender) {
            let Some(conn) = inner.connections.get(member) else {
                continue;
            };
            match conn.outbound.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection_id = %member, room, "Outbound queue full, dropping frame");
                }
                // Connection is shutting down; disconnect will prune it.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    /// Queue a frame for a single connection.
    pub async fn send_to(&self, id: &ConnectionId, frame: ServerFrame) -> bool {
        let inner = self.inner.read().await;
        match inner.connections.get(id) {
            Some(conn) => conn.outbound.try_send(frame).is_ok(),
            None => false,
        }
    }

    /// Forget a connection and every room membership it held. Empty rooms are removed.
    pub async fn disconnect(&self, id: &ConnectionId) {
        let mut inner = self.inner.write().await;
        let Some(conn) = inner.connections.remove(id) else {
            return;
        };
        for room in conn.rooms {
            if let Some(members) = inner.rooms.get_mut(&room) {
                members.remove(id);
                if members.is_empty() {
                    inner.rooms.remove(&room);
                }
            }
        }
    }

    pub async fn members(&self, room: &str) -> usize {
        self.inner
            .read()
            .await
            .rooms
            .get(room)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatMessage;

    fn frame(id: &str) -> ServerFrame {
        ServerFrame::ReceiveMessage(ChatMessage {
            id: id.into(),
            chat_id: "p1-t1".into(),
            sender_id: "t1".into(),
            sender_name: "Amit".into(),
            text: "Hi".into(),
            timestamp: 1,
        })
    }

    #[tokio::test]
    async fn broadcast_skips_sender() {
        let registry = RoomRegistry::default();
        let (a, mut rx_a) = registry.register().await;
        let (b, mut rx_b) = registry.register().await;
        registry.join(&a, "p1-t1").await;
        registry.join(&b, "p1-t1").await;

        let delivered = registry.broadcast_from(&a, "p1-t1", frame("m1")).await;

        assert_eq!(delivered, 1);
        assert_eq!(rx_b.recv().await, Some(frame("m1")));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_stays_inside_room() {
        let registry = RoomRegistry::default();
        let (a, _rx_a) = registry.register().await;
        let (b, mut rx_b) = registry.register().await;
        registry.join(&a, "p1-t1").await;
        registry.join(&b, "p2-t1").await;

        assert_eq!(registry.broadcast_from(&a, "p1-t1", frame("m1")).await, 0);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_to_unknown_room_is_noop() {
        let registry = RoomRegistry::default();
        let (a, _rx) = registry.register().await;
        assert_eq!(registry.broadcast_from(&a, "nobody", frame("m1")).await, 0);
    }

    #[tokio::test]
    async fn joining_a_second_room_keeps_the_first() {
        let registry = RoomRegistry::default();
        let (a, _rx_a) = registry.register().await;
        let (b, mut rx_b) = registry.register().await;
        registry.join(&b, "p1-t1").await;
        registry.join(&b, "p2-t1").await;
        registry.join(&a, "p1-t1").await;

        registry.broadcast_from(&a, "p1-t1", frame("m1")).await;
        assert_eq!(rx_b.recv().await, Some(frame("m1")));
        assert_eq!(registry.room_count().await, 2);
    }

    #[tokio::test]
    async fn disconnect_prunes_memberships_and_empty_rooms() {
        let registry = RoomRegistry::default();
        let (a, _rx_a) = registry.register().await;
        let (b, _rx_b) = registry.register().await;
        registry.join(&a, "p1-t1").await;
        registry.join(&a, "p2-t1").await;
        registry.join(&b, "p1-t1").await;

        registry.disconnect(&a).await;

        assert_eq!(registry.connection_count().await, 1);
        assert_eq!(registry.members("p1-t1").await, 1);
        assert_eq!(registry.members("p2-t1").await, 0);
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn join_requires_registration() {
        let registry = RoomRegistry::default();
        assert!(!registry.join(&ConnectionId::new(), "p1-t1").await);
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let registry = RoomRegistry::new(1);
        let (a, _rx_a) = registry.register().await;
        let (b, mut rx_b) = registry.register().await;
        registry.join(&a, "p1-t1").await;
        registry.join(&b, "p1-t1").await;

        assert_eq!(registry.broadcast_from(&a, "p1-t1", frame("m1")).await, 1);
        assert_eq!(registry.broadcast_from(&a, "p1-t1", frame("m2")).await, 0);
        assert_eq!(rx_b.recv().await, Some(frame("m1")));
    }

    #[test]
    fn connection_id_displays_as_uuid() {
        assert_eq!(ConnectionId::new().to_string().len(), 36);
    }
}
