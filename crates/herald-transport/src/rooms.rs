//! Socket registry and room membership.

use dashmap::{DashMap, DashSet};
use herald_core::{SocketId, Transport};
use herald_protocol::ServerFrame;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Default capacity of each socket's outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket is not registered.
    #[error("Socket not connected: {0}")]
    NotConnected(String),

    /// The socket's outbound queue is full.
    #[error("Outbound queue full for socket {0}")]
    QueueFull(String),

    /// The socket's connection handler has stopped reading.
    #[error("Connection closed")]
    ConnectionClosed,
}

static SOCKET_SEQ: AtomicU64 = AtomicU64::new(0);

/// Generate a unique socket id.
#[must_use]
pub fn generate_socket_id() -> SocketId {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = SOCKET_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{timestamp:x}.{seq}")
}

/// In-process transport with per-socket outbound queues.
#[derive(Debug)]
pub struct RoomTransport {
    /// Outbound queue of every connected socket.
    sockets: DashMap<SocketId, mpsc::Sender<ServerFrame>>,
    /// Room name -> member sockets.
    rooms: DashMap<String, DashSet<SocketId>>,
    /// Socket -> rooms it joined.
    memberships: DashMap<SocketId, DashSet<String>>,
    outbound_capacity: usize,
}

impl Default for RoomTransport {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOUND_CAPACITY)
    }
}

impl RoomTransport {
    /// Create a transport whose sockets buffer up to `outbound_capacity`
    /// frames each.
    #[must_use]
    pub fn new(outbound_capacity: usize) -> Self {
        Self {
            sockets: DashMap::new(),
            rooms: DashMap::new(),
            memberships: DashMap::new(),
            outbound_capacity: outbound_capacity.max(1),
        }
    }

    /// Register a connected socket. Returns the queue of frames to write to
    /// it.
    pub fn register(&self, socket: &str) -> mpsc::Receiver<ServerFrame> {
        let (tx, rx) = mpsc::channel(self.outbound_capacity);
        self.sockets.insert(socket.to_string(), tx);
        debug!(socket = %socket, "Socket registered");
        rx
    }

    /// Forget a socket and remove it from every room.
    pub fn unregister(&self, socket: &str) {
        self.sockets.remove(socket);
        if let Some((_, rooms)) = self.memberships.remove(socket) {
            for room in rooms.iter() {
                self.remove_from_room(socket, room.key());
            }
        }
        debug!(socket = %socket, "Socket unregistered");
    }

    /// Rooms a socket is in.
    #[must_use]
    pub fn rooms_of(&self, socket: &str) -> Vec<String> {
        self.memberships
            .get(socket)
            .map(|rooms| rooms.iter().map(|r| r.key().clone()).collect())
            .unwrap_or_default()
    }

    /// Number of sockets in a room.
    #[must_use]
    pub fn room_size(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, |members| members.len())
    }

    /// Every non-empty room with its size.
    #[must_use]
    pub fn room_sizes(&self) -> Vec<(String, usize)> {
        self.rooms
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect()
    }

    /// Number of connected sockets.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.sockets.len()
    }

    /// Send a frame to one socket.
    ///
    /// # Errors
    ///
    /// Fails if the socket is unknown, its queue is full or its handler is
    /// gone.
    pub fn send(&self, socket: &str, frame: ServerFrame) -> Result<(), TransportError> {
        let tx = self
            .sockets
            .get(socket)
            .ok_or_else(|| TransportError::NotConnected(socket.to_string()))?;

        tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull(socket.to_string()),
            mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
        })
    }

    fn deliver(&self, socket: &str, frame: ServerFrame) {
        if let Err(e) = self.send(socket, frame) {
            warn!(socket = %socket, error = %e, "Dropped outbound frame");
        }
    }

    fn remove_from_room(&self, socket: &str, room: &str) {
        if let Some(members) = self.rooms.get(room) {
            members.remove(socket);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }

    fn members_of(&self, room: &str) -> Vec<SocketId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().map(|s| s.key().clone()).collect())
            .unwrap_or_default()
    }
}

impl Transport for RoomTransport {
    fn join_room(&self, socket: &str, room: &str) {
        if !self.sockets.contains_key(socket) {
            trace!(socket = %socket, room = %room, "Ignoring join for unknown socket");
            return;
        }
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(socket.to_string());
        self.memberships
            .entry(socket.to_string())
            .or_default()
            .insert(room.to_string());
    }

    fn leave_room(&self, socket: &str, room: &str) {
        if let Some(rooms) = self.memberships.get(socket) {
            rooms.remove(room);
        }
        self.remove_from_room(socket, room);
    }

    fn emit_to_room(&self, room: &str, frame: ServerFrame) {
        for socket in self.members_of(room) {
            self.deliver(&socket, frame.clone());
        }
    }

    fn emit_to_room_except(&self, except: &str, room: &str, frame: ServerFrame) {
        for socket in self.members_of(room) {
            if socket != except {
                self.deliver(&socket, frame.clone());
            }
        }
    }

    fn emit_to_socket(&self, socket: &str, frame: ServerFrame) {
        self.deliver(socket, frame);
    }

    fn is_socket_in_room(&self, socket: &str, room: &str) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains(socket))
    }

    fn live_sockets_in_room(&self, room: &str) -> HashSet<SocketId> {
        self.members_of(room).into_iter().collect()
    }

    fn is_connected(&self, socket: &str) -> bool {
        self.sockets.contains_key(socket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(n: u64) -> ServerFrame {
        ServerFrame::broadcast("e", "room", json!(n))
    }

    #[test]
    fn test_socket_ids_are_unique() {
        let a = generate_socket_id();
        let b = generate_socket_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_join_is_set_semantics() {
        let transport = RoomTransport::default();
        let _rx = transport.register("a");

        transport.join_room("a", "room");
        transport.join_room("a", "room");

        assert_eq!(transport.room_size("room"), 1);
        assert_eq!(transport.rooms_of("a"), vec!["room".to_string()]);
        assert!(transport.is_socket_in_room("a", "room"));
    }

    #[tokio::test]
    async fn test_emit_to_room_except() {
        let transport = RoomTransport::default();
        let mut a = transport.register("a");
        let mut b = transport.register("b");
        transport.join_room("a", "room");
        transport.join_room("b", "room");

        transport.emit_to_room_except("a", "room", frame(1));
        transport.emit_to_room("room", frame(2));

        assert_eq!(a.recv().await.unwrap(), frame(2));
        assert_eq!(b.recv().await.unwrap(), frame(1));
        assert_eq!(b.recv().await.unwrap(), frame(2));
        assert!(a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_emit_to_empty_room_is_noop() {
        let transport = RoomTransport::default();
        transport.emit_to_room("nobody", frame(1));
        assert!(transport.room_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_unregister_leaves_all_rooms() {
        let transport = RoomTransport::default();
        let _rx = transport.register("a");
        transport.join_room("a", "one");
        transport.join_room("a", "two");

        transport.unregister("a");

        assert!(!transport.is_connected("a"));
        assert_eq!(transport.room_size("one"), 0);
        assert!(transport.live_sockets_in_room("two").is_empty());
        assert!(transport.room_sizes().is_empty());
        assert_eq!(transport.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_leave_room_drops_empty_room() {
        let transport = RoomTransport::default();
        let _a = transport.register("a");
        let _b = transport.register("b");
        transport.join_room("a", "room");
        transport.join_room("b", "room");

        transport.leave_room("a", "room");
        assert_eq!(transport.room_sizes(), vec![("room".to_string(), 1)]);

        transport.leave_room("b", "room");
        assert!(transport.room_sizes().is_empty());
        assert!(transport.rooms_of("b").is_empty());
    }

    #[tokio::test]
    async fn test_join_for_unknown_socket_is_ignored() {
        let transport = RoomTransport::default();
        transport.join_room("ghost", "room");
        assert_eq!(transport.room_size("room"), 0);
    }

    #[tokio::test]
    async fn test_send_errors() {
        let transport = RoomTransport::new(1);
        assert!(matches!(
            transport.send("ghost", frame(0)),
            Err(TransportError::NotConnected(_))
        ));

        let rx = transport.register("a");
        transport.send("a", frame(1)).unwrap();
        assert!(matches!(
            transport.send("a", frame(2)),
            Err(TransportError::QueueFull(_))
        ));

        drop(rx);
        let _ = transport.register("b");
        assert!(matches!(
            transport.send("b", frame(3)),
            Err(TransportError::ConnectionClosed)
        ));
    }
}
