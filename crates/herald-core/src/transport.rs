//! The room facility the core needs from the socket layer.

use herald_protocol::ServerFrame;
use std::collections::HashSet;

use crate::socket::SocketId;

/// Room-based delivery exposed by the WebSocket layer.
///
/// A room corresponds 1:1 with a channel name. Room membership has set
/// semantics: joining twice is the same as joining once. Emitting to an
/// empty or unknown room is a no-op.
///
/// Implementations must be cheap and non-blocking; emission only enqueues.
pub trait Transport: Send + Sync {
    /// Add a socket to a room.
    fn join_room(&self, socket: &str, room: &str);

    /// Remove a socket from a room.
    fn leave_room(&self, socket: &str, room: &str);

    /// Deliver a frame to every socket in a room.
    fn emit_to_room(&self, room: &str, frame: ServerFrame);

    /// Deliver a frame to every socket in a room except one.
    fn emit_to_room_except(&self, except: &str, room: &str, frame: ServerFrame);

    /// Deliver a frame to a single socket.
    fn emit_to_socket(&self, socket: &str, frame: ServerFrame);

    /// Check if a socket is currently in a room.
    fn is_socket_in_room(&self, socket: &str, room: &str) -> bool;

    /// The sockets currently in a room.
    fn live_sockets_in_room(&self, room: &str) -> HashSet<SocketId>;

    /// Check if a socket is still connected.
    fn is_connected(&self, socket: &str) -> bool;
}
