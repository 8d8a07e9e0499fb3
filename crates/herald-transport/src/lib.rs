//! # herald-transport
//!
//! Room-based socket transport for the Herald broadcast bridge.
//!
//! Each connected socket owns an outbound frame queue. Rooms are sets of
//! sockets named after channels; emitting to a room enqueues a frame on
//! every member's queue. The connection handler drains its socket's queue
//! onto the wire.
//!
//! ```rust,ignore
//! use herald_transport::RoomTransport;
//!
//! let transport = RoomTransport::new(256);
//! let id = herald_transport::generate_socket_id();
//! let mut outbound = transport.register(&id);
//! while let Some(frame) = outbound.recv().await {
//!     // Write frame to the socket
//! }
//! ```

pub mod rooms;

pub use rooms::{generate_socket_id, RoomTransport, TransportError};
