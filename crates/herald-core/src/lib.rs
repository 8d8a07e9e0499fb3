//! # herald-core
//!
//! Channel routing, private channel authorization and presence tracking for
//! the Herald broadcast bridge.
//!
//! - **Channel** - classify channel names as public, private or presence
//! - **Router** - join/leave/client events for sockets
//! - **Auth** - delegate private channel joins to the application
//! - **Presence** - per-channel member lists persisted in a key-value store
//! - **Dispatcher** - fan ingested application events out to rooms
//!
//! ## Architecture
//!
//! ```text
//!  subscribe ──▶ ┌─────────────┐   private   ┌────────────┐
//!                │   Router    │ ──────────▶ │ Authorizer │ ──▶ AuthClient
//!                └─────────────┘             └────────────┘
//!                       │ presence
//!                       ▼
//!                ┌─────────────┐            ┌──────────────┐
//!                │  Presence   │ ─────────▶ │ KeyValueStore│
//!                └─────────────┘            └──────────────┘
//!                       │
//!  http / redis ──▶ Dispatcher ──▶ Transport (rooms)
//! ```
//!
//! The transport, the store and the auth HTTP client are collaborators
//! expressed as traits; the server crate supplies the implementations.

pub mod auth;
pub mod channel;
pub mod dispatcher;
pub mod message;
pub mod presence;
pub mod router;
pub mod socket;
pub mod store;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use auth::{
    AuthClient, AuthConfig, AuthDecision, AuthError, AuthPayload, AuthRequest, AuthResponse,
    Hosts, PrivateChannelAuthorizer,
};
pub use channel::{ChannelClassifier, ChannelKind};
pub use dispatcher::{
    event_queue, BroadcastDispatcher, Delivery, DispatchError, EventReceiver, EventSink,
};
pub use message::{EventMessage, IngestSource};
pub use presence::{PresenceError, PresenceRegistry};
pub use router::{ChannelRouter, JoinOutcome, LeaveReason, RouterConfig, RouterError};
pub use socket::{Socket, SocketId};
pub use store::{KeyValueStore, MemoryStore, StoreError};
pub use transport::Transport;
