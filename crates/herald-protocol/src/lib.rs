//! # herald-protocol
//!
//! Wire protocol definitions for the Herald broadcast bridge.
//!
//! This crate defines the messages exchanged between Herald and its
//! WebSocket clients, and the member records shared with presence channels.
//!
//! ## Frames
//!
//! - [`ClientFrame`] - `subscribe`, `unsubscribe` and `client event` requests
//! - [`ServerFrame`] - an event name plus positional arguments, e.g.
//!   `presence:joining` with `[channel, member]`
//!
//! ## Example
//!
//! ```rust
//! use herald_protocol::{codec, ClientFrame};
//!
//! let text = r#"{"event":"subscribe","data":{"channel":"presence-lobby"}}"#;
//! let frame: ClientFrame = codec::decode_text(text).unwrap();
//! assert_eq!(frame.name(), "subscribe");
//! ```

pub mod codec;
pub mod frames;
pub mod member;

pub use codec::{decode, decode_text, encode, encode_text, ProtocolError};
pub use frames::{
    events, AuthOptions, ClientEventData, ClientFrame, ServerFrame, SubscribeData,
    UnsubscribeData,
};
pub use member::{unique, Member, UniqueOrder};

/// Protocol version announced in the `connected` frame.
pub const PROTOCOL_VERSION: &str = "1.0";
