//! Presence channel members.
//!
//! A member is one connected instance of a user in a presence channel. The
//! same user may appear several times (one entry per open socket), so
//! rosters shown to clients are collapsed with [`unique`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One socket's presence in a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    /// Socket that registered this entry. Empty on `presence:leaving`.
    #[serde(default)]
    pub socket_id: String,
    /// Application user identifier.
    pub user_id: u64,
    /// Opaque user metadata returned by the auth endpoint.
    #[serde(default)]
    pub user_info: serde_json::Value,
}

impl Member {
    /// Create a member for a user with no metadata.
    #[must_use]
    pub fn new(user_id: u64) -> Self {
        Self {
            socket_id: String::new(),
            user_id,
            user_info: serde_json::Value::Null,
        }
    }

    /// Attach user metadata.
    #[must_use]
    pub fn with_info(mut self, info: serde_json::Value) -> Self {
        self.user_info = info;
        self
    }

    /// Bind the entry to a socket.
    #[must_use]
    pub fn with_socket(mut self, socket_id: impl Into<String>) -> Self {
        self.socket_id = socket_id.into();
        self
    }
}

/// Which occurrence of a user survives deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UniqueOrder {
    /// Keep the earliest entry for each user.
    #[default]
    First,
    /// Keep the most recent entry for each user.
    Latest,
}

/// Reduce a member list to one entry per `user_id`.
///
/// Surviving entries keep their relative order from `members`.
#[must_use]
pub fn unique(members: &[Member], order: UniqueOrder) -> Vec<Member> {
    let mut seen = HashSet::with_capacity(members.len());

    match order {
        UniqueOrder::First => members
            .iter()
            .filter(|m| seen.insert(m.user_id))
            .cloned()
            .collect(),
        UniqueOrder::Latest => {
            let mut result: Vec<Member> = members
                .iter()
                .rev()
                .filter(|m| seen.insert(m.user_id))
                .cloned()
                .collect();
            result.reverse();
            result
        }
    }
}
