//! Presence tracking for Herald.
//!
//! Each presence channel keeps a list of members (one entry per socket, so a
//! user with two tabs open appears twice) under `"<channel>:members"` in the
//! key-value store. Every read prunes the list against the sockets the
//! transport still has in the room and writes the result back, repairing
//! entries left behind by sockets that vanished without leaving.
//!
//! Join and leave are read-modify-write sequences on the stored list and are
//! serialized per channel.

use dashmap::DashMap;
use herald_protocol::{unique, Member, ServerFrame, UniqueOrder};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace, warn};

use crate::store::{KeyValueStore, StoreError};
use crate::transport::Transport;

/// Presence errors.
#[derive(Debug, Error)]
pub enum PresenceError {
    /// The auth response carried no `channel_data` for a presence channel.
    #[error("Presence member data missing")]
    MissingMemberData,

    /// Reading or writing the member list failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Store key of a channel's member list.
#[must_use]
pub fn members_key(channel: &str) -> String {
    format!("{channel}:members")
}

type ChannelLocks = DashMap<String, Arc<Mutex<()>>>;

/// Exclusive hold on one channel. The lock entry is reclaimed on drop when
/// nobody else is waiting for it.
struct ChannelLock<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a ChannelLocks,
    channel: String,
}

impl Drop for ChannelLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.channel, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Tracks who is connected to each presence channel.
pub struct PresenceRegistry {
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn Transport>,
    locks: ChannelLocks,
    order: UniqueOrder,
}

impl PresenceRegistry {
    /// Create a registry. Rosters keep the most recent entry per user.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            transport,
            locks: DashMap::new(),
            order: UniqueOrder::Latest,
        }
    }

    /// Choose which entry per user is shown in `presence:subscribed`.
    #[must_use]
    pub fn with_order(mut self, order: UniqueOrder) -> Self {
        self.order = order;
        self
    }

    /// Number of channels with a pending or held lock.
    #[must_use]
    pub fn locked_channels(&self) -> usize {
        self.locks.len()
    }

    async fn lock(&self, channel: &str) -> ChannelLock<'_> {
        let mutex = self
            .locks
            .entry(channel.to_string())
            .or_default()
            .value()
            .clone();
        let guard = mutex.lock_owned().await;
        ChannelLock {
            guard: Some(guard),
            locks: &self.locks,
            channel: channel.to_string(),
        }
    }

    async fn load_members(&self, channel: &str) -> Result<Vec<Member>, StoreError> {
        match self.store.get(&members_key(channel)).await? {
            None => Ok(Vec::new()),
            Some(raw) if raw.is_empty() || raw.as_slice() == b"null" => Ok(Vec::new()),
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
        }
    }

    async fn save_members(&self, channel: &str, members: &[Member]) -> Result<(), StoreError> {
        let raw = serde_json::to_vec(members)?;
        self.store.set(&members_key(channel), raw).await
    }

    /// Drop members whose socket is no longer in the room and persist the
    /// result. A failed write-back is logged and the pruned list is still
    /// returned.
    async fn remove_inactive(&self, channel: &str, members: Vec<Member>) -> Vec<Member> {
        let live = self.transport.live_sockets_in_room(channel);
        let total = members.len();
        let active: Vec<Member> = members
            .into_iter()
            .filter(|m| live.contains(&m.socket_id))
            .collect();

        if active.len() != total {
            trace!(channel = %channel, pruned = total - active.len(), "Pruned inactive members");
            if let Err(e) = self.save_members(channel, &active).await {
                warn!(channel = %channel, error = %e, "Failed to persist pruned members");
            }
        }

        active
    }

    async fn live_members(&self, channel: &str) -> Result<Vec<Member>, StoreError> {
        let members = self.load_members(channel).await?;
        Ok(self.remove_inactive(channel, members).await)
    }

    /// Members whose sockets are still connected, one entry per socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored list can't be read.
    pub async fn get_members(&self, channel: &str) -> Result<Vec<Member>, PresenceError> {
        let _lock = self.lock(channel).await;
        Ok(self.live_members(channel).await?)
    }

    /// Check if a user has at least one live socket in a channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored list can't be read.
    pub async fn is_member(&self, channel: &str, user_id: u64) -> Result<bool, PresenceError> {
        let members = self.get_members(channel).await?;
        Ok(members.iter().any(|m| m.user_id == user_id))
    }

    /// Register a socket as a member of a presence channel.
    ///
    /// The socket must already be in the channel's room. It receives the
    /// deduplicated roster; the rest of the room is told about the user
    /// only if this is the user's first live socket in the channel.
    ///
    /// # Errors
    ///
    /// Fails without emitting anything if `member` is `None` or the store
    /// can't be read or written.
    pub async fn join(
        &self,
        socket_id: &str,
        channel: &str,
        member: Option<Member>,
    ) -> Result<Member, PresenceError> {
        let member = member
            .ok_or(PresenceError::MissingMemberData)?
            .with_socket(socket_id);

        let _lock = self.lock(channel).await;

        let mut members = self.live_members(channel).await?;
        let was_member = members.iter().any(|m| m.user_id == member.user_id);

        members.retain(|m| m.socket_id != socket_id);
        members.push(member.clone());
        self.save_members(channel, &members).await?;

        self.transport.emit_to_socket(
            socket_id,
            ServerFrame::presence_subscribed(channel, &unique(&members, self.order)),
        );

        if !was_member {
            self.transport.emit_to_room_except(
                socket_id,
                channel,
                ServerFrame::presence_joining(channel, &member),
            );
        }

        debug!(
            socket = %socket_id,
            channel = %channel,
            user_id = member.user_id,
            first = !was_member,
            "Presence: member joined"
        );

        Ok(member)
    }

    /// Remove a socket's entry from a presence channel.
    ///
    /// The room is told the user left only if no other live socket of the
    /// same user remains. Returns the removed member, or `None` if the
    /// socket had no entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the store can't be read or written.
    pub async fn leave(
        &self,
        socket_id: &str,
        channel: &str,
    ) -> Result<Option<Member>, PresenceError> {
        let _lock = self.lock(channel).await;

        let members = self.load_members(channel).await?;
        let (removed, rest): (Vec<Member>, Vec<Member>) =
            members.into_iter().partition(|m| m.socket_id == socket_id);

        let Some(mut member) = removed.into_iter().next() else {
            return Ok(None);
        };

        self.save_members(channel, &rest).await?;

        let remaining = self.remove_inactive(channel, rest).await;
        let still_present = remaining.iter().any(|m| m.user_id == member.user_id);

        if !still_present {
            member.socket_id.clear();
            self.transport
                .emit_to_room(channel, ServerFrame::presence_leaving(channel, &member));
        }

        debug!(
            socket = %socket_id,
            channel = %channel,
            user_id = member.user_id,
            last = !still_present,
            "Presence: member left"
        );

        Ok(Some(member))
    }
}
