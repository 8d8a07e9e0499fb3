//! Channel router for Herald.
//!
//! The router handles socket requests: joining and leaving channels and
//! relaying client events. Private channel joins are authorized first;
//! presence channel joins additionally register the member. Failures never
//! escape to the connection handler: they become a `subscription_error`
//! frame or a silent drop.

use herald_protocol::{ClientEventData, ServerFrame, SubscribeData, UniqueOrder};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::auth::{AuthClient, AuthConfig, PrivateChannelAuthorizer};
use crate::channel::{ChannelClassifier, ChannelKind, CLIENT_EVENT_PATTERNS, PRIVATE_CHANNEL_PATTERNS};
use crate::presence::PresenceRegistry;
use crate::socket::Socket;
use crate::store::KeyValueStore;
use crate::transport::Transport;

/// Code sent when a presence registration fails after authorization.
pub const PRESENCE_FAILURE: u16 = 500;

/// Code sent when a join arrives during shutdown.
pub const SHUTTING_DOWN: u16 = 503;

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// A channel or event pattern failed to compile.
    #[error("Invalid channel pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Authorizer settings.
    pub auth: AuthConfig,
    /// Glob patterns of channels that require authorization.
    pub private_patterns: Vec<String>,
    /// Glob patterns of events clients may send each other.
    pub client_event_patterns: Vec<String>,
    /// Which entry per user presence rosters keep.
    pub unique_order: UniqueOrder,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            private_patterns: PRIVATE_CHANNEL_PATTERNS.iter().map(ToString::to_string).collect(),
            client_event_patterns: CLIENT_EVENT_PATTERNS.iter().map(ToString::to_string).collect(),
            unique_order: UniqueOrder::Latest,
        }
    }
}

/// Why a socket left a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// The client asked to unsubscribe.
    Unsubscribed,
    /// The socket disconnected.
    Disconnected,
}

impl fmt::Display for LeaveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaveReason::Unsubscribed => f.write_str("unsubscribed"),
            LeaveReason::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Result of a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The request named no channel.
    Ignored,
    /// The socket is now in the channel's room.
    Joined(ChannelKind),
    /// The socket was sent a `subscription_error` with this code.
    Rejected {
        /// Status code sent to the client.
        code: u16,
    },
}

/// Routes socket requests to the authorizer, the presence registry and
/// the transport.
pub struct ChannelRouter {
    classifier: ChannelClassifier,
    authorizer: PrivateChannelAuthorizer,
    presence: Arc<PresenceRegistry>,
    transport: Arc<dyn Transport>,
    closed: AtomicBool,
}

impl ChannelRouter {
    /// Create a router.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured pattern is invalid.
    pub fn new(
        config: RouterConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
        auth_client: Arc<dyn AuthClient>,
    ) -> Result<Self, RouterError> {
        let classifier =
            ChannelClassifier::new(&config.private_patterns, &config.client_event_patterns)?;
        let presence = Arc::new(
            PresenceRegistry::new(store, transport.clone()).with_order(config.unique_order),
        );

        info!(
            auth_hosts = ?config.auth.hosts,
            auth_endpoint = %config.auth.endpoint,
            "Creating channel router"
        );

        Ok(Self {
            classifier,
            authorizer: PrivateChannelAuthorizer::new(auth_client, config.auth),
            presence,
            transport,
            closed: AtomicBool::new(false),
        })
    }

    /// Get the channel classifier.
    #[must_use]
    pub fn classifier(&self) -> &ChannelClassifier {
        &self.classifier
    }

    /// Get the presence registry.
    #[must_use]
    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    /// Stop accepting joins. Later joins are answered with 503.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Channel router closed");
        }
    }

    /// Check if the router stopped accepting joins.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Check if a socket is in a channel's room.
    #[must_use]
    pub fn is_in_channel(&self, socket_id: &str, channel: &str) -> bool {
        self.transport.is_socket_in_room(socket_id, channel)
    }

    /// Join a socket to a channel.
    ///
    /// Private and presence channels are authorized on every request; a
    /// socket already in the room stays there once.
    pub async fn join(&self, socket: &Socket, data: &SubscribeData) -> JoinOutcome {
        let channel = data.channel.as_str();
        if channel.is_empty() {
            return JoinOutcome::Ignored;
        }

        if self.is_closed() {
            return self.reject(socket.id(), channel, SHUTTING_DOWN);
        }

        let kind = self.classifier.kind(channel);

        let decision = if kind.requires_auth() {
            match self.authorizer.authenticate(socket, data).await {
                Ok(decision) => Some(decision),
                Err(e) => {
                    debug!(socket = %socket.id(), channel = %channel, error = %e, "Authorization failed");
                    return self.reject(socket.id(), channel, e.status_code());
                }
            }
        } else {
            None
        };

        let already_joined = self.transport.is_socket_in_room(socket.id(), channel);
        self.transport.join_room(socket.id(), channel);

        if kind == ChannelKind::Presence {
            let member = decision.and_then(|d| d.into_member());
            if let Err(e) = self.presence.join(socket.id(), channel, member).await {
                warn!(socket = %socket.id(), channel = %channel, error = %e, "Presence join failed");
                // An earlier successful join keeps its membership.
                if !already_joined {
                    self.transport.leave_room(socket.id(), channel);
                }
                return self.reject(socket.id(), channel, PRESENCE_FAILURE);
            }
        }

        self.on_join(socket.id(), channel, kind);
        JoinOutcome::Joined(kind)
    }

    fn on_join(&self, socket_id: &str, channel: &str, kind: ChannelKind) {
        debug!(socket = %socket_id, channel = %channel, ?kind, "Joined channel");
    }

    fn reject(&self, socket_id: &str, channel: &str, code: u16) -> JoinOutcome {
        warn!(socket = %socket_id, channel = %channel, code, "Subscription rejected");
        self.transport
            .emit_to_socket(socket_id, ServerFrame::subscription_error(channel, code));
        JoinOutcome::Rejected { code }
    }

    /// Remove a socket from a channel.
    ///
    /// Presence bookkeeping runs first, while the socket is still in the
    /// room. Presence failures are logged; the room is left regardless.
    pub async fn leave(&self, socket_id: &str, channel: &str, reason: LeaveReason) {
        if channel.is_empty() {
            return;
        }

        if self.classifier.is_presence(channel) {
            if let Err(e) = self.presence.leave(socket_id, channel).await {
                warn!(socket = %socket_id, channel = %channel, error = %e, "Presence leave failed");
            }
        }

        self.transport.leave_room(socket_id, channel);
        debug!(socket = %socket_id, channel = %channel, %reason, "Left channel");
    }

    /// Leave every channel a disconnecting socket was in.
    pub async fn disconnect<I>(&self, socket_id: &str, channels: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        for channel in channels {
            self.leave(socket_id, channel.as_ref(), LeaveReason::Disconnected)
                .await;
        }
    }

    /// Relay a client event to the rest of the channel.
    ///
    /// Only client events on private channels the socket has joined are
    /// relayed; anything else is dropped. Returns whether the event was
    /// relayed.
    pub fn client_event(&self, socket_id: &str, data: &ClientEventData) -> bool {
        let allowed = self.classifier.is_client_event(&data.event)
            && self.classifier.is_private(&data.channel)
            && self.is_in_channel(socket_id, &data.channel);

        if !allowed {
            trace!(socket = %socket_id, channel = %data.channel, event = %data.event, "Dropped client event");
            return false;
        }

        self.transport.emit_to_room_except(
            socket_id,
            &data.channel,
            ServerFrame::broadcast(data.event.clone(), &data.channel, data.data.clone()),
        );
        true
    }
}
