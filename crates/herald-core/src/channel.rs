//! Channel classification.
//!
//! Channel names are searched for glob patterns anywhere in the name, so
//! `orders.private-1` matches `private-*`. Private
//! channels require an auth round-trip before joining, presence channels
//! additionally track who is connected. Every presence channel is also a
//! private channel.

use regex::Regex;

/// Patterns for channels that require authorization.
pub const PRIVATE_CHANNEL_PATTERNS: &[&str] = &["private-*", "presence-*"];

/// Patterns for events clients may whisper to each other.
pub const CLIENT_EVENT_PATTERNS: &[&str] = &["client-*"];

/// Prefix of presence channel names.
pub const PRESENCE_PREFIX: &str = "presence-";

/// The kind of a channel, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Anyone may join.
    Public,
    /// Joining requires authorization.
    Private,
    /// Private, with member tracking.
    Presence,
}

impl ChannelKind {
    /// Whether joins of this kind must be authorized.
    #[must_use]
    pub fn requires_auth(self) -> bool {
        !matches!(self, ChannelKind::Public)
    }
}

/// Compile a glob pattern (`*` matches any run of characters) into an
/// unanchored regex.
///
/// # Errors
///
/// Returns an error if the resulting expression exceeds regex size limits.
pub fn glob(pattern: &str) -> Result<Regex, regex::Error> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&escaped)
}

/// Classifies channel and event names. Read-only after construction.
#[derive(Debug, Clone)]
pub struct ChannelClassifier {
    private: Vec<Regex>,
    client_events: Vec<Regex>,
}

impl ChannelClassifier {
    /// Create a classifier from glob patterns.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern cannot be compiled.
    pub fn new<P, E>(private_patterns: P, client_event_patterns: E) -> Result<Self, regex::Error>
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let private = private_patterns
            .into_iter()
            .map(|p| glob(p.as_ref()))
            .collect::<Result<_, _>>()?;
        let client_events = client_event_patterns
            .into_iter()
            .map(|p| glob(p.as_ref()))
            .collect::<Result<_, _>>()?;

        Ok(Self {
            private,
            client_events,
        })
    }

    /// Check if a channel requires authorization.
    #[must_use]
    pub fn is_private(&self, channel: &str) -> bool {
        self.is_presence(channel) || self.private.iter().any(|re| re.is_match(channel))
    }

    /// Check if a channel tracks presence.
    #[must_use]
    pub fn is_presence(&self, channel: &str) -> bool {
        channel.starts_with(PRESENCE_PREFIX)
    }

    /// Check if an event name is a client-to-client event.
    #[must_use]
    pub fn is_client_event(&self, event: &str) -> bool {
        self.client_events.iter().any(|re| re.is_match(event))
    }

    /// Classify a channel.
    #[must_use]
    pub fn kind(&self, channel: &str) -> ChannelKind {
        if self.is_presence(channel) {
            ChannelKind::Presence
        } else if self.is_private(channel) {
            ChannelKind::Private
        } else {
            ChannelKind::Public
        }
    }
}
