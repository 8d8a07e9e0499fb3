//! Connected socket context.

use std::collections::HashMap;

/// Transport-assigned socket identifier.
pub type SocketId = String;

/// A connected socket as seen by the core: its id and the headers of the
/// request that opened it.
#[derive(Debug, Clone, Default)]
pub struct Socket {
    id: SocketId,
    /// Handshake headers, keyed by lowercase name.
    headers: HashMap<String, String>,
}

impl Socket {
    /// Create a socket context without headers.
    #[must_use]
    pub fn new(id: impl Into<SocketId>) -> Self {
        Self {
            id: id.into(),
            headers: HashMap::new(),
        }
    }

    /// Record a handshake header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Get the socket id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Look up a handshake header, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// The page that opened the socket.
    #[must_use]
    pub fn referer(&self) -> Option<&str> {
        self.header("referer")
    }

    /// The cookies sent with the handshake.
    #[must_use]
    pub fn cookie(&self) -> Option<&str> {
        self.header("cookie")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let socket = Socket::new("s-1")
            .with_header("Referer", "https://app.test/home")
            .with_header("COOKIE", "session=abc");

        assert_eq!(socket.id(), "s-1");
        assert_eq!(socket.referer(), Some("https://app.test/home"));
        assert_eq!(socket.header("cookie"), Some("session=abc"));
        assert_eq!(socket.header("x-missing"), None);
    }

    #[test]
    fn test_empty_header_is_absent() {
        let socket = Socket::new("s-1").with_header("cookie", "");
        assert_eq!(socket.cookie(), None);
    }
}
