//! Event sources feeding the broadcast dispatcher.

pub mod http;
pub mod redis;

pub use self::redis::RedisSubscriber;

/// Remove the application's key prefix from a channel name.
#[must_use]
pub fn strip_prefix<'a>(prefix: &str, channel: &'a str) -> &'a str {
    if prefix.is_empty() {
        return channel;
    }
    channel.strip_prefix(prefix).unwrap_or(channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_prefix("", "orders"), "orders");
        assert_eq!(strip_prefix("app_", "app_orders"), "orders");
        assert_eq!(strip_prefix("app_", "orders"), "orders");
    }
}
