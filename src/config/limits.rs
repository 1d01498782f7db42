/// Rate limiting policy.
///
/// Thresholds are per limit class and configurable; the defaults are
/// tuned for a mid-size restaurant fleet. The window for attempt and
/// message classes is one minute.
#[derive(Clone, Debug)]
pub struct LimitsConfig {
    /// Connection attempts per source IP per minute
    pub connection_attempts_per_minute: u64,
    /// Concurrent admitted connections per user
    pub max_concurrent_per_user: usize,
    /// Outbound events per connection per minute
    pub messages_per_connection_per_minute: u64,
    /// Maximum frame payload in bytes
    pub max_payload_bytes: usize,
    /// Malformed frames tolerated before the connection is dropped
    pub max_parse_errors: u32,
}

impl LimitsConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            connection_attempts_per_minute: std::env::var("MAX_CONNECTION_ATTEMPTS_PER_MINUTE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            max_concurrent_per_user: std::env::var("MAX_CONNECTIONS_PER_USER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            messages_per_connection_per_minute: std::env::var("MAX_MESSAGES_PER_CONNECTION_PER_MINUTE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(600),
            max_payload_bytes: std::env::var("MAX_PAYLOAD_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(64 * 1024),
            max_parse_errors: std::env::var("MAX_PARSE_ERRORS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            connection_attempts_per_minute: 500,
            max_concurrent_per_user: 5,
            messages_per_connection_per_minute: 600,
            max_payload_bytes: 64 * 1024,
            max_parse_errors: 10,
        }
    }
}
