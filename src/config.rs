// ============================================================================
// Gateway Configuration
// ============================================================================
//
// All configuration comes from environment variables with sensible
// defaults for development. Rate limit thresholds are policy, not
// constants; see LimitsConfig.

mod limits;
mod logging;

pub use limits::LimitsConfig;
pub use logging::LoggingConfig;

use anyhow::Result;

#[derive(Clone, Debug)]
pub struct Config {
    /// WebSocket listener port
    pub port: u16,
    /// Internal HTTP listener port (health, metrics, publish API)
    pub http_port: u16,
    /// Redis URL for the shared rate-limit counter store
    pub redis_url: String,

    /// Symmetric secret for HS256 token verification (and signing, in
    /// full mode)
    pub jwt_secret: Option<String>,
    /// RSA public key PEM for RS256 verify-only mode
    pub jwt_public_key: Option<String>,
    /// Expected issuer claim (the external authentication service)
    pub jwt_issuer: String,

    /// Roles granted platform-wide scope
    pub platform_roles: Vec<String>,

    /// Seconds a freshly accepted socket has to send its hello frame
    pub hello_deadline_secs: u64,
    /// Seconds between server heartbeat pings
    pub heartbeat_interval_secs: u64,
    /// Consecutive missed heartbeats before a connection is closed
    pub heartbeat_max_missed: u32,

    /// Audit queue depth before record() signals back-pressure
    pub audit_queue_capacity: usize,

    pub limits: LimitsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let jwt_secret = std::env::var("JWT_SECRET").ok().filter(|s| !s.is_empty());
        let jwt_public_key = std::env::var("JWT_PUBLIC_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty());

        if jwt_secret.is_none() && jwt_public_key.is_none() {
            anyhow::bail!(
                "No JWT configuration provided. Set either:\n\
                - JWT_PUBLIC_KEY (for RS256 verify-only mode)\n\
                - JWT_SECRET (for HS256 mode)"
            );
        }

        Ok(Self {
            port: env_parse("GATEWAY_PORT", 8080),
            http_port: env_parse("GATEWAY_HTTP_PORT", 9090),
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            jwt_secret,
            jwt_public_key,
            jwt_issuer: std::env::var("JWT_ISSUER")
                .unwrap_or_else(|_| "brigade-auth".to_string()),
            platform_roles: std::env::var("PLATFORM_ROLES")
                .map(|s| {
                    s.split(',')
                        .map(|r| r.trim().to_string())
                        .filter(|r| !r.is_empty())
                        .collect()
                })
                .unwrap_or_else(|_| vec!["platform_operator".to_string()]),
            hello_deadline_secs: env_parse("HELLO_DEADLINE_SECS", 10),
            heartbeat_interval_secs: env_parse("HEARTBEAT_INTERVAL_SECS", 20),
            heartbeat_max_missed: env_parse("HEARTBEAT_MAX_MISSED", 3),
            audit_queue_capacity: env_parse("AUDIT_QUEUE_CAPACITY", 4096),
            limits: LimitsConfig::from_env(),
            logging: LoggingConfig::from_env(),
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for name in [
            "JWT_SECRET",
            "JWT_PUBLIC_KEY",
            "GATEWAY_PORT",
            "PLATFORM_ROLES",
            "MAX_CONNECTION_ATTEMPTS_PER_MINUTE",
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_requires_jwt_configuration() {
        clear_env();
        assert!(Config::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        std::env::set_var("JWT_SECRET", "test-secret");
        let config = Config::from_env().unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.http_port, 9090);
        assert_eq!(config.platform_roles, vec!["platform_operator".to_string()]);
        assert_eq!(config.limits.connection_attempts_per_minute, 500);
        assert_eq!(config.limits.max_concurrent_per_user, 5);
        std::env::remove_var("JWT_SECRET");
    }

    #[test]
    #[serial]
    fn test_platform_roles_parse_as_comma_separated_list() {
        clear_env();
        std::env::set_var("JWT_SECRET", "test-secret");
        std::env::set_var("PLATFORM_ROLES", "platform_operator, support_admin");
        let config = Config::from_env().unwrap();
        assert_eq!(
            config.platform_roles,
            vec!["platform_operator".to_string(), "support_admin".to_string()]
        );
        std::env::remove_var("JWT_SECRET");
        std::env::remove_var("PLATFORM_ROLES");
    }
}
