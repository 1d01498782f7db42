/// Logging configuration.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Salt for hashed identifiers in log output
    pub hash_salt: String,
}

impl LoggingConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            hash_salt: std::env::var("LOG_HASH_SALT")
                .unwrap_or_else(|_| "brigade-dev-salt".to_string()),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            hash_salt: "brigade-dev-salt".to_string(),
        }
    }
}
