use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Gateway error taxonomy.
///
/// Admission and isolation errors are never silently swallowed; each one
/// produces exactly one audit record at the point it is raised. Transport
/// errors stay local to the connection that caused them.
#[derive(Error, Debug)]
pub enum GatewayError {
    // ===== Admission errors =====
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    // ===== Rate limit errors =====
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    // ===== Isolation violations =====
    #[error("Tenant isolation violation: {0}")]
    IsolationViolation(String),

    // ===== Collaborator errors =====
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    // ===== Serialization & transport =====
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Audit sink =====
    #[error("Audit queue is full")]
    AuditBackpressure,

    // ===== Configuration =====
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Machine-readable code for programmatic error handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::Auth(_) => "invalid_credential",
            GatewayError::Jwt(_) => "invalid_credential",
            GatewayError::Validation(_) => "validation_error",
            GatewayError::RateLimited(_) => "rate_limited",
            GatewayError::IsolationViolation(_) => "isolation_violation",
            GatewayError::Storage(_) => "storage_error",
            GatewayError::Redis(_) => "counter_store_error",
            GatewayError::Json(_) => "serialization_error",
            GatewayError::Io(_) => "io_error",
            GatewayError::AuditBackpressure => "audit_backpressure",
            GatewayError::Config(_) => "config_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    /// User-facing message. Never leaks internal state or other tenants'
    /// identifiers; denied clients get a reason code and nothing else.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::Auth(_) | GatewayError::Jwt(_) => {
                "Invalid or expired credential".to_string()
            }
            GatewayError::Validation(msg) => format!("Validation error: {}", msg),
            GatewayError::RateLimited(msg) => format!("Rate limit exceeded: {}", msg),
            GatewayError::IsolationViolation(_) => "Request rejected".to_string(),
            GatewayError::AuditBackpressure => "Service busy, try again".to_string(),
            _ => "Internal server error".to_string(),
        }
    }

    /// Log this error at the level its severity calls for.
    pub fn log(&self) {
        let code = self.error_code();
        match self {
            GatewayError::IsolationViolation(_) => {
                tracing::error!(error = %self, error_code = %code, "Isolation violation")
            }
            GatewayError::Auth(_) | GatewayError::Jwt(_) => {
                tracing::warn!(error = %self, error_code = %code, "Authentication failed")
            }
            GatewayError::RateLimited(_) | GatewayError::Validation(_) => {
                tracing::debug!(error = %self, error_code = %code, "Client error")
            }
            _ => tracing::error!(error = %self, error_code = %code, "Server error"),
        }
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        GatewayError::Auth(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        GatewayError::Validation(msg.into())
    }

    pub fn isolation(msg: impl Into<String>) -> Self {
        GatewayError::IsolationViolation(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        GatewayError::Storage(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        GatewayError::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        GatewayError::Internal(msg.into())
    }
}
