use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a single restaurant ("tenant"). All isolation decisions
/// key off this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a tenant identifier from its string form.
    /// Anything that is not a well-formed UUID is rejected; partial or
    /// prefix matches are never accepted.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TenantId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Effective access scope resolved at admission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessScope {
    /// Restricted to exactly one tenant.
    TenantScoped,
    /// Privileged cross-tenant scope for platform operators.
    PlatformWide,
}

impl AccessScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessScope::TenantScoped => "tenant_scoped",
            AccessScope::PlatformWide => "platform_wide",
        }
    }
}

/// What kind of client is on the other end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    PosTerminal,
    KitchenDisplay,
    ManagementConsole,
    Dashboard,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::PosTerminal => "pos_terminal",
            ConnectionType::KitchenDisplay => "kitchen_display",
            ConnectionType::ManagementConsole => "management_console",
            ConnectionType::Dashboard => "dashboard",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_id_rejects_malformed_input() {
        assert!(TenantId::parse("not-a-uuid").is_err());
        assert!(TenantId::parse("").is_err());
        // Truncated UUID must not resolve to anything
        let id = TenantId::new().to_string();
        assert!(TenantId::parse(&id[..8]).is_err());
    }

    #[test]
    fn test_tenant_id_round_trips_through_string() {
        let id = TenantId::new();
        assert_eq!(TenantId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_connection_type_serde_uses_snake_case() {
        let json = serde_json::to_string(&ConnectionType::KitchenDisplay).unwrap();
        assert_eq!(json, "\"kitchen_display\"");
    }
}
