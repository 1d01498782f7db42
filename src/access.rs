// ============================================================================
// Tenant Access Validator
// ============================================================================
//
// Decides, for one connection attempt, whether the presented credential
// grants access to the requested tenant, and with what scope. Every
// call produces exactly one audit event, grant or denial; if the audit
// queue is full the decision itself fails, so an unauditable admission
// never happens.

use crate::audit::{AuditEvent, SecurityMonitor, ANONYMOUS_ACTOR};
use crate::auth::AuthManager;
use crate::error::GatewayResult;
use crate::tenant::{AccessScope, ConnectionType, TenantId};
use crate::utils::log_safe_id;
use std::sync::Arc;

/// Why an admission was refused. The code is what the client sees; the
/// message never carries tenant internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    InvalidCredential,
    TenantMismatch,
    NoTenantMembership,
    InvalidTenant,
    RateLimited,
    ConnectionLimit,
}

impl DenialReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::InvalidCredential => "invalid_credential",
            DenialReason::TenantMismatch => "tenant_mismatch",
            DenialReason::NoTenantMembership => "no_tenant_membership",
            DenialReason::InvalidTenant => "invalid_tenant",
            DenialReason::RateLimited => "rate_limited",
            DenialReason::ConnectionLimit => "connection_limit",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            DenialReason::InvalidCredential => "Credential is invalid or expired",
            DenialReason::TenantMismatch => "Credential does not grant access to this tenant",
            DenialReason::NoTenantMembership => "Credential carries no tenant membership",
            DenialReason::InvalidTenant => "Requested tenant identifier is not valid",
            DenialReason::RateLimited => "Too many connection attempts",
            DenialReason::ConnectionLimit => "Concurrent connection limit reached",
        }
    }
}

/// A successful admission decision.
#[derive(Debug, Clone)]
pub struct GrantedAccess {
    pub user_id: String,
    pub role: String,
    pub scope: AccessScope,
    /// Tenant the connection was admitted into. None only for
    /// platform-wide operators that did not pin a tenant.
    pub tenant: Option<TenantId>,
}

#[derive(Debug, Clone)]
pub enum AccessDecision {
    Granted(GrantedAccess),
    Denied(DenialReason),
}

pub struct TenantAccessValidator {
    auth: Arc<AuthManager>,
    monitor: Arc<SecurityMonitor>,
    platform_roles: Vec<String>,
    hash_salt: String,
}

impl TenantAccessValidator {
    pub fn new(
        auth: Arc<AuthManager>,
        monitor: Arc<SecurityMonitor>,
        platform_roles: Vec<String>,
        hash_salt: String,
    ) -> Self {
        Self {
            auth,
            monitor,
            platform_roles,
            hash_salt,
        }
    }

    /// Validates one connection attempt. Returns Ok(decision) for both
    /// grants and denials; Err only when the decision could not be
    /// audited or recorded.
    pub async fn validate(
        &self,
        token: &str,
        requested_tenant: Option<&str>,
        connection_type: ConnectionType,
        source: &str,
    ) -> GatewayResult<AccessDecision> {
        let claims = match self.auth.verify_token(token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!(source = %source, error = %e, "Credential rejected");
                return self.deny(
                    ANONYMOUS_ACTOR,
                    DenialReason::InvalidCredential,
                    connection_type,
                    source,
                );
            }
        };

        let actor = claims.sub.clone();
        tracing::debug!(
            user = %log_safe_id(&actor, &self.hash_salt),
            role = %claims.role,
            "Credential verified"
        );

        if self.platform_roles.iter().any(|r| *r == claims.role) {
            return self.validate_platform(&claims.role, &actor, requested_tenant, connection_type, source);
        }

        // Tenant-scoped path: membership comes from the credential, not
        // from anything the client asserts.
        if claims.tenants.is_empty() {
            return self.deny(
                &actor,
                DenialReason::NoTenantMembership,
                connection_type,
                source,
            );
        }

        // A tenant-scoped identity must name its tenant explicitly. A
        // missing, partial or malformed id is a hard denial; the gateway
        // never infers a tenant on the caller's behalf.
        let Some(raw) = requested_tenant else {
            return self.deny(&actor, DenialReason::InvalidTenant, connection_type, source);
        };
        let resolved = match raw.parse::<TenantId>() {
            Ok(tenant) => {
                if !claims.tenants.iter().any(|t| t == raw) {
                    let audit = AuditEvent::cross_tenant_attempt(&actor, raw, &claims.tenants);
                    self.monitor.record(audit)?;
                    return Ok(AccessDecision::Denied(DenialReason::TenantMismatch));
                }
                tenant
            }
            Err(_) => {
                return self.deny(&actor, DenialReason::InvalidTenant, connection_type, source)
            }
        };

        let audit = AuditEvent::admission_granted(
            &actor,
            Some(resolved),
            serde_json::json!({
                "scope": AccessScope::TenantScoped.as_str(),
                "connection_type": connection_type.as_str(),
                "source": source,
            }),
        );
        self.monitor.record(audit)?;

        Ok(AccessDecision::Granted(GrantedAccess {
            user_id: actor,
            role: claims.role,
            scope: AccessScope::TenantScoped,
            tenant: Some(resolved),
        }))
    }

    /// Platform operators are granted platform-wide scope regardless of
    /// the requested tenant. The request is still recorded; a well-formed
    /// tenant id additionally pins the connection to that tenant.
    fn validate_platform(
        &self,
        role: &str,
        actor: &str,
        requested_tenant: Option<&str>,
        connection_type: ConnectionType,
        source: &str,
    ) -> GatewayResult<AccessDecision> {
        let tenant = requested_tenant.and_then(|raw| raw.parse::<TenantId>().ok());

        let audit = AuditEvent::admission_granted(
            actor,
            tenant,
            serde_json::json!({
                "scope": AccessScope::PlatformWide.as_str(),
                "role": role,
                "requested_tenant": requested_tenant,
                "connection_type": connection_type.as_str(),
                "source": source,
            }),
        );
        self.monitor.record(audit)?;

        Ok(AccessDecision::Granted(GrantedAccess {
            user_id: actor.to_string(),
            role: role.to_string(),
            scope: AccessScope::PlatformWide,
            tenant,
        }))
    }

    fn deny(
        &self,
        actor: &str,
        reason: DenialReason,
        connection_type: ConnectionType,
        source: &str,
    ) -> GatewayResult<AccessDecision> {
        let audit = AuditEvent::admission_denied(
            actor,
            reason.code(),
            serde_json::json!({
                "connection_type": connection_type.as_str(),
                "source": source,
            }),
        );
        self.monitor.record(audit)?;
        Ok(AccessDecision::Denied(reason))
    }
}
