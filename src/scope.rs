// ============================================================================
// Isolation Context Propagator
// ============================================================================
//
// Every unit of backend work runs under an explicit tenant-scope marker.
// The storage handle only exists inside `with_tenant_scope`, so storage
// cannot be reached without an active marker — absence is
// unrepresentable rather than checked. The storage layer re-validates
// the marker on every operation regardless of what the calling code
// intended (storage.rs).
//
// Platform-wide operators run under an explicit Unrestricted sentinel,
// never an omitted check, and each unrestricted unit of work is audited
// as a privileged action.

use crate::audit::{AuditEvent, SecurityMonitor};
use crate::error::{GatewayError, GatewayResult};
use crate::storage::{Storage, StorageError, TenantRecord};
use crate::tenant::TenantId;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// The active tenant scope for a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantScopeMarker {
    /// Restricted to one tenant's rows.
    Tenant(TenantId),
    /// Explicit cross-tenant sentinel for platform-wide operators.
    Unrestricted,
}

impl fmt::Display for TenantScopeMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantScopeMarker::Tenant(id) => write!(f, "tenant:{}", id),
            TenantScopeMarker::Unrestricted => write!(f, "unrestricted"),
        }
    }
}

/// Storage handle bound to an active marker. Only constructed by
/// `with_tenant_scope`; dropped on every exit path, which clears the
/// active scope.
pub struct TenantScope {
    marker: TenantScopeMarker,
    actor: String,
    storage: Arc<dyn Storage>,
    monitor: Arc<SecurityMonitor>,
}

impl TenantScope {
    pub fn marker(&self) -> TenantScopeMarker {
        self.marker
    }

    pub async fn put_record(&self, record: TenantRecord) -> GatewayResult<()> {
        let record_tenant = record.tenant;
        match self.storage.put_record(&self.marker, record).await {
            Ok(()) => Ok(()),
            Err(StorageError::IsolationViolation(detail)) => {
                Err(self.raise_violation(Some(record_tenant), &detail))
            }
            Err(e) => Err(GatewayError::storage(e.to_string())),
        }
    }

    pub async fn fetch_records(&self, kind: &str) -> GatewayResult<Vec<TenantRecord>> {
        match self.storage.fetch_records(&self.marker, kind).await {
            Ok(records) => Ok(records),
            Err(StorageError::IsolationViolation(detail)) => {
                Err(self.raise_violation(None, &detail))
            }
            Err(e) => Err(GatewayError::storage(e.to_string())),
        }
    }

    /// Isolation violations are fatal for the unit of work: audited at
    /// critical severity, then surfaced as an error. The correct tenant
    /// is never guessed.
    fn raise_violation(&self, tenant: Option<TenantId>, detail: &str) -> GatewayError {
        let audit = AuditEvent::isolation_violation(self.actor.clone(), tenant, detail);
        if let Err(e) = self.monitor.record(audit) {
            tracing::error!(error = %e, "Failed to audit isolation violation");
        }
        GatewayError::isolation(detail.to_string())
    }
}

impl Drop for TenantScope {
    fn drop(&mut self) {
        tracing::trace!(marker = %self.marker, "tenant scope cleared");
    }
}

/// Runs `f` with an active tenant-scope marker. The marker is set for
/// the duration of the closure and cleared on every exit path (success,
/// error, cancellation). Unrestricted units of work are audited as
/// privileged actions before they run.
pub async fn with_tenant_scope<T, Fut>(
    storage: Arc<dyn Storage>,
    monitor: Arc<SecurityMonitor>,
    marker: TenantScopeMarker,
    actor: impl Into<String>,
    f: impl FnOnce(TenantScope) -> Fut,
) -> GatewayResult<T>
where
    Fut: Future<Output = GatewayResult<T>>,
{
    let actor = actor.into();

    if marker == TenantScopeMarker::Unrestricted {
        monitor.record(AuditEvent::privileged_action(
            actor.clone(),
            None,
            "unrestricted_storage_scope",
            serde_json::json!({}),
        ))?;
    }

    tracing::trace!(marker = %marker, "tenant scope active");
    let scope = TenantScope {
        marker,
        actor,
        storage,
        monitor,
    };
    f(scope).await
}
