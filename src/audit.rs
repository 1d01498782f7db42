// ============================================================================
// Security Monitor - Append-Only Audit Trail
// ============================================================================
//
// Every admission decision, rate-limit violation and cross-tenant access
// lands here as an immutable AuditEvent. Events flow through a bounded
// queue into the storage collaborator; when the queue is full the caller
// gets an explicit back-pressure error instead of silent loss.
//
// Audit events carry identifiers and decision metadata only. Raw
// credentials never enter this module.

use crate::error::{GatewayError, GatewayResult};
use crate::metrics;
use crate::storage::Storage;
use crate::tenant::TenantId;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const ANONYMOUS_ACTOR: &str = "anonymous";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditKind {
    AdmissionGranted,
    AdmissionDenied,
    CrossTenantAttempt,
    RateLimitViolation,
    ConnectionClosed,
    PrivilegedAction,
    IsolationViolation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
}

/// Immutable audit record. Never mutated or deleted by the gateway;
/// retention and rotation belong to the storage collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event timestamp (RFC3339)
    pub timestamp: String,
    pub kind: AuditKind,
    pub severity: AuditSeverity,
    /// User identifier, or "anonymous" for pre-auth events
    pub actor: String,
    /// Tenant the event concerns; None for cross-tenant or pre-auth events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<TenantId>,
    /// Structured decision metadata (violated limit, requested vs.
    /// resolved tenant, close reason, ...)
    pub metadata: serde_json::Value,
}

impl AuditEvent {
    pub fn new(
        kind: AuditKind,
        severity: AuditSeverity,
        actor: impl Into<String>,
        tenant: Option<TenantId>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            kind,
            severity,
            actor: actor.into(),
            tenant,
            metadata,
        }
    }

    pub fn admission_granted(
        actor: impl Into<String>,
        tenant: Option<TenantId>,
        metadata: serde_json::Value,
    ) -> Self {
        Self::new(
            AuditKind::AdmissionGranted,
            AuditSeverity::Info,
            actor,
            tenant,
            metadata,
        )
    }

    pub fn admission_denied(
        actor: impl Into<String>,
        reason_code: &str,
        metadata: serde_json::Value,
    ) -> Self {
        let mut metadata = metadata;
        if let Some(map) = metadata.as_object_mut() {
            map.insert(
                "denial_reason".to_string(),
                serde_json::Value::String(reason_code.to_string()),
            );
        }
        Self::new(
            AuditKind::AdmissionDenied,
            AuditSeverity::Warning,
            actor,
            None,
            metadata,
        )
    }

    pub fn cross_tenant_attempt(
        actor: impl Into<String>,
        requested: &str,
        resolved: &[String],
    ) -> Self {
        Self::new(
            AuditKind::CrossTenantAttempt,
            AuditSeverity::Warning,
            actor,
            None,
            serde_json::json!({
                "denial_reason": "tenant_mismatch",
                "requested": requested,
                "resolved": resolved,
            }),
        )
    }

    pub fn rate_limit_violation(
        actor: impl Into<String>,
        tenant: Option<TenantId>,
        limit_class: &str,
        key: &str,
    ) -> Self {
        Self::new(
            AuditKind::RateLimitViolation,
            AuditSeverity::Warning,
            actor,
            tenant,
            serde_json::json!({
                "limit_class": limit_class,
                "key": key,
            }),
        )
    }

    pub fn connection_closed(
        actor: impl Into<String>,
        tenant: Option<TenantId>,
        connection_id: &str,
        reason: &str,
    ) -> Self {
        Self::new(
            AuditKind::ConnectionClosed,
            AuditSeverity::Info,
            actor,
            tenant,
            serde_json::json!({
                "connection_id": connection_id,
                "reason": reason,
            }),
        )
    }

    pub fn privileged_action(
        actor: impl Into<String>,
        tenant: Option<TenantId>,
        action: &str,
        metadata: serde_json::Value,
    ) -> Self {
        let mut metadata = metadata;
        if let Some(map) = metadata.as_object_mut() {
            map.insert(
                "action".to_string(),
                serde_json::Value::String(action.to_string()),
            );
        }
        Self::new(
            AuditKind::PrivilegedAction,
            AuditSeverity::Warning,
            actor,
            tenant,
            metadata,
        )
    }

    pub fn isolation_violation(
        actor: impl Into<String>,
        tenant: Option<TenantId>,
        detail: &str,
    ) -> Self {
        Self::new(
            AuditKind::IsolationViolation,
            AuditSeverity::Critical,
            actor,
            tenant,
            serde_json::json!({ "detail": detail }),
        )
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Audit sink shared by every other component. Components depend on the
/// monitor; the monitor depends on nobody but the storage collaborator.
pub struct SecurityMonitor {
    tx: mpsc::Sender<AuditEvent>,
}

impl SecurityMonitor {
    /// Starts the monitor and its writer task. The writer appends each
    /// event through the storage collaborator and mirrors it to the
    /// `audit` tracing target for log aggregation.
    pub fn start(storage: Arc<dyn Storage>, capacity: usize) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<AuditEvent>(capacity);

        let writer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                tracing::info!(
                    target: "audit",
                    kind = ?event.kind,
                    severity = ?event.severity,
                    actor = %event.actor,
                    tenant = ?event.tenant,
                    timestamp = %event.timestamp,
                    json = %event.to_json(),
                    "AUDIT: security event"
                );

                if let Err(e) = storage.append_audit(&event).await {
                    // The event is already in the log stream above; losing
                    // the durable copy is loud, not silent.
                    tracing::error!(
                        error = %e,
                        kind = ?event.kind,
                        "Failed to append audit event to storage"
                    );
                }
            }
        });

        (Arc::new(Self { tx }), writer)
    }

    /// The sink is healthy while its writer task is alive and draining.
    pub fn is_healthy(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Records an audit event. Fire-and-forget on the happy path; when
    /// the queue is full the caller receives `AuditBackpressure` and must
    /// decide what its operation does without its audit record.
    pub fn record(&self, event: AuditEvent) -> GatewayResult<()> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(event)) => {
                metrics::AUDIT_OVERFLOW_TOTAL.inc();
                tracing::error!(
                    kind = ?event.kind,
                    "Audit queue full - signaling back-pressure to caller"
                );
                Err(GatewayError::AuditBackpressure)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(GatewayError::internal("audit writer has shut down"))
            }
        }
    }
}
