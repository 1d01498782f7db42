// ============================================================================
// Admission Pipeline
// ============================================================================
//
// Runs the post-handshake checks for a fresh socket, in a fixed order:
// credential and tenant validation, then the concurrent-connection
// gate, then registration. The attempt quota has already been checked
// by the accept loop before the Hello frame was read.

use crate::access::{AccessDecision, DenialReason, GrantedAccess};
use crate::audit::AuditEvent;
use crate::context::AppContext;
use crate::error::GatewayResult;
use crate::metrics::ADMISSIONS_DENIED_TOTAL;
use crate::registry::{ConnectionId, Outbound};
use crate::tenant::ConnectionType;
use tokio::sync::mpsc;

pub enum AdmissionOutcome {
    Admitted {
        id: ConnectionId,
        granted: GrantedAccess,
    },
    Refused(DenialReason),
}

/// Validates the Hello credential and registers the connection. Err
/// means the pipeline itself failed (audit back-pressure, storage), not
/// that the client was refused.
pub async fn admit(
    ctx: &AppContext,
    token: &str,
    requested_tenant: Option<&str>,
    connection_type: ConnectionType,
    source: &str,
    sender: mpsc::UnboundedSender<Outbound>,
) -> GatewayResult<AdmissionOutcome> {
    let granted = match ctx
        .validator
        .validate(token, requested_tenant, connection_type, source)
        .await?
    {
        AccessDecision::Granted(granted) => granted,
        AccessDecision::Denied(reason) => {
            ADMISSIONS_DENIED_TOTAL.inc();
            return Ok(AdmissionOutcome::Refused(reason));
        }
    };

    // Count and insert are atomic, so parallel admissions for one user
    // cannot race past the cap.
    let registered = ctx
        .connections
        .register_if_under(
            &granted.user_id,
            ctx.config.limits.max_concurrent_per_user,
            granted.tenant,
            granted.scope,
            connection_type,
            sender,
        )
        .await;

    let Some(id) = registered else {
        ADMISSIONS_DENIED_TOTAL.inc();
        let audit = AuditEvent::admission_denied(
            &granted.user_id,
            DenialReason::ConnectionLimit.code(),
            serde_json::json!({
                "max_concurrent": ctx.config.limits.max_concurrent_per_user,
                "connection_type": connection_type.as_str(),
                "source": source,
            }),
        );
        ctx.monitor.record(audit)?;
        return Ok(AdmissionOutcome::Refused(DenialReason::ConnectionLimit));
    };

    Ok(AdmissionOutcome::Admitted { id, granted })
}
