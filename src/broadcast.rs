// ============================================================================
// Broadcast Router
// ============================================================================
//
// Fans a published event out to the live connections entitled to see
// it. The registry is consulted on every publish; a connection that
// unregistered a moment ago is simply absent from the target set.
//
// Per-target delivery is independent: one slow or rate-limited
// consumer never blocks the rest of the fan-out.

use crate::audit::AuditEvent;
use crate::context::AppContext;
use crate::error::{GatewayError, GatewayResult};
use crate::message::{EventPayload, GatewayEvent, ServerMessage};
use crate::metrics::{EVENTS_DELIVERED_TOTAL, EVENTS_PUBLISHED_TOTAL, RATE_LIMITED_TOTAL};
use crate::rate_limit::LimitClass;
use crate::registry::{CloseReason, ConnectionId, DeliveryTarget, Outbound};
use crate::scope::{with_tenant_scope, TenantScopeMarker};
use crate::storage::TenantRecord;
use crate::tenant::{AccessScope, TenantId};
use serde::{Deserialize, Serialize};

/// Who an event is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Connections admitted into the target tenant only.
    TenantOnly,
    /// Target-tenant connections plus platform-wide operators.
    PlatformWide,
}

/// Result of one publish. A connection can appear in at most one of
/// the lists.
#[derive(Debug, Default, Serialize)]
pub struct PublishOutcome {
    pub event_id: String,
    pub delivered: usize,
    /// Targets skipped by policy (rate limit or scope guard)
    pub skipped: Vec<String>,
    /// Targets whose socket task was gone; they were unregistered
    pub failed: Vec<String>,
}

pub struct BroadcastRouter;

impl BroadcastRouter {
    /// Validates, persists and fans out one event. Persistence happens
    /// under a tenant-restricted scope before any delivery, so an event
    /// that cannot be stored is never seen by a client.
    pub async fn publish(
        ctx: &AppContext,
        actor: &str,
        target_tenant: TenantId,
        visibility: Visibility,
        payload: EventPayload,
    ) -> GatewayResult<PublishOutcome> {
        payload.validate()?;
        let event = GatewayEvent::new(target_tenant, payload);

        let record = TenantRecord::new(
            target_tenant,
            "event",
            serde_json::to_value(&event)?,
        );
        with_tenant_scope(
            ctx.storage.clone(),
            ctx.monitor.clone(),
            TenantScopeMarker::Tenant(target_tenant),
            actor,
            |scope| async move { scope.put_record(record).await },
        )
        .await?;
        EVENTS_PUBLISHED_TOTAL.inc();

        let targets = match visibility {
            Visibility::TenantOnly => ctx.connections.delivery_targets(Some(target_tenant)).await,
            Visibility::PlatformWide => {
                let all = ctx.connections.delivery_targets(None).await;
                all.into_iter()
                    .filter(|t| {
                        t.scope == AccessScope::PlatformWide || t.tenant == Some(target_tenant)
                    })
                    .collect()
            }
        };

        let mut outcome = PublishOutcome {
            event_id: event.event_id.to_string(),
            ..PublishOutcome::default()
        };
        let mut failed: Vec<ConnectionId> = Vec::new();

        for target in targets {
            if !Self::entitled(&target, target_tenant, visibility) {
                // Should be unreachable given the target selection
                // above; treated as an isolation incident, not a panic.
                let audit = AuditEvent::isolation_violation(
                    &target.user_id,
                    Some(target_tenant),
                    "delivery target outside event tenant",
                );
                if let Err(e) = ctx.monitor.record(audit) {
                    e.log();
                }
                outcome.skipped.push(target.id.to_string());
                continue;
            }

            let key = format!("msg:{}", target.id);
            let decision = ctx.limiter.check(&key, LimitClass::MessageRate).await;
            if !decision.allowed {
                RATE_LIMITED_TOTAL.inc();
                let audit = AuditEvent::rate_limit_violation(
                    &target.user_id,
                    target.tenant,
                    LimitClass::MessageRate.as_str(),
                    &key,
                );
                if let Err(e) = ctx.monitor.record(audit) {
                    e.log();
                }
                tracing::debug!(connection_id = %target.id, "Delivery skipped: rate limited");
                outcome.skipped.push(target.id.to_string());
                continue;
            }

            let frame = ServerMessage::Event(event.clone());
            if target.sender.send(Outbound::Frame(frame)).is_ok() {
                EVENTS_DELIVERED_TOTAL.inc();
                outcome.delivered += 1;
            } else {
                outcome.failed.push(target.id.to_string());
                failed.push(target.id);
            }
        }

        // Dead socket tasks leave the registry here; unregister is
        // idempotent if their own cleanup got there first.
        for id in failed {
            ctx.connections.unregister(id, CloseReason::DeliveryFailed).await;
        }

        tracing::info!(
            event_id = %outcome.event_id,
            kind = event.payload.kind(),
            delivered = outcome.delivered,
            skipped = outcome.skipped.len(),
            failed = outcome.failed.len(),
            "Event published"
        );
        Ok(outcome)
    }

    fn entitled(target: &DeliveryTarget, event_tenant: TenantId, visibility: Visibility) -> bool {
        match visibility {
            Visibility::TenantOnly => target.tenant == Some(event_tenant),
            Visibility::PlatformWide => {
                target.scope == AccessScope::PlatformWide || target.tenant == Some(event_tenant)
            }
        }
    }
}

/// Publish request accepted on the HTTP control surface.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub target_tenant: String,
    pub visibility: Visibility,
    #[serde(flatten)]
    pub event: EventPayload,
}

impl PublishRequest {
    pub fn target(&self) -> GatewayResult<TenantId> {
        self.target_tenant
            .parse()
            .map_err(|_| GatewayError::validation("target_tenant is not a valid tenant id"))
    }
}
