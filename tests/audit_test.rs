mod test_utils;

use async_trait::async_trait;
use brigade_gateway::audit::{AuditEvent, AuditKind, SecurityMonitor};
use brigade_gateway::error::GatewayError;
use brigade_gateway::scope::TenantScopeMarker;
use brigade_gateway::storage::{Storage, StorageError, TenantRecord};
use std::sync::Arc;
use std::time::Duration;
use test_utils::{gateway, wait_for_audit};

/// Storage whose audit sink never completes. Stalls the writer task so
/// the monitor queue can be filled deterministically.
struct StalledStorage;

#[async_trait]
impl Storage for StalledStorage {
    async fn put_record(
        &self,
        _marker: &TenantScopeMarker,
        _record: TenantRecord,
    ) -> Result<(), StorageError> {
        Ok(())
    }

    async fn fetch_records(
        &self,
        _marker: &TenantScopeMarker,
        _kind: &str,
    ) -> Result<Vec<TenantRecord>, StorageError> {
        Ok(Vec::new())
    }

    async fn append_audit(&self, _event: &AuditEvent) -> Result<(), StorageError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

fn probe_event(n: usize) -> AuditEvent {
    AuditEvent::admission_denied(
        format!("probe-{}", n),
        "invalid_credential",
        serde_json::json!({}),
    )
}

#[tokio::test]
async fn test_full_queue_surfaces_backpressure_instead_of_dropping() {
    let (monitor, _writer) = SecurityMonitor::start(Arc::new(StalledStorage), 2);

    // The writer pulls one event and stalls; two more fill the queue.
    monitor.record(probe_event(0)).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    monitor.record(probe_event(1)).unwrap();
    monitor.record(probe_event(2)).unwrap();

    let overflow = monitor.record(probe_event(3));
    assert!(matches!(overflow, Err(GatewayError::AuditBackpressure)));
}

#[tokio::test]
async fn test_audit_events_serialize_with_kind_and_actor() {
    let event = AuditEvent::cross_tenant_attempt(
        "staff-1",
        "0b0b0b0b-0b0b-0b0b-0b0b-0b0b0b0b0b0b",
        &["0a0a0a0a-0a0a-0a0a-0a0a-0a0a0a0a0a0a".to_string()],
    );
    let json: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
    assert_eq!(json["kind"], "CROSS_TENANT_ATTEMPT");
    assert_eq!(json["severity"], "WARNING");
    assert_eq!(json["actor"], "staff-1");
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_trail_preserves_event_order() {
    let gw = gateway();

    for n in 0..5 {
        gw.ctx.monitor.record(probe_event(n)).unwrap();
    }

    let events = wait_for_audit(&gw.storage, 5).await;
    let actors: Vec<&str> = events.iter().map(|e| e.actor.as_str()).collect();
    assert_eq!(actors, vec!["probe-0", "probe-1", "probe-2", "probe-3", "probe-4"]);
    assert!(events.iter().all(|e| e.kind == AuditKind::AdmissionDenied));
}
