mod test_utils;

use brigade_gateway::audit::AuditKind;
use brigade_gateway::broadcast::{BroadcastRouter, Visibility};
use brigade_gateway::config::LimitsConfig;
use brigade_gateway::message::{EventPayload, ServerMessage};
use brigade_gateway::registry::{ConnectionId, Outbound};
use brigade_gateway::scope::{with_tenant_scope, TenantScopeMarker};
use brigade_gateway::tenant::{AccessScope, ConnectionType, TenantId};
use test_utils::{gateway, gateway_with_limits, wait_for_audit, TestGateway, TENANT_A, TENANT_B};
use tokio::sync::mpsc;

fn tenant(raw: &str) -> TenantId {
    raw.parse().unwrap()
}

fn order_payload() -> EventPayload {
    EventPayload::OrderCreated {
        order_id: "o-100".to_string(),
        table: Some("12".to_string()),
        total_cents: 4250,
    }
}

async fn connect(
    gw: &TestGateway,
    user: &str,
    t: Option<TenantId>,
    scope: AccessScope,
) -> (ConnectionId, mpsc::UnboundedReceiver<Outbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = gw
        .ctx
        .connections
        .register(user, t, scope, ConnectionType::PosTerminal, tx)
        .await;
    (id, rx)
}

fn expect_event(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> brigade_gateway::message::GatewayEvent {
    match rx.try_recv() {
        Ok(Outbound::Frame(ServerMessage::Event(event))) => event,
        other => panic!("expected event frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_tenant_only_event_never_crosses_tenants() {
    let gw = gateway();
    let a = tenant(TENANT_A);
    let b = tenant(TENANT_B);

    let (_, mut rx_a1) = connect(&gw, "a1", Some(a), AccessScope::TenantScoped).await;
    let (_, mut rx_a2) = connect(&gw, "a2", Some(a), AccessScope::TenantScoped).await;
    let (_, mut rx_b) = connect(&gw, "b1", Some(b), AccessScope::TenantScoped).await;

    let outcome = BroadcastRouter::publish(
        &gw.ctx,
        "order-service",
        a,
        Visibility::TenantOnly,
        order_payload(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.delivered, 2);
    assert!(outcome.skipped.is_empty());
    assert!(outcome.failed.is_empty());

    assert_eq!(expect_event(&mut rx_a1).tenant, a);
    assert_eq!(expect_event(&mut rx_a2).tenant, a);
    assert!(rx_b.try_recv().is_err(), "tenant B must not see A's event");
}

#[tokio::test]
async fn test_platform_wide_event_reaches_operators() {
    let gw = gateway();
    let a = tenant(TENANT_A);
    let b = tenant(TENANT_B);

    let (_, mut rx_a) = connect(&gw, "a1", Some(a), AccessScope::TenantScoped).await;
    let (_, mut rx_b) = connect(&gw, "b1", Some(b), AccessScope::TenantScoped).await;
    let (_, mut rx_ops) = connect(&gw, "ops", None, AccessScope::PlatformWide).await;

    let outcome = BroadcastRouter::publish(
        &gw.ctx,
        "order-service",
        a,
        Visibility::PlatformWide,
        order_payload(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.delivered, 2);
    expect_event(&mut rx_a);
    expect_event(&mut rx_ops);
    assert!(
        rx_b.try_recv().is_err(),
        "other tenants stay excluded even from platform-wide events"
    );
}

#[tokio::test]
async fn test_published_event_is_persisted_under_target_tenant() {
    let gw = gateway();
    let a = tenant(TENANT_A);
    let _ = connect(&gw, "a1", Some(a), AccessScope::TenantScoped).await;

    BroadcastRouter::publish(
        &gw.ctx,
        "order-service",
        a,
        Visibility::TenantOnly,
        order_payload(),
    )
    .await
    .unwrap();

    let rows = with_tenant_scope(
        gw.ctx.storage.clone(),
        gw.ctx.monitor.clone(),
        TenantScopeMarker::Tenant(a),
        "reader",
        |scope| async move { scope.fetch_records("event").await },
    )
    .await
    .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].tenant, a);
    assert_eq!(rows[0].payload["kind"], "order_created");
}

#[tokio::test]
async fn test_rate_limited_target_is_skipped_and_audited() {
    let gw = gateway_with_limits(LimitsConfig {
        messages_per_connection_per_minute: 1,
        ..LimitsConfig::default()
    });
    let a = tenant(TENANT_A);
    let (id, mut rx) = connect(&gw, "a1", Some(a), AccessScope::TenantScoped).await;

    let first = BroadcastRouter::publish(
        &gw.ctx,
        "order-service",
        a,
        Visibility::TenantOnly,
        order_payload(),
    )
    .await
    .unwrap();
    assert_eq!(first.delivered, 1);

    let second = BroadcastRouter::publish(
        &gw.ctx,
        "order-service",
        a,
        Visibility::TenantOnly,
        order_payload(),
    )
    .await
    .unwrap();
    assert_eq!(second.delivered, 0);
    assert_eq!(second.skipped, vec![id.to_string()]);

    // One frame only; the second publish was suppressed for this target
    expect_event(&mut rx);
    assert!(rx.try_recv().is_err());

    let events = wait_for_audit(&gw.storage, 1).await;
    assert!(events
        .iter()
        .any(|e| e.kind == AuditKind::RateLimitViolation
            && e.metadata["limit_class"] == "message_rate"));
}

#[tokio::test]
async fn test_dead_connection_is_unregistered_on_delivery_failure() {
    let gw = gateway();
    let a = tenant(TENANT_A);
    let (id, rx) = connect(&gw, "a1", Some(a), AccessScope::TenantScoped).await;
    drop(rx); // socket task gone

    let outcome = BroadcastRouter::publish(
        &gw.ctx,
        "order-service",
        a,
        Visibility::TenantOnly,
        order_payload(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.delivered, 0);
    assert_eq!(outcome.failed, vec![id.to_string()]);
    assert_eq!(gw.ctx.connections.active_count().await, 0);
}

#[tokio::test]
async fn test_invalid_payload_is_rejected_before_persistence() {
    let gw = gateway();
    let a = tenant(TENANT_A);

    let result = BroadcastRouter::publish(
        &gw.ctx,
        "order-service",
        a,
        Visibility::TenantOnly,
        EventPayload::OrderCreated {
            order_id: String::new(),
            table: None,
            total_cents: 100,
        },
    )
    .await;
    assert!(result.is_err());

    let rows = with_tenant_scope(
        gw.ctx.storage.clone(),
        gw.ctx.monitor.clone(),
        TenantScopeMarker::Tenant(a),
        "reader",
        |scope| async move { scope.fetch_records("event").await },
    )
    .await
    .unwrap();
    assert!(rows.is_empty());
}
