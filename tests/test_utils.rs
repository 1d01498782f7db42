#![allow(dead_code)]

use brigade_gateway::access::TenantAccessValidator;
use brigade_gateway::audit::{AuditEvent, SecurityMonitor};
use brigade_gateway::auth::AuthManager;
use brigade_gateway::config::{Config, LimitsConfig, LoggingConfig};
use brigade_gateway::context::AppContext;
use brigade_gateway::rate_limit::{MemoryCounterStore, RateLimiter};
use brigade_gateway::registry::ConnectionManager;
use brigade_gateway::storage::MemoryStorage;
use std::sync::Arc;
use std::time::Duration;

pub const TENANT_A: &str = "0a0a0a0a-0a0a-0a0a-0a0a-0a0a0a0a0a0a";
pub const TENANT_B: &str = "0b0b0b0b-0b0b-0b0b-0b0b-0b0b0b0b0b0b";

pub fn test_config() -> Config {
    Config {
        port: 0,
        http_port: 0,
        redis_url: "redis://localhost:6379".to_string(),
        jwt_secret: Some("test-secret-must-not-ship".to_string()),
        jwt_public_key: None,
        jwt_issuer: "brigade-auth".to_string(),
        platform_roles: vec!["platform_operator".to_string()],
        hello_deadline_secs: 2,
        heartbeat_interval_secs: 20,
        heartbeat_max_missed: 3,
        audit_queue_capacity: 256,
        limits: LimitsConfig::default(),
        logging: LoggingConfig::default(),
    }
}

pub struct TestGateway {
    pub ctx: AppContext,
    pub storage: Arc<MemoryStorage>,
}

pub fn gateway() -> TestGateway {
    gateway_with_limits(LimitsConfig::default())
}

pub fn gateway_with_limits(limits: LimitsConfig) -> TestGateway {
    let mut config = test_config();
    config.limits = limits.clone();
    let config = Arc::new(config);

    let auth = Arc::new(AuthManager::new(&config).unwrap());
    let storage = Arc::new(MemoryStorage::new());
    let (monitor, _writer) = SecurityMonitor::start(storage.clone(), config.audit_queue_capacity);
    let validator = Arc::new(TenantAccessValidator::new(
        auth.clone(),
        monitor.clone(),
        config.platform_roles.clone(),
        config.logging.hash_salt.clone(),
    ));
    let connections = Arc::new(ConnectionManager::new(monitor.clone()));
    let limiter = Arc::new(RateLimiter::new(Arc::new(MemoryCounterStore::new()), limits));

    TestGateway {
        ctx: AppContext {
            config,
            auth,
            storage: storage.clone(),
            monitor,
            validator,
            connections,
            limiter,
        },
        storage,
    }
}

pub fn token(gw: &TestGateway, user: &str, role: &str, tenants: &[&str]) -> String {
    let tenants: Vec<String> = tenants.iter().map(|t| t.to_string()).collect();
    gw.ctx.auth.create_token(user, role, &tenants).unwrap()
}

/// Waits until the audit writer has drained at least `count` events into
/// storage. The writer task is asynchronous, so tests poll briefly.
pub async fn wait_for_audit(storage: &MemoryStorage, count: usize) -> Vec<AuditEvent> {
    for _ in 0..200 {
        let events = storage.audit_events().await;
        if events.len() >= count {
            return events;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "audit trail never reached {} events: {:?}",
        count,
        storage.audit_events().await
    );
}
