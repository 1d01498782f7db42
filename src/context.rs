use crate::access::TenantAccessValidator;
use crate::audit::SecurityMonitor;
use crate::auth::AuthManager;
use crate::config::Config;
use crate::rate_limit::RateLimiter;
use crate::registry::ConnectionManager;
use crate::storage::Storage;
use std::sync::Arc;

/// Shared state handed to every connection task and HTTP handler.
/// Cloning is cheap; everything inside is behind an Arc.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub auth: Arc<AuthManager>,
    pub storage: Arc<dyn Storage>,
    pub monitor: Arc<SecurityMonitor>,
    pub validator: Arc<TenantAccessValidator>,
    pub connections: Arc<ConnectionManager>,
    pub limiter: Arc<RateLimiter>,
}
