// ============================================================================
// Rate Limiter
// ============================================================================
//
// Fixed-window counters per key, held in a shared Redis store so limits
// hold across gateway instances. Counters are incremented atomically
// with a Lua INCR+EXPIRE script.
//
// Failure policy when the shared store is unreachable (an explicit
// availability/security trade-off, see DESIGN.md):
// - connection-attempt checks fail CLOSED: new connections are denied
// - message-rate checks for already-admitted connections fail OPEN onto
//   per-process fallback counters, so a store blip does not drop live
//   sessions
//
// Payload-size checks are synchronous and never consume the message-rate
// budget; "too big" and "too frequent" stay distinct. Concurrent
// connections are counted from the local connection registry.

use crate::config::LimitsConfig;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

const WINDOW: Duration = Duration::from_secs(60);

/// Limit classes. Only `ConnectionAttempt` and `MessageRate` are
/// window-counted through `RateLimiter::check`; `ConcurrentConnections`
/// is enforced atomically by the connection registry and `PayloadSize`
/// by the synchronous `check_payload_size` gate. The latter two exist
/// here for audit and metric labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitClass {
    ConnectionAttempt,
    ConcurrentConnections,
    MessageRate,
    PayloadSize,
}

impl LimitClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitClass::ConnectionAttempt => "connection_attempt",
            LimitClass::ConcurrentConnections => "concurrent_connections",
            LimitClass::MessageRate => "message_rate",
            LimitClass::PayloadSize => "payload_size",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    /// How long until the window resets. Zero when allowed.
    pub retry_after: Duration,
}

impl RateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
        }
    }

    fn deny(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after,
        }
    }
}

#[derive(Error, Debug)]
pub enum CounterError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Shared counter store backing the window counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increments the counter for `key`, starting a new
    /// window of the given length on first increment. Returns the count
    /// inside the current window.
    async fn incr_window(&self, key: &str, window: Duration) -> Result<u64, CounterError>;

    /// Time left until the current window for `key` resets.
    async fn window_remaining(&self, key: &str, window: Duration)
        -> Result<Duration, CounterError>;

    /// Liveness probe for the health endpoint.
    async fn ping(&self) -> Result<(), CounterError>;
}

/// Redis-backed counter store. INCR and EXPIRE run as one atomic Lua
/// script so the window TTL is only set on the first increment.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
}

impl RedisCounterStore {
    pub async fn connect(url: &str) -> Result<Self, CounterError> {
        let client =
            redis::Client::open(url).map_err(|e| CounterError::Unavailable(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CounterError::Unavailable(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr_window(&self, key: &str, window: Duration) -> Result<u64, CounterError> {
        let full_key = format!("rate:{}", key);
        let script = redis::Script::new(
            r"
            local count = redis.call('INCR', KEYS[1])
            if count == 1 then
                redis.call('EXPIRE', KEYS[1], ARGV[1])
            end
            return count
            ",
        );

        let mut conn = self.conn.clone();
        script
            .key(&full_key)
            .arg(window.as_secs())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CounterError::Unavailable(e.to_string()))
    }

    async fn window_remaining(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<Duration, CounterError> {
        let full_key = format!("rate:{}", key);
        let mut conn = self.conn.clone();
        let ttl: i64 = redis::cmd("TTL")
            .arg(&full_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CounterError::Unavailable(e.to_string()))?;
        if ttl > 0 {
            Ok(Duration::from_secs(ttl as u64))
        } else {
            Ok(window)
        }
    }

    async fn ping(&self) -> Result<(), CounterError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CounterError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

struct Window {
    count: u64,
    started: Instant,
    length: Duration,
}

/// In-process fixed-window counters. The fail-open fallback for
/// message-rate checks, and the store the integration tests run on.
#[derive(Default)]
pub struct MemoryCounterStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr_window(&self, key: &str, window: Duration) -> Result<u64, CounterError> {
        let mut windows = self.windows.lock().expect("counter lock poisoned");

        // Expired keys pile up under churn; sweep opportunistically.
        if windows.len() > 10_000 {
            windows.retain(|_, w| w.started.elapsed() < w.length);
        }

        let entry = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            started: Instant::now(),
            length: window,
        });
        if entry.started.elapsed() >= entry.length {
            entry.count = 0;
            entry.started = Instant::now();
            entry.length = window;
        }
        entry.count += 1;
        Ok(entry.count)
    }

    async fn window_remaining(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<Duration, CounterError> {
        let windows = self.windows.lock().expect("counter lock poisoned");
        Ok(windows
            .get(key)
            .map(|w| w.length.saturating_sub(w.started.elapsed()))
            .unwrap_or(window))
    }

    async fn ping(&self) -> Result<(), CounterError> {
        Ok(())
    }
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    fallback: MemoryCounterStore,
    limits: LimitsConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, limits: LimitsConfig) -> Self {
        Self {
            store,
            fallback: MemoryCounterStore::new(),
            limits,
        }
    }

    /// Window-counter check for the given limit class. Keys are expected
    /// to be namespaced by the caller, e.g. `attempt:10.1.2.3` or
    /// `msg:<connection_id>`.
    ///
    /// Payload-size and concurrent-connection classes have no window
    /// counter; see the `LimitClass` docs for where they are enforced.
    pub async fn check(&self, key: &str, class: LimitClass) -> RateDecision {
        match class {
            LimitClass::ConnectionAttempt => {
                self.check_window_fail_closed(key, self.limits.connection_attempts_per_minute)
                    .await
            }
            LimitClass::MessageRate => {
                self.check_window_fail_open(key, self.limits.messages_per_connection_per_minute)
                    .await
            }
            LimitClass::ConcurrentConnections | LimitClass::PayloadSize => {
                debug_assert!(false, "{} has no window counter", class.as_str());
                tracing::debug!(class = class.as_str(), "class has no window counter");
                RateDecision::allow()
            }
        }
    }

    /// Synchronous size gate. Oversized payloads are rejected without
    /// touching the message-rate counter.
    pub fn check_payload_size(&self, len: usize) -> bool {
        len <= self.limits.max_payload_bytes
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.limits.max_payload_bytes
    }

    async fn check_window_fail_closed(&self, key: &str, limit: u64) -> RateDecision {
        match self.store.incr_window(key, WINDOW).await {
            Ok(count) if count <= limit => RateDecision::allow(),
            Ok(_) => RateDecision::deny(self.retry_after(key).await),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    key = %key,
                    "Counter store unavailable - denying connection attempt (fail closed)"
                );
                RateDecision::deny(WINDOW)
            }
        }
    }

    async fn check_window_fail_open(&self, key: &str, limit: u64) -> RateDecision {
        let count = match self.store.incr_window(key, WINDOW).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    key = %key,
                    "Counter store unavailable - using local fallback counter (fail open)"
                );
                self.fallback
                    .incr_window(key, WINDOW)
                    .await
                    .unwrap_or(1)
            }
        };
        if count <= limit {
            RateDecision::allow()
        } else {
            RateDecision::deny(self.retry_after(key).await)
        }
    }

    /// Liveness of the shared counter store, for the health endpoint.
    pub async fn store_healthy(&self) -> bool {
        self.store.ping().await.is_ok()
    }

    async fn retry_after(&self, key: &str) -> Duration {
        self.store
            .window_remaining(key, WINDOW)
            .await
            .unwrap_or(WINDOW)
    }
}
