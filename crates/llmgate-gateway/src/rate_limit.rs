//! Fixed-window rate limiting.
//!
//! Admission control keyed by tenant id. Windows are aligned to wall-clock
//! multiples of the window length so every gateway instance sharing a store
//! agrees on window boundaries. The count-then-check step is a single atomic
//! increment in the store, so concurrent requests racing on one key can never
//! all slip under the cap.
//!
//! Store failures fail closed: a request whose counter cannot be read is
//! rejected, never admitted unchecked. A store outage therefore stops
//! admission entirely rather than voiding the cap for every tenant.

use dashmap::DashMap;
use llmgate_core::{GatewayError, RateLimitConfig, RateLimitStore, Result};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

struct WindowEntry {
    count: u64,
    expires_at: Instant,
}

/// Process-local counter store. Suitable for a single gateway instance;
/// use [`RedisRateStore`] when several instances must share counters.
#[derive(Default)]
pub struct InMemoryRateStore {
    entries: DashMap<String, WindowEntry>,
}

impl InMemoryRateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}

#[async_trait::async_trait]
impl RateLimitStore for InMemoryRateStore {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64> {
        // Keyed windows expire on their own; sweep occasionally so dead
        // windows do not accumulate across many tenants.
        if self.entries.len() > 4096 {
            self.sweep();
        }

        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| WindowEntry {
                count: 0,
                expires_at: now + ttl,
            });
        if entry.expires_at <= now {
            entry.count = 0;
            entry.expires_at = now + ttl;
        }
        entry.count += 1;
        Ok(entry.count)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Redis-backed store
// ---------------------------------------------------------------------------

/// Shared counter store over Redis. INCR and EXPIRE run in one pipeline so
/// the counter is atomic across gateway instances.
pub struct RedisRateStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisRateStore {
    /// Connect to Redis at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Store`] if the connection cannot be opened.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| GatewayError::Store(format!("redis client: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| GatewayError::Store(format!("redis connect: {e}")))?;
        Ok(Self { conn })
    }
}

#[async_trait::async_trait]
impl RateLimitStore for RedisRateStore {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64> {
        let mut conn = self.conn.clone();
        let (count, _): (u64, i64) = redis::pipe()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| GatewayError::Store(format!("redis incr: {e}")))?;
        Ok(count)
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| GatewayError::Store(format!("redis ping: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Limiter
// ---------------------------------------------------------------------------

/// Fixed-window limiter over a pluggable [`RateLimitStore`].
pub struct RateLimiter {
    enabled: bool,
    window_seconds: u64,
    max_requests: u64,
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    /// Build a limiter from configuration and a store.
    pub fn new(config: &RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            enabled: config.enabled,
            window_seconds: config.window_seconds.max(1),
            max_requests: config.max_requests,
            store,
        }
    }

    /// Build the store named by configuration: Redis when a URL is set,
    /// in-memory otherwise.
    pub async fn from_config(config: &RateLimitConfig) -> Result<Self> {
        let store: Arc<dyn RateLimitStore> = match config.redis_url.as_deref() {
            Some(url) => Arc::new(RedisRateStore::connect(url).await?),
            None => Arc::new(InMemoryRateStore::new()),
        };
        Ok(Self::new(config, store))
    }

    /// Admit or reject one request for `key_id` in the current window.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::RateLimited`] when the window's cap is
    /// exceeded, and [`GatewayError::Store`] when the counter cannot be
    /// read. Both reject the request; a store outage never admits.
    pub async fn check(&self, key_id: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let now_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let window_start = now_secs / self.window_seconds * self.window_seconds;
        let key = format!("rl:{key_id}:{window_start}");
        // TTL outlives the window so a straggling increment near the
        // boundary still lands on a live key.
        let ttl = Duration::from_secs(self.window_seconds * 2);

        match self.store.incr(&key, ttl).await {
            Ok(count) if count > self.max_requests => {
                let retry_after_secs = (window_start + self.window_seconds).saturating_sub(now_secs);
                Err(GatewayError::RateLimited {
                    retry_after_secs: retry_after_secs.max(1),
                })
            }
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::error!(error = %e, "rate-limit store failure, rejecting request");
                Err(e)
            }
        }
    }

    /// Whether limiting is active.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Readiness of the backing store.
    pub async fn health_check(&self) -> Result<()> {
        self.store.health_check().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
