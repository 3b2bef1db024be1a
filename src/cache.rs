use crate::{error::InfraError, lifecycle::Resource};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::MultiplexedConnection, AsyncCommands};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

/// TTL-capable key/value cache in front of the store.
///
/// Values are either a long URL or the configured not-found sentinel; the
/// cache itself does not distinguish the two.
#[async_trait]
pub trait LinkCache: Send + Sync {
    /// `Ok(None)` means the key is absent or has expired.
    async fn get(&self, key: &str) -> Result<Option<String>, InfraError>;

    /// Store `value` under `key` for `ttl_secs` seconds.
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), InfraError>;
}

// ── In-memory ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Thread-safe in-memory cache mapping code -> long URL (or sentinel).
///
/// Backed by a DashMap so reads are concurrent and lock-free for most cases.
/// Expired entries are dropped when read and by [`MemoryCache::spawn_sweeper`].
#[derive(Clone, Debug, Default)]
pub struct MemoryCache {
    inner: Arc<DashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.inner.retain(|_, entry| entry.expires_at > now);
    }

    /// Number of entries currently held, expired or not.
    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn spawn_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                cache.purge_expired();
            }
        })
    }
}

#[async_trait]
impl LinkCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, InfraError> {
        let now = Instant::now();
        if let Some(entry) = self.inner.get(key) {
            if entry.expires_at > now {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Expired or missing. Only remove if it is still the stale entry.
        self.inner.remove_if(key, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), InfraError> {
        let entry = Entry {
            value: value.to_owned(),
            expires_at: Instant::now() + Duration::from_secs(ttl_secs.max(1)),
        };
        self.inner.insert(key.to_owned(), entry);
        Ok(())
    }
}

#[async_trait]
impl Resource for MemoryCache {
    fn name(&self) -> &'static str {
        "memory-cache"
    }

    async fn startup(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.inner.clear();
        Ok(())
    }
}

// ── Redis ──────────────────────────────────────────────────────────────────

/// Redis-backed cache using a shared multiplexed connection.
pub struct RedisCache {
    client: redis::Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    key_prefix: String,
    connect_timeout: Duration,
}

impl RedisCache {
    /// Parse the URL only; no connection is made until startup or first use.
    pub fn new(
        url: &str,
        key_prefix: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, InfraError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            connection: RwLock::new(None),
            key_prefix: key_prefix.into(),
            connect_timeout,
        })
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, InfraError> {
        if let Some(conn) = self.connection.read().await.as_ref() {
            return Ok(conn.clone());
        }

        let mut guard = self.connection.write().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = tokio::time::timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            redis::RedisError::from(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "timed out connecting to redis",
            ))
        })??;
        *guard = Some(conn.clone());
        tracing::debug!("Redis connection established");
        Ok(conn)
    }

    async fn reset_connection(&self) {
        *self.connection.write().await = None;
    }
}

#[async_trait]
impl LinkCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, InfraError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<Option<String>> = conn.get(self.make_key(key)).await;
        match result {
            Ok(value) => Ok(value.filter(|v| !v.is_empty())),
            Err(e) => {
                self.reset_connection().await;
                Err(e.into())
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), InfraError> {
        let mut conn = self.connection().await?;
        let result = conn
            .set_ex::<String, &str, ()>(self.make_key(key), value, ttl_secs.max(1))
            .await;
        if let Err(e) = result {
            self.reset_connection().await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl Resource for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn startup(&self) -> anyhow::Result<()> {
        let mut conn = self.connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        tracing::info!("Redis reachable ({})", pong);
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.reset_connection().await;
        tracing::info!("Redis connection released");
        Ok(())
    }
}
