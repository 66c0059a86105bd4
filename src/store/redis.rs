//! Redis-backed TTL store.

use super::{StoreError, TtlStore};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(1);

/// Production TTL store over a shared Redis connection manager.
///
/// Every call is time-boxed so a cache outage cannot stall the authentication
/// path; the caller maps [`StoreError::Unavailable`] to its fail-open or
/// fail-closed policy.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    call_timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"ConnectionManager")
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl RedisStore {
    /// Connect to Redis and return a store with the default 1s per-call budget.
    ///
    /// # Errors
    /// Returns an error if the client cannot be created or the initial
    /// connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        info!("Connecting to cache store");

        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::Unavailable(format!("failed to create client: {e}")))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable(format!("failed to connect: {e}")))?;

        Ok(Self {
            conn,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    async fn run<T>(
        &self,
        op: &'static str,
        fut: impl std::future::Future<Output = redis::RedisResult<T>> + Send,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StoreError::Unavailable(format!("{op}: {e}"))),
            Err(_) => Err(StoreError::Unavailable(format!("{op}: timed out"))),
        }
    }
}

#[async_trait]
impl TtlStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        debug!("cache GET: {key}");
        self.run("GET", async move { conn.get(key).await }).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        debug!("cache SET: {key} (ttl: {ttl:?})");
        match ttl {
            Some(ttl) => {
                self.run("SETEX", async move {
                    conn.set_ex(key, value, ttl.as_secs()).await
                })
                .await
            }
            None => self.run("SET", async move { conn.set(key, value).await }).await,
        }
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        // SET key value NX EX ttl is a single atomic command; concurrent
        // claimants observe exactly one winner.
        let opts = redis::SetOptions::default()
            .conditional_set(redis::ExistenceCheck::NX)
            .with_expiration(redis::SetExpiry::EX(ttl.as_secs()));
        let outcome: Option<String> = self
            .run("SET NX", async move {
                conn.set_options(key, value, opts).await
            })
            .await?;
        Ok(outcome.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.run("DEL", async move { conn.del::<_, ()>(key).await })
            .await
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        self.run("GETDEL", async move {
            redis::cmd("GETDEL").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        // INCR then EXPIRE NX: the TTL is set on the first increment only, so
        // the window does not slide under sustained traffic.
        self.run("INCR", async move {
            let count: i64 = conn.incr(key, 1).await?;
            let _: bool = redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl.as_secs())
                .arg("NX")
                .query_async(&mut conn)
                .await?;
            Ok(count)
        })
        .await
    }

    async fn sadd(&self, key: &str, member: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.run("SADD", async move {
            let _: i64 = conn.sadd(key, member).await?;
            let _: bool = redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl.as_secs())
                .arg("NX")
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn scard(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        self.run("SCARD", async move { conn.scard(key).await }).await
    }
}
