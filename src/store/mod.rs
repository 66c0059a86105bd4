//! TTL cache store abstraction.
//!
//! The revocation list, rate counters, one-time codes, and encrypted session
//! blobs all live in a key/value store with per-key expiry. The store is an
//! injected client, never a process-global, so engines stay testable and
//! horizontally scalable. [`RedisStore`] is the production implementation;
//! [`MemoryStore`] backs tests and local development.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use async_trait::async_trait;
use std::time::Duration;

/// Store failures. Callers decide fail-open vs fail-closed per call site.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store is unreachable or the call timed out.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Key/value operations with per-key expiry and single-key atomicity.
#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value, optionally with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Write a value only if the key does not exist. Returns whether the write
    /// won. This is the atomic claim used for refresh-token rotation.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Remove a key. Idempotent.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Read and remove a value in one step (single-use codes).
    async fn take(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Atomically increment a counter, setting the TTL on first increment.
    /// Returns the new count.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;

    /// Add a member to a set, refreshing the set TTL.
    async fn sadd(&self, key: &str, member: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Cardinality of a set (0 for a missing key).
    async fn scard(&self, key: &str) -> Result<i64, StoreError>;
}
