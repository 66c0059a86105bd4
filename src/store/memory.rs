//! In-memory TTL store for tests and local development.

use super::{StoreError, TtlStore};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.is_none_or(|at| at > Instant::now())
    }
}

/// TTL store backed by process memory.
///
/// Honors the same expiry and claim semantics as [`super::RedisStore`]; safe to
/// lose on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Entry>>,
    sets: Mutex<HashMap<String, (HashSet<String>, Option<Instant>)>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TtlStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut values = self.values.lock().await;
        match values.get(key) {
            Some(entry) if entry.live() => Ok(Some(entry.value.clone())),
            Some(_) => {
                values.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut values = self.values.lock().await;
        values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut values = self.values.lock().await;
        // The mutex makes check-then-insert atomic, mirroring SET NX.
        if values.get(key).is_some_and(Entry::live) {
            return Ok(false);
        }
        values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.values.lock().await.remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut values = self.values.lock().await;
        match values.remove(key) {
            Some(entry) if entry.live() => Ok(Some(entry.value)),
            _ => Ok(None),
        }
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let mut values = self.values.lock().await;
        let next = match values.get(key) {
            Some(entry) if entry.live() => {
                let count = entry.value.parse::<i64>().unwrap_or(0) + 1;
                let expires_at = entry.expires_at;
                values.insert(
                    key.to_string(),
                    Entry {
                        value: count.to_string(),
                        expires_at,
                    },
                );
                count
            }
            _ => {
                values.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: Some(Instant::now() + ttl),
                    },
                );
                1
            }
        };
        Ok(next)
    }

    async fn sadd(&self, key: &str, member: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut sets = self.sets.lock().await;
        let now = Instant::now();
        let slot = sets.entry(key.to_string()).or_insert_with(|| {
            (HashSet::new(), Some(now + ttl))
        });
        if slot.1.is_some_and(|at| at <= now) {
            slot.0.clear();
            slot.1 = Some(now + ttl);
        }
        slot.0.insert(member.to_string());
        Ok(())
    }

    async fn scard(&self, key: &str) -> Result<i64, StoreError> {
        let sets = self.sets.lock().await;
        match sets.get(key) {
            Some((members, expires_at)) if expires_at.is_none_or(|at| at > Instant::now()) => {
                Ok(members.len() as i64)
            }
            _ => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        store.set("k", "v", None).await?;
        assert_eq!(store.get("k").await?, Some("v".to_string()));
        store.delete("k").await?;
        assert_eq!(store.get("k").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn expired_entries_read_as_missing() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        store.set("k", "v", Some(Duration::from_millis(5))).await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("k").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn set_nx_has_exactly_one_winner() -> Result<(), StoreError> {
        let store = std::sync::Arc::new(MemoryStore::new());
        let a = store.clone();
        let b = store.clone();
        let ttl = Duration::from_secs(60);

        let (won_a, won_b) = tokio::join!(a.set_nx("claim", "a", ttl), b.set_nx("claim", "b", ttl));
        assert_ne!(won_a?, won_b?);
        Ok(())
    }

    #[tokio::test]
    async fn take_consumes_the_value() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        store.set("code", "123456", None).await?;
        assert_eq!(store.take("code").await?, Some("123456".to_string()));
        assert_eq!(store.take("code").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn incr_counts_within_window() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        assert_eq!(store.incr("hits", ttl).await?, 1);
        assert_eq!(store.incr("hits", ttl).await?, 2);
        assert_eq!(store.incr("hits", ttl).await?, 3);
        Ok(())
    }

    #[tokio::test]
    async fn sets_track_distinct_members() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.sadd("users", "a", ttl).await?;
        store.sadd("users", "b", ttl).await?;
        store.sadd("users", "a", ttl).await?;
        assert_eq!(store.scard("users").await?, 2);
        Ok(())
    }
}
