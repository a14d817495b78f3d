//! Key-value blob storage for cached query results.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Namespace of query result blobs.
pub const NAMESPACE: &str = "smw:query:store";

/// One cached blob: a JSON object plus the ids of dependent entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheContainer {
    pub id: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub linked_list: Vec<String>,
    /// Lifetime in seconds, `None` for no expiry.
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl CacheContainer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }

    pub fn add_to_linked_list(&mut self, id: &str) {
        if !self.linked_list.iter().any(|l| l == id) {
            self.linked_list.push(id.to_string());
        }
    }

    pub fn set_expiry(&mut self, ttl: u64) {
        self.ttl = Some(ttl);
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.linked_list.is_empty()
    }
}

/// Persistent storage of [`CacheContainer`]s.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Whether the backend is available at all.
    fn can_use(&self) -> bool;

    /// Read a container; an absent or expired entry reads as empty.
    async fn read(&self, id: &str) -> Result<CacheContainer>;

    async fn save(&self, container: &CacheContainer) -> Result<()>;

    async fn exists(&self, id: &str) -> Result<bool>;

    async fn delete(&self, id: &str) -> Result<()>;
}

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// In-memory blob store with TTL support.
pub struct MemoryBlobStore {
    entries: Mutex<HashMap<String, (CacheContainer, Option<i64>)>>,
    clock: Clock,
    enabled: bool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock: Arc::new(|| chrono::Utc::now().timestamp()),
            enabled: true,
        }
    }

    /// Use `clock` (unix seconds) for expiry decisions.
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    fn key(id: &str) -> String {
        format!("{}:{}", NAMESPACE, id)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (CacheContainer, Option<i64>)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn live(&self, id: &str) -> Option<CacheContainer> {
        let now = (self.clock)();
        let mut entries = self.lock();
        let key = Self::key(id);
        match entries.get(&key) {
            Some((_, Some(expires_at))) if *expires_at <= now => {
                entries.remove(&key);
                None
            }
            Some((container, _)) => Some(container.clone()),
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn can_use(&self) -> bool {
        self.enabled
    }

    async fn read(&self, id: &str) -> Result<CacheContainer> {
        Ok(self.live(id).unwrap_or_else(|| CacheContainer::new(id)))
    }

    async fn save(&self, container: &CacheContainer) -> Result<()> {
        let expires_at = container.ttl.map(|ttl| (self.clock)() + ttl as i64);
        self.lock()
            .insert(Self::key(&container.id), (container.clone(), expires_at));
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.live(id).is_some())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.lock().remove(&Self::key(id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[tokio::test]
    async fn test_read_missing_is_empty() {
        let store = MemoryBlobStore::new();
        let c = store.read("abc").await.unwrap();
        assert_eq!(c.id, "abc");
        assert!(c.is_empty());
        assert!(!store.exists("abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_save_read_delete() {
        let store = MemoryBlobStore::new();
        let mut c = CacheContainer::new("k");
        c.set("count", Value::from(3));
        c.add_to_linked_list("q1");
        c.add_to_linked_list("q1");
        store.save(&c).await.unwrap();

        let back = store.read("k").await.unwrap();
        assert_eq!(back.get("count"), Some(&Value::from(3)));
        assert_eq!(back.linked_list, vec!["q1".to_string()]);

        store.delete("k").await.unwrap();
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let now = Arc::new(AtomicI64::new(1000));
        let clock = now.clone();
        let store = MemoryBlobStore::new().with_clock(move || clock.load(Ordering::SeqCst));
        let mut c = CacheContainer::new("k");
        c.set("results", Value::Array(vec![]));
        c.set_expiry(60);
        store.save(&c).await.unwrap();
        assert!(store.exists("k").await.unwrap());
        now.store(1060, Ordering::SeqCst);
        assert!(!store.exists("k").await.unwrap());
        assert!(store.read("k").await.unwrap().is_empty());
    }

    #[test]
    fn test_disabled() {
        assert!(!MemoryBlobStore::disabled().can_use());
        assert!(MemoryBlobStore::new().can_use());
    }
}
