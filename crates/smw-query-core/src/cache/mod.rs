//! Query result cache.
//!
//! [`ResultCache`] wraps a [`QueryEngine`] with two tiers:
//!
//! - a temp cache of live results, valid until their persistent write lands
//! - a [`BlobStore`] holding serialized results, written only once no
//!   transaction is active ([`ResultCache::on_transaction_idle`])
//!
//! Embedded queries are linked to their context page: the page's blob
//! carries the ids of every query that depends on it, so invalidating the
//! page evicts those queries as well.
//!
//! Cache keys are `sha256(subject_or_query_id . VERSION . key_extension)`;
//! bumping [`VERSION`] orphans every existing entry.

pub mod blob;
pub mod deferred;
pub mod stats;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use anyhow::Result;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::description::PageRef;
use crate::error::Error;
use crate::query::{Query, QueryEngine, QueryResult};

use blob::{BlobStore, CacheContainer};
use deferred::TransactionIdleQueue;
use stats::CacheStats;

pub const VERSION: &str = "1";

/// Blob id under which statistics are recorded.
pub const STATS_ID: &str = "meta:stats";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Lifetime of embedded query results, in seconds.
    pub embedded_lifetime: u64,
    /// Lifetime of non-embedded query results; `0` disables caching them.
    pub non_embedded_lifetime: u64,
    pub key_extension: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            embedded_lifetime: 7 * 24 * 3600,
            non_embedded_lifetime: 3600,
            key_extension: String::new(),
        }
    }
}

/// Something whose cache entries can be invalidated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheTarget {
    /// A page and every query linked to it.
    Subject(PageRef),
    /// One query, by its query id.
    Query(String),
}

impl CacheTarget {
    fn raw_key(&self) -> String {
        match self {
            CacheTarget::Subject(page) => page.serialization(),
            CacheTarget::Query(id) => id.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingWrite {
    key: String,
    /// Key of the context page's link list, for embedded queries.
    link_key: Option<String>,
    ttl: u64,
    result: QueryResult,
}

#[derive(Default)]
struct CacheState {
    temp: HashMap<String, QueryResult>,
    deferred: TransactionIdleQueue<PendingWrite>,
    stats: CacheStats,
}

pub struct ResultCache<E, B> {
    engine: E,
    blob_store: B,
    settings: CacheSettings,
    state: Mutex<CacheState>,
}

impl<E: QueryEngine, B: BlobStore> ResultCache<E, B> {
    pub fn new(engine: E, blob_store: B, settings: CacheSettings) -> Self {
        Self {
            engine,
            blob_store,
            settings,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn blob_store(&self) -> &B {
        &self.blob_store
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_cache_key_extension(&mut self, extension: impl Into<String>) {
        self.settings.key_extension = extension.into();
    }

    /// Cache key for a subject serialization or query id.
    pub fn hash_from(&self, raw: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        hasher.update(VERSION.as_bytes());
        hasher.update(self.settings.key_extension.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn can_use(&self, query: &Query) -> bool {
        self.blob_store.can_use() && (query.is_embedded() || self.settings.non_embedded_lifetime > 0)
    }

    /// Answer `query` from the cache, or run it and schedule a cache write.
    pub async fn get_query_result(&self, query: &Query) -> Result<QueryResult> {
        let bypass = if !self.can_use(query) {
            Some("noCache.disabled")
        } else if query.limit < 1 {
            Some("noCache.byLimit")
        } else if query.no_cache {
            Some("noCache.byOption")
        } else {
            None
        };
        if let Some(bucket) = bypass {
            debug!(bucket, "result cache bypassed");
            self.state().stats.incr(bucket);
            return self.engine.get_query_result(query).await;
        }

        let start = Instant::now();
        let key = self.hash_from(&query.query_id());
        let kind = if query.is_embedded() {
            "embedded"
        } else {
            "nonEmbedded"
        };

        let temp_hit = self.state().temp.get(&key).cloned();
        if let Some(result) = temp_hit {
            debug!(%key, "temp cache hit");
            self.state().stats.incr(&format!("hits.tempCache.{}", kind));
            return Ok(result);
        }

        let container = self.blob_store.read(&key).await?;
        if container.has("results") {
            let result = decode_result(&key, &container)?;
            debug!(%key, count = result.results.len(), "result cache hit");
            let mut state = self.state();
            state.stats.incr(&format!("hits.{}", kind));
            state.stats.calc_median(
                "medianRetrievalResponseTime.cached",
                start.elapsed().as_secs_f64(),
            );
            return Ok(result);
        }

        debug!(%key, "result cache miss");
        self.state().stats.incr(&format!("misses.{}", kind));
        let result = self.engine.get_query_result(query).await?;

        let mut state = self.state();
        if result.errors.is_empty() {
            let link_key = query
                .context_page
                .as_ref()
                .map(|page| self.hash_from(&page.serialization()));
            let ttl = if query.is_embedded() {
                self.settings.embedded_lifetime
            } else {
                self.settings.non_embedded_lifetime
            };
            state.temp.insert(key.clone(), result.clone());
            state.deferred.retain(|w| w.key != key);
            state.deferred.push(PendingWrite {
                key,
                link_key,
                ttl,
                result: result.clone(),
            });
        }
        state.stats.calc_median(
            "medianRetrievalResponseTime.uncached",
            start.elapsed().as_secs_f64(),
        );
        Ok(result)
    }

    pub fn begin_transaction(&self) {
        self.state().deferred.begin_transaction();
    }

    pub fn end_transaction(&self) {
        self.state().deferred.end_transaction();
    }

    /// Number of cache writes waiting for the transaction to go idle.
    pub fn pending_writes(&self) -> usize {
        self.state().deferred.len()
    }

    /// Flush deferred cache writes. Does nothing while a transaction is open.
    ///
    /// When a write fails, it and the writes after it stay queued (and
    /// their results stay in the temp cache) for the next flush.
    pub async fn on_transaction_idle(&self) -> Result<usize> {
        let mut writes = self.state().deferred.drain().into_iter();
        let mut flushed = 0;
        while let Some(write) = writes.next() {
            if let Err(err) = self.add_to_blob_store(&write).await {
                let mut remaining = vec![write];
                remaining.extend(writes);
                warn!(flushed, remaining = remaining.len(), error = %err, "deferred cache write failed");
                self.state().deferred.requeue(remaining);
                return Err(err);
            }
            self.state().temp.remove(&write.key);
            flushed += 1;
        }
        if flushed > 0 {
            debug!(flushed, "deferred cache writes flushed");
        }
        Ok(flushed)
    }

    async fn add_to_blob_store(&self, write: &PendingWrite) -> Result<()> {
        let mut container = self.blob_store.read(&write.key).await?;
        container.set("results", json!(write.result.serialized_results()));
        container.set("continue", json!(write.result.has_further));
        container.set("count", json!(write.result.count));
        container.set("excerpts", json!(write.result.excerpts));
        container.set_expiry(write.ttl);
        self.blob_store.save(&container).await?;

        if let Some(link_key) = &write.link_key {
            let mut linked = self.blob_store.read(link_key).await?;
            linked.add_to_linked_list(&write.key);
            self.blob_store.save(&linked).await?;
        }
        Ok(())
    }

    /// Evict the entries of `items` and of every query linked to them.
    ///
    /// `context` names the trigger for statistics (`deletes.on<context>`).
    /// Returns the number of persistent entries evicted.
    pub async fn invalidate_cache(&self, items: &[CacheTarget], context: Option<&str>) -> Result<usize> {
        let context = match context {
            Some(c) if !c.is_empty() => c,
            _ => "Undefined",
        };
        let mut evicted = 0;
        for item in items {
            let key = self.hash_from(&item.raw_key());
            {
                let mut state = self.state();
                state.temp.remove(&key);
                let mut dropped = Vec::new();
                state.deferred.retain(|w| {
                    let linked = w.key == key || w.link_key.as_deref() == Some(key.as_str());
                    if linked {
                        dropped.push(w.key.clone());
                    }
                    !linked
                });
                for k in dropped {
                    state.temp.remove(&k);
                }
            }

            if !self.blob_store.exists(&key).await? {
                continue;
            }
            let container = self.blob_store.read(&key).await?;
            for linked in &container.linked_list {
                self.state().temp.remove(linked);
                self.blob_store.delete(linked).await?;
            }
            self.blob_store.delete(&key).await?;
            self.state().stats.incr(&format!("deletes.on{}", context));
            info!(%key, linked = container.linked_list.len(), context, "cache entry invalidated");
            evicted += 1;
        }
        Ok(evicted)
    }

    /// Drop the temp cache.
    pub fn reset(&self) {
        self.state().temp.clear();
    }

    /// Statistics recorded so far plus those of this instance.
    pub async fn get_stats(&self) -> Result<Value> {
        let mut stats = self.recorded_stats().await?;
        stats.merge(&self.state().stats);
        Ok(stats.to_json())
    }

    /// Fold this instance's statistics into the recorded ones.
    pub async fn record_stats(&self) -> Result<()> {
        let current = std::mem::take(&mut self.state().stats);
        if current.is_empty() || !self.blob_store.can_use() {
            return Ok(());
        }
        let mut stats = self.recorded_stats().await?;
        stats.merge(&current);
        let mut container = self.blob_store.read(STATS_ID).await?;
        container.set("stats", serde_json::to_value(&stats)?);
        self.blob_store.save(&container).await
    }

    async fn recorded_stats(&self) -> Result<CacheStats> {
        if !self.blob_store.can_use() {
            return Ok(CacheStats::new());
        }
        let container = self.blob_store.read(STATS_ID).await?;
        match container.get("stats") {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Ok(CacheStats::new()),
        }
    }
}

/// Rebuild a result from its cached form.
fn decode_result(key: &str, container: &CacheContainer) -> std::result::Result<QueryResult, Error> {
    let malformed = |reason: &str| Error::MalformedCacheEntry {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    let missing = |element: &'static str| Error::MissingElement {
        key: key.to_string(),
        element,
    };

    let results = container
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("results is not a list"))?
        .iter()
        .map(|v| {
            v.as_str()
                .ok_or_else(|| malformed("result is not a string"))
                .and_then(PageRef::from_serialization)
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let has_further = container
        .get("continue")
        .ok_or_else(|| missing("continue"))?
        .as_bool()
        .ok_or_else(|| malformed("continue is not a boolean"))?;
    let count = container
        .get("count")
        .ok_or_else(|| missing("count"))?
        .as_u64()
        .ok_or_else(|| malformed("count is not a number"))? as usize;
    let excerpts: BTreeMap<String, String> = match container.get("excerpts") {
        Some(value) => serde_json::from_value(value.clone())?,
        None => BTreeMap::new(),
    };

    Ok(QueryResult {
        results,
        has_further,
        count,
        excerpts,
        errors: Vec::new(),
        from_cache: true,
    })
}
