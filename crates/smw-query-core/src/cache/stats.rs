//! Result cache statistics.
//!
//! Counters are flat, dot-separated keys (`hits.tempCache.embedded`) that
//! [`CacheStats::to_json`] nests into objects. Keys whose last segment
//! starts with `median` hold running medians rather than sums.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheStats {
    values: BTreeMap<String, f64>,
}

fn is_median(key: &str) -> bool {
    key.split('.').any(|segment| segment.starts_with("median"))
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&mut self, key: &str) {
        *self.values.entry(key.to_string()).or_insert(0.0) += 1.0;
    }

    pub fn set(&mut self, key: &str, value: f64) {
        self.values.insert(key.to_string(), value);
    }

    /// Fold `value` into a running median: `(old + new) / 2`.
    pub fn calc_median(&mut self, key: &str, value: f64) {
        let entry = self.values.entry(key.to_string()).or_insert(value);
        *entry = (*entry + value) / 2.0;
    }

    pub fn get(&self, key: &str) -> f64 {
        self.values.get(key).copied().unwrap_or(0.0)
    }

    /// Sum of all counters under `prefix`.
    pub fn sum_prefix(&self, prefix: &str) -> f64 {
        self.values
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(_, v)| v)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Combine with stats recorded elsewhere. Counters add up, medians
    /// are averaged.
    pub fn merge(&mut self, other: &CacheStats) {
        for (key, value) in &other.values {
            match self.values.get_mut(key) {
                Some(existing) if is_median(key) => *existing = (*existing + value) / 2.0,
                Some(existing) => *existing += value,
                None => {
                    self.values.insert(key.clone(), *value);
                }
            }
        }
    }

    /// Nested JSON view with hit and miss ratios.
    pub fn to_json(&self) -> Value {
        let mut root = Map::new();
        for (key, value) in &self.values {
            insert_nested(&mut root, key, number(*value));
        }

        let hits = self.sum_prefix("hits.");
        let misses = self.sum_prefix("misses.");
        let hit = if hits > 0.0 {
            round4(hits / (hits + misses))
        } else {
            0.0
        };
        let miss = if hits > 0.0 { round4(1.0 - hit) } else { 1.0 };
        let mut ratio = Map::new();
        ratio.insert("hit".into(), number(hit));
        ratio.insert("miss".into(), number(miss));
        root.insert("ratio".into(), Value::Object(ratio));
        Value::Object(root)
    }
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

fn number(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        Value::from(v as i64)
    } else {
        Value::from(v)
    }
}

fn insert_nested(map: &mut Map<String, Value>, key: &str, value: Value) {
    match key.split_once('.') {
        None => {
            map.insert(key.to_string(), value);
        }
        Some((head, rest)) => {
            let child = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child) = child {
                insert_nested(child, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_incr_and_nesting() {
        let mut stats = CacheStats::new();
        stats.incr("hits.tempCache.embedded");
        stats.incr("hits.tempCache.embedded");
        stats.incr("misses.nonEmbedded");
        let json = stats.to_json();
        assert_eq!(json["hits"]["tempCache"]["embedded"], json!(2));
        assert_eq!(json["misses"]["nonEmbedded"], json!(1));
    }

    #[test]
    fn test_ratio() {
        let mut stats = CacheStats::new();
        assert_eq!(stats.to_json()["ratio"], json!({"hit": 0, "miss": 1}));
        stats.incr("hits.embedded");
        stats.incr("misses.embedded");
        stats.incr("misses.embedded");
        let json = stats.to_json();
        assert_eq!(json["ratio"]["hit"], json!(0.3333));
        assert_eq!(json["ratio"]["miss"], json!(0.6667));
    }

    #[test]
    fn test_running_median() {
        let mut stats = CacheStats::new();
        stats.calc_median("medianRetrievalResponseTime.cached", 4.0);
        assert_eq!(stats.get("medianRetrievalResponseTime.cached"), 4.0);
        stats.calc_median("medianRetrievalResponseTime.cached", 2.0);
        assert_eq!(stats.get("medianRetrievalResponseTime.cached"), 3.0);
    }

    #[test]
    fn test_merge() {
        let mut a = CacheStats::new();
        a.incr("hits.embedded");
        a.set("medianRetrievalResponseTime.cached", 2.0);
        let mut b = CacheStats::new();
        b.incr("hits.embedded");
        b.incr("deletes.onSave");
        b.set("medianRetrievalResponseTime.cached", 4.0);
        a.merge(&b);
        assert_eq!(a.get("hits.embedded"), 2.0);
        assert_eq!(a.get("deletes.onSave"), 1.0);
        assert_eq!(a.get("medianRetrievalResponseTime.cached"), 3.0);
    }
}
