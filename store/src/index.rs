//! Generic secondary-index substrate shared by every [`crate::Record`] type.
//!
//! Scalar indexed fields build a plain equality index (value -> ids).
//! `IndexValue::List` fields additionally build a *reverse* index (member
//! -> ids of records that list it), which is exactly the shape a
//! "who depends on this" or "who is this assigned to" query needs without
//! the index substrate knowing anything about dependencies or assignees.
//!
//! Domain-specific traversal (hierarchy ancestors/descendants, dependency
//! cycle detection) is built on top of this in `atlas_core`, not here.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::record::{Filter, FilterOp, IndexValue, Record};

#[derive(Default)]
struct FieldIndex {
    /// field -> value -> ids (scalar fields)
    equality: HashMap<String, HashMap<String, HashSet<String>>>,
    /// field -> member -> ids (list fields, reversed)
    reverse: HashMap<String, HashMap<String, HashSet<String>>>,
}

/// Generic equality + reverse index over one [`Record`] collection.
pub struct GenericIndex {
    fields: FieldIndex,
    fields_by_id: HashMap<String, HashMap<String, IndexValue>>,
}

impl GenericIndex {
    pub fn new() -> Self {
        GenericIndex {
            fields: FieldIndex::default(),
            fields_by_id: HashMap::new(),
        }
    }

    pub fn clear(&mut self) {
        self.fields.equality.clear();
        self.fields.reverse.clear();
        self.fields_by_id.clear();
    }

    pub fn upsert<R: Record>(&mut self, record: &R) {
        let id = record.id();
        self.remove(&id);
        let indexed = record.indexed_fields();
        for (field, value) in &indexed {
            match value {
                IndexValue::List(items) => {
                    let reverse = self.fields.reverse.entry(field.clone()).or_default();
                    for item in items {
                        reverse.entry(item.clone()).or_default().insert(id.clone());
                    }
                }
                scalar => {
                    if let Some(s) = scalar.as_scalar() {
                        self.fields
                            .equality
                            .entry(field.clone())
                            .or_default()
                            .entry(s)
                            .or_default()
                            .insert(id.clone());
                    }
                }
            }
        }
        self.fields_by_id.insert(id, indexed);
    }

    pub fn remove(&mut self, id: &str) {
        let Some(old) = self.fields_by_id.remove(id) else {
            return;
        };
        for (field, value) in old {
            match value {
                IndexValue::List(items) => {
                    if let Some(reverse) = self.fields.reverse.get_mut(&field) {
                        for item in items {
                            if let Some(ids) = reverse.get_mut(&item) {
                                ids.remove(id);
                            }
                        }
                    }
                }
                scalar => {
                    if let Some(s) = scalar.as_scalar() {
                        if let Some(by_value) = self.fields.equality.get_mut(&field) {
                            if let Some(ids) = by_value.get_mut(&s) {
                                ids.remove(id);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Ids of records whose `field` equals `value` (scalar equality index).
    pub fn by_equality(&self, field: &str, value: &str) -> HashSet<String> {
        self.fields
            .equality
            .get(field)
            .and_then(|m| m.get(value))
            .cloned()
            .unwrap_or_default()
    }

    /// Ids of records whose list-valued `field` contains `member` (reverse
    /// index) — e.g. "who depends on `member`".
    pub fn by_reverse(&self, field: &str, member: &str) -> HashSet<String> {
        self.fields
            .reverse
            .get(field)
            .and_then(|m| m.get(member))
            .cloned()
            .unwrap_or_default()
    }

    pub fn matches(&self, filter: &Filter) -> HashSet<String> {
        match filter.op {
            FilterOp::Eq => {
                if let Some(v) = filter.value.as_scalar() {
                    self.by_equality(&filter.field, &v)
                } else {
                    HashSet::new()
                }
            }
            FilterOp::Contains => {
                if let IndexValue::String(needle) = &filter.value {
                    self.by_reverse(&filter.field, needle)
                } else {
                    HashSet::new()
                }
            }
            FilterOp::Ne => {
                let all: HashSet<String> = self.fields_by_id.keys().cloned().collect();
                let excluded = filter
                    .value
                    .as_scalar()
                    .map(|v| self.by_equality(&filter.field, &v))
                    .unwrap_or_default();
                all.difference(&excluded).cloned().collect()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.fields_by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields_by_id.is_empty()
    }
}

impl Default for GenericIndex {
    fn default() -> Self {
        Self::new()
    }
}

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    last_accessed: Instant,
    access_count: u64,
}

/// Bounded LRU cache with a base TTL; eviction is both size- and
/// time-driven. Plain fixed-TTL here — adaptive TTL (access-frequency
/// weighted) is layered on top by the coordinator, which is the one place
/// that knows a record's access pattern is worth rewarding.
pub struct TtlCache<V> {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<String, CacheEntry<V>>,
    order: Vec<String>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        TtlCache {
            capacity,
            ttl,
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn put(&mut self, key: String, value: V) {
        if !self.entries.contains_key(&key) {
            if self.entries.len() >= self.capacity {
                self.evict_lru();
            }
            self.order.push(key.clone());
        }
        let now = Instant::now();
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                last_accessed: now,
                access_count: 0,
            },
        );
    }

    pub fn get(&mut self, key: &str) -> Option<V> {
        let expired = self
            .entries
            .get(key)
            .map(|e| e.inserted_at.elapsed() > self.ttl)
            .unwrap_or(false);
        if expired {
            self.remove(key);
            return None;
        }
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_accessed = Instant::now();
            entry.access_count += 1;
            Some(entry.value.clone())
        } else {
            None
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }

    fn evict_lru(&mut self) {
        if !self.order.is_empty() {
            let oldest = self.order.remove(0);
            self.entries.remove(&oldest);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    #[derive(Clone)]
    struct Dummy {
        id: String,
        parent: Option<String>,
        deps: Vec<String>,
    }

    impl Record for Dummy {
        fn id(&self) -> String {
            self.id.clone()
        }
        fn updated_at(&self) -> i64 {
            0
        }
        fn collection_name() -> &'static str {
            "dummy"
        }
        fn indexed_fields(&self) -> Map<String, IndexValue> {
            let mut m = Map::new();
            if let Some(p) = &self.parent {
                m.insert("parent".into(), IndexValue::String(p.clone()));
            }
            m.insert("deps".into(), IndexValue::List(self.deps.clone()));
            m
        }
        fn to_json(&self) -> serde_json::Result<String> {
            Ok("{}".into())
        }
        fn from_json(_s: &str) -> serde_json::Result<Self> {
            unimplemented!()
        }
    }

    #[test]
    fn equality_index_finds_children_by_parent() {
        let mut idx = GenericIndex::new();
        idx.upsert(&Dummy { id: "a".into(), parent: None, deps: vec![] });
        idx.upsert(&Dummy { id: "a/x".into(), parent: Some("a".into()), deps: vec![] });
        idx.upsert(&Dummy { id: "a/y".into(), parent: Some("a".into()), deps: vec![] });

        let children = idx.by_equality("parent", "a");
        assert_eq!(children.len(), 2);
        assert!(children.contains("a/x"));
    }

    #[test]
    fn reverse_index_finds_dependents() {
        let mut idx = GenericIndex::new();
        idx.upsert(&Dummy { id: "a".into(), parent: None, deps: vec![] });
        idx.upsert(&Dummy { id: "b".into(), parent: None, deps: vec!["a".into()] });

        let dependents = idx.by_reverse("deps", "a");
        assert_eq!(dependents.len(), 1);
        assert!(dependents.contains("b"));
    }

    #[test]
    fn remove_clears_both_index_directions() {
        let mut idx = GenericIndex::new();
        idx.upsert(&Dummy { id: "b".into(), parent: Some("a".into()), deps: vec!["a".into()] });
        idx.remove("b");
        assert!(idx.by_equality("parent", "a").is_empty());
        assert!(idx.by_reverse("deps", "a").is_empty());
    }

    #[test]
    fn ttl_cache_evicts_oldest_over_capacity() {
        let mut cache = TtlCache::new(2, Duration::from_secs(60));
        cache.put("a".into(), 1);
        cache.put("b".into(), 2);
        cache.put("c".into(), 3);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn ttl_cache_expires_after_duration() {
        let mut cache = TtlCache::new(10, Duration::from_millis(1));
        cache.put("a".into(), 1);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("a").is_none());
    }
}
