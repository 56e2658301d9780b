//! Coordinator-level cache coordination: adaptive TTL on top of a bounded
//! LRU, plus memory-pressure backpressure with a cooldown between clears.
//!
//! Builds its own small LRU rather than reusing `taskstore::TtlCache`
//! because the adaptive-TTL formula below needs each entry's access
//! history, which a fixed-TTL cache has no reason to expose.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::domain::Task;

struct Entry {
    task: Task,
    inserted_at: Instant,
    last_accessed: Instant,
    access_count: u64,
}

/// LRU cache of `Task` snapshots with access-frequency-weighted TTL.
pub struct AdaptiveCache {
    capacity: usize,
    base_ttl: Duration,
    max_ttl: Duration,
    entries: HashMap<String, Entry>,
    order: Vec<String>,
    last_full_clear: Option<Instant>,
    cooldown: Duration,
    pressure_threshold: f64,
    max_memory_bytes: u64,
}

impl AdaptiveCache {
    pub fn new(capacity: usize, base_ttl: Duration, max_ttl: Duration, max_memory_bytes: u64) -> Self {
        AdaptiveCache {
            capacity,
            base_ttl,
            max_ttl,
            entries: HashMap::new(),
            order: Vec::new(),
            last_full_clear: None,
            cooldown: Duration::from_secs(60),
            pressure_threshold: 0.95,
            max_memory_bytes,
        }
    }

    pub fn put(&mut self, task: Task) {
        let key = task.path.clone();
        if !self.entries.contains_key(&key) {
            if self.entries.len() >= self.capacity {
                self.evict_lru();
            }
            self.order.push(key.clone());
        }
        let now = Instant::now();
        self.entries.insert(
            key,
            Entry {
                task,
                inserted_at: now,
                last_accessed: now,
                access_count: 0,
            },
        );
    }

    pub fn get(&mut self, path: &str) -> Option<Task> {
        let ttl = self.entries.get(path).map(|e| self.effective_ttl(e))?;
        let expired = self.entries.get(path).map(|e| e.inserted_at.elapsed() > ttl).unwrap_or(true);
        if expired {
            self.remove(path);
            return None;
        }
        let entry = self.entries.get_mut(path)?;
        entry.last_accessed = Instant::now();
        entry.access_count += 1;
        Some(entry.task.clone())
    }

    pub fn remove(&mut self, path: &str) {
        self.entries.remove(path);
        self.order.retain(|k| k != path);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn evict_lru(&mut self) {
        if !self.order.is_empty() {
            let oldest = self.order.remove(0);
            self.entries.remove(&oldest);
        }
    }

    /// `effective_ttl = min(base * log2(accessCount+1) * (1+recencyBonus), maxTTL)`
    /// where `recencyBonus = max(0, 1 - (now - lastAccessed)/maxTTL)`.
    fn effective_ttl(&self, entry: &Entry) -> Duration {
        let access_factor = ((entry.access_count + 1) as f64).log2().max(1.0);
        let since_access = entry.last_accessed.elapsed().as_secs_f64();
        let recency_bonus = (1.0 - since_access / self.max_ttl.as_secs_f64()).max(0.0);
        let ttl_secs = self.base_ttl.as_secs_f64() * access_factor * (1.0 + recency_bonus);
        Duration::from_secs_f64(ttl_secs.min(self.max_ttl.as_secs_f64()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn estimated_bytes(&self) -> u64 {
        // A flat per-entry estimate is enough to drive backpressure
        // decisions without serializing every cached task on each check.
        (self.entries.len() as u64) * 2048
    }

    /// Check memory pressure; if over threshold and the cooldown has
    /// elapsed since the last clear, clear the cache and report it.
    pub fn check_backpressure(&mut self) -> bool {
        let usage = self.estimated_bytes() as f64 / self.max_memory_bytes as f64;
        if usage < self.pressure_threshold {
            return false;
        }
        let can_clear = self.last_full_clear.map(|t| t.elapsed() >= self.cooldown).unwrap_or(true);
        if !can_clear {
            return false;
        }
        warn!(usage, "cache memory pressure exceeded threshold, clearing");
        self.entries.clear();
        self.order.clear();
        self.last_full_clear = Some(Instant::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;

    fn task(path: &str) -> Task {
        Task::new(path.into(), path.into(), TaskType::Task).unwrap()
    }

    #[test]
    fn evicts_lru_over_capacity() {
        let mut cache = AdaptiveCache::new(2, Duration::from_secs(900), Duration::from_secs(3600), 1_000_000);
        cache.put(task("a"));
        cache.put(task("b"));
        cache.put(task("c"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn frequently_accessed_entries_get_longer_effective_ttl() {
        let mut cache = AdaptiveCache::new(10, Duration::from_secs(1), Duration::from_secs(3600), 1_000_000);
        cache.put(task("a"));
        for _ in 0..10 {
            cache.get("a");
        }
        let entry = cache.entries.get("a").unwrap();
        let ttl = cache.effective_ttl(entry);
        assert!(ttl > Duration::from_secs(1));
    }

    #[test]
    fn backpressure_clears_once_then_respects_cooldown() {
        let mut cache = AdaptiveCache::new(100, Duration::from_secs(900), Duration::from_secs(3600), 100);
        for i in 0..10 {
            cache.put(task(&format!("t{i}")));
        }
        assert!(cache.check_backpressure());
        assert_eq!(cache.len(), 0);
        cache.put(task("after"));
        assert!(!cache.check_backpressure());
    }
}
