//! Process-lifetime, insertion-ordered post cache.
//!
//! Eviction follows insertion order only: reads never refresh an entry, so
//! this is a FIFO window over the most recently *first-seen* posts rather than
//! an LRU.
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Minimal record retained per post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPost {
    pub uri: String,
    pub indexed_at: Option<DateTime<Utc>>,
}

/// Cache shared by every request handled by the process.
pub type SharedCache = Arc<Mutex<PostCache>>;

#[derive(Debug)]
pub struct PostCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, CachedPost>,
}

impl Default for PostCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl PostCache {
    /// A zero capacity is coerced to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    pub fn shared(capacity: usize) -> SharedCache {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.entries.contains_key(uri)
    }

    /// Insert a post, evicting the oldest insertion when a new uri arrives at
    /// capacity. Re-putting a known uri overwrites its value in place and
    /// keeps its original position, unless the stored record is newer.
    pub fn put(&mut self, post: CachedPost) {
        if let Some(existing) = self.entries.get_mut(&post.uri) {
            // `None` sorts below any timestamp.
            if post.indexed_at >= existing.indexed_at {
                *existing = post;
            }
            return;
        }

        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                tracing::trace!(uri = %oldest, "cache.evict");
            }
        }

        self.order.push_back(post.uri.clone());
        self.entries.insert(post.uri.clone(), post);
    }

    /// All entries in insertion order. Callers sort as they need.
    pub fn values(&self) -> Vec<CachedPost> {
        self.order
            .iter()
            .filter_map(|uri| self.entries.get(uri).cloned())
            .collect()
    }
}
