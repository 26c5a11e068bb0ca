//! Provides the thread-safe cache used by each [Group](crate::group::Group).
//!
//! A [SharedCache](SharedCache) owns exactly one [LRUCache](crate::lru::LRUCache) which is
//! guarded by a single mutex. Storing and reading values are the only critical sections, the
//! engine itself is never accessed outside of this lock.
//!
//! The engine is only created once the first value is stored. Therefore a group which is never
//! asked for anything doesn't allocate any cache structures at all.
use parking_lot::Mutex;

use crate::lru::LRUCache;
use crate::ByteView;

/// Wraps an [LRUCache](LRUCache) of [ByteViews](ByteView) behind a mutex.
///
/// # Examples
/// ```
/// # use geecache::lru::cache::SharedCache;
/// # use geecache::ByteView;
/// let cache = SharedCache::new(1024);
/// assert_eq!(cache.get("Foo"), None);
///
/// cache.put("Foo", ByteView::from("Bar"));
/// assert_eq!(cache.get("Foo").unwrap().to_string(), "Bar");
/// ```
pub struct SharedCache {
    max_memory: usize,
    lru: Mutex<Option<LRUCache<ByteView>>>,
}

/// Provides a snapshot of the metrics of a [SharedCache](SharedCache).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CacheStats {
    /// Contains the number of entries.
    pub entries: usize,

    /// Contains the number of bytes occupied by keys and values.
    pub allocated_memory: usize,

    /// Contains the memory budget in bytes.
    pub max_memory: usize,

    /// Contains the number of lookups.
    pub reads: usize,

    /// Contains the number of lookups which found a value.
    pub hits: usize,

    /// Contains the number of stored values.
    pub writes: usize,

    /// Contains the number of entries evicted to free up memory.
    pub evictions: usize,
}

impl SharedCache {
    /// Creates a new cache which will occupy up to **max_memory** bytes.
    pub fn new(max_memory: usize) -> Self {
        SharedCache {
            max_memory,
            lru: Mutex::new(None),
        }
    }

    /// Stores the given value, creating the underlying engine if necessary.
    pub fn put(&self, key: &str, value: ByteView) {
        self.lru
            .lock()
            .get_or_insert_with(|| LRUCache::new(self.max_memory))
            .put(key.to_owned(), value);
    }

    /// Returns the value stored for the given key.
    ///
    /// As views share their underlying buffer, the returned clone is cheap.
    pub fn get(&self, key: &str) -> Option<ByteView> {
        self.lru
            .lock()
            .as_mut()
            .and_then(|lru| lru.get(key).cloned())
    }

    /// Returns the memory budget of this cache.
    pub fn max_memory(&self) -> usize {
        self.max_memory
    }

    /// Collects the current metrics.
    pub fn stats(&self) -> CacheStats {
        match self.lru.lock().as_ref() {
            Some(lru) => CacheStats {
                entries: lru.len(),
                allocated_memory: lru.allocated_memory(),
                max_memory: lru.max_memory(),
                reads: lru.reads(),
                hits: lru.hits(),
                writes: lru.writes(),
                evictions: lru.evictions(),
            },
            None => CacheStats {
                max_memory: self.max_memory,
                ..CacheStats::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::lru::cache::SharedCache;
    use crate::ByteView;
    use std::sync::Arc;

    #[test]
    fn engine_is_created_lazily() {
        let cache = SharedCache::new(64);

        // A lookup doesn't create the engine...
        assert_eq!(cache.get("a"), None);
        assert!(cache.lru.lock().is_none());
        assert_eq!(cache.stats().reads, 0);
        assert_eq!(cache.stats().max_memory, 64);

        // ..but storing a value does.
        cache.put("a", ByteView::from("1"));
        assert!(cache.lru.lock().is_some());
        assert_eq!(cache.get("a"), Some(ByteView::from("1")));

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.allocated_memory, 2);
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.writes, 1);
    }

    #[test]
    fn concurrent_writers_keep_the_budget() {
        let cache = Arc::new(SharedCache::new(1024));

        let workers = (0..8)
            .map(|worker| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for index in 0..500 {
                        cache.put(&format!("{}-{}", worker, index), ByteView::from(vec![0; 16]));
                        let _ = cache.get(&format!("{}-{}", worker, index / 2));
                    }
                })
            })
            .collect::<Vec<_>>();

        for worker in workers {
            worker.join().unwrap();
        }

        let stats = cache.stats();
        assert!(stats.allocated_memory <= 1024);
        assert_eq!(stats.writes, 8 * 500);
        assert!(stats.evictions > 0);
    }
}
