use linked_hash_map::LinkedHashMap;

/// Returns the allocated memory in bytes.
pub trait ByteSize {
    /// Returns the amount of allocated memory in bytes.
    ///
    /// Note that most probably this is an approximation and not the exact byte value. However,
    /// it should represent the "largest" part of an instance. (E.g. for a string, this would
    /// be the bytes allocated on the heap and might discard the fields allocated on the stack
    /// used to store the length and capacity as well as the pointer itself.
    fn allocated_size(&self) -> usize;
}

impl ByteSize for String {
    fn allocated_size(&self) -> usize {
        self.capacity()
    }
}

impl ByteSize for Vec<u8> {
    fn allocated_size(&self) -> usize {
        self.len()
    }
}

/// Invoked with the key and value of each entry which is evicted to free up memory.
///
/// The listener runs while the cache is being modified (and most probably while the lock of a
/// surrounding [SharedCache](crate::lru::cache::SharedCache) is held). It must therefore return
/// quickly and must not panic.
pub type EvictionListener<V> = Box<dyn FnMut(&str, &V) + Send>;

/// Provides a byte size constrained LRU cache.
///
/// A cache behaves just like a **Map** as long as there is no shortage in storage. However, once
/// the allocated memory grows above its limit, old (least recently used) entries will be evicted -
/// hence the name LRU cache.
///
/// Each entry accounts for the length of its key plus the [allocated_size](ByteSize) of its
/// value. Note that a single entry which is larger than the whole cache is still accepted, but
/// evicted again right away. Consequently, a cache with a **max_memory** of 0 caches nothing.
///
/// # Examples
/// ```
/// # use geecache::lru::LRUCache;
///
/// // Specifies a cache which can store up to 16 bytes of keys and values...
/// let mut lru = LRUCache::new(16);
///
/// lru.put("Foo".to_owned(), "Bar".to_owned());
/// assert_eq!(lru.get("Foo").unwrap(), &"Bar".to_owned());
///
/// // this will still fit..
/// lru.put("Foo1".to_owned(), "X".repeat(6));
/// assert_eq!(lru.get("Foo").is_some(), true);
/// assert_eq!(lru.get("Foo1").is_some(), true);
///
/// // this will hit the max memory constraint...
/// lru.put("Foo2".to_owned(), "X".repeat(6));
/// // ..and therefore will throw the two others out:
/// assert_eq!(lru.get("Foo").is_some(), false);
/// assert_eq!(lru.get("Foo1").is_some(), false);
/// assert_eq!(lru.get("Foo2").is_some(), true);
///```
pub struct LRUCache<V: ByteSize> {
    allocated_memory: usize,
    max_memory: usize,
    reads: usize,
    hits: usize,
    writes: usize,
    evictions: usize,
    on_evict: Option<EvictionListener<V>>,
    map: LinkedHashMap<String, Entry<V>>,
}

struct Entry<V: ByteSize> {
    mem_size: usize,
    value: V,
}

impl<V: ByteSize> LRUCache<V> {
    /// Creates a new cache which keeps entries until they occupy **max_memory** bytes.
    pub fn new(max_memory: usize) -> Self {
        LRUCache {
            allocated_memory: 0,
            max_memory,
            reads: 0,
            hits: 0,
            writes: 0,
            evictions: 0,
            on_evict: None,
            map: LinkedHashMap::new(),
        }
    }

    /// Creates a new cache which notifies the given listener for each evicted entry.
    ///
    /// Note that only evictions caused by the memory constraint are reported. Explicitly
    /// removed or flushed entries are not.
    ///
    /// # Examples
    /// ```
    /// # use geecache::lru::LRUCache;
    /// # use std::sync::{Arc, Mutex};
    /// let evicted = Arc::new(Mutex::new(Vec::new()));
    /// let listener = evicted.clone();
    /// let mut lru: LRUCache<String> = LRUCache::with_eviction_listener(
    ///     4,
    ///     Box::new(move |key: &str, _: &String| listener.lock().unwrap().push(key.to_owned())),
    /// );
    ///
    /// lru.put("A".to_owned(), "123".to_owned());
    /// lru.put("B".to_owned(), "123".to_owned());
    /// lru.put("C".to_owned(), "123".to_owned());
    ///
    /// assert_eq!(evicted.lock().unwrap().as_slice(), &["A".to_owned(), "B".to_owned()]);
    /// ```
    pub fn with_eviction_listener(max_memory: usize, listener: EvictionListener<V>) -> Self {
        let mut cache = LRUCache::new(max_memory);
        cache.on_evict = Some(listener);
        cache
    }

    /// Stores the given value for the given key.
    ///
    /// If the key is already present, its value is replaced. Either way, the entry becomes the
    /// most recently used one. Afterwards, the least recently used entries are evicted until
    /// the cache fits into its memory budget again.
    ///
    /// # Examples
    /// ```
    /// # use geecache::lru::LRUCache;
    /// let mut lru = LRUCache::new(1024);
    ///
    /// lru.put("Foo".to_owned(), "Bar".to_owned());
    /// assert_eq!(lru.get("Foo").unwrap(), &"Bar".to_owned());
    /// assert_eq!(lru.allocated_memory(), 6);
    ///
    /// lru.put("Foo".to_owned(), "Bar1".to_owned());
    /// assert_eq!(lru.get("Foo").unwrap(), &"Bar1".to_owned());
    /// assert_eq!(lru.allocated_memory(), 7);
    ///```
    pub fn put(&mut self, key: String, value: V) {
        let entry = Entry {
            mem_size: key.len() + value.allocated_size(),
            value,
        };

        let mut delta_mem: isize = entry.mem_size as isize;
        if let Some(stale_entry) = self.map.insert(key, entry) {
            delta_mem -= stale_entry.mem_size as isize;
        }

        self.writes += 1;
        self.allocated_memory = (self.allocated_memory as isize + delta_mem) as usize;

        self.enforce_constraints();
    }

    fn enforce_constraints(&mut self) {
        while self.allocated_memory > self.max_memory {
            match self.map.pop_front() {
                Some((key, entry)) => {
                    self.allocated_memory -= entry.mem_size;
                    self.evictions += 1;
                    if let Some(listener) = self.on_evict.as_mut() {
                        listener(&key, &entry.value);
                    }
                }
                None => return,
            }
        }
    }

    /// Returns the value which has previously been stored for the given key or **None** if
    /// no value is present.
    ///
    /// A successful lookup marks the entry as most recently used.
    ///
    /// # Examples
    /// ```
    /// # use geecache::lru::LRUCache;
    /// let mut lru = LRUCache::new(12);
    ///
    /// lru.put("A".to_owned(), "12345".to_owned());
    /// lru.put("B".to_owned(), "12345".to_owned());
    ///
    /// // Touching "A" makes it the most recently used entry...
    /// assert_eq!(lru.get("A").is_some(), true);
    ///
    /// // ..so that "B" is evicted once we need some room.
    /// lru.put("C".to_owned(), "12345".to_owned());
    /// assert_eq!(lru.get("B"), None);
    /// assert_eq!(lru.get("A").is_some(), true);
    ///```
    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.reads += 1;

        match self.map.get_refresh(key) {
            Some(entry) => {
                self.hits += 1;
                Some(&entry.value)
            }
            None => None,
        }
    }

    /// Removes the entry for the given key if present.
    ///
    /// # Examples
    /// ```
    /// # use geecache::lru::LRUCache;
    /// let mut lru = LRUCache::new(1024);
    ///
    /// lru.put("Foo".to_owned(), "Bar".to_owned());
    /// lru.remove("Foo");
    ///
    /// assert_eq!(lru.get("Foo"), None);
    /// assert_eq!(lru.allocated_memory(), 0);
    /// ```
    pub fn remove(&mut self, key: &str) {
        self.writes += 1;

        if let Some(entry) = self.map.remove(key) {
            self.allocated_memory -= entry.mem_size;
        }
    }

    /// Removes all entries in this cache.
    ///
    /// Note that this will also zero all metrics (reads, writes, hits, evictions).
    pub fn flush(&mut self) {
        self.map.clear();
        self.allocated_memory = 0;
        self.reads = 0;
        self.writes = 0;
        self.hits = 0;
        self.evictions = 0;
    }

    /// Returns the number of elements in the cache.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Determines if the cache is completely empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the maximal amount of memory to be (roughly) occupied by this cache.
    pub fn max_memory(&self) -> usize {
        self.max_memory
    }

    /// Specifies the maximal amount of memory to be (roughly) occupied by this cache.
    ///
    /// Shrinking the budget immediately evicts entries until the cache fits again.
    ///
    /// # Examples
    /// ```
    /// # use geecache::lru::LRUCache;
    /// let mut lru = LRUCache::new(1024);
    ///
    /// // Add some entries of 7 bytes each...
    /// for index in 0..6 {
    ///     lru.put(format!("Foo{}", index), "Bar".to_owned());
    /// }
    /// assert_eq!(lru.len(), 6);
    ///
    /// // Now request that the cache is reduced to only 14 bytes...
    /// lru.set_max_memory(14);
    /// assert_eq!(lru.max_memory(), 14);
    ///
    /// // .. this will kick each but the last two entries out of the cache..
    /// assert_eq!(lru.len(), 2);
    /// ```
    pub fn set_max_memory(&mut self, max_memory: usize) {
        let previous_max_memory = self.max_memory;
        self.max_memory = max_memory;
        if previous_max_memory > self.max_memory {
            self.enforce_constraints();
        }
    }

    /// Returns the amount of memory allocated to store the data of the keys and values of this
    /// cache.
    ///
    /// This is exactly the sum of the key lengths and value sizes of all entries.
    pub fn allocated_memory(&self) -> usize {
        self.allocated_memory
    }

    /// Returns the total amount of memory allocated by this cache.
    ///
    /// In contrast to **allocated_memory()** this method also tries to account for the internal
    /// hash map and other metadata. Note that these are most probably only estimates as not all
    /// involved structures are well known.
    pub fn total_allocated_memory(&self) -> usize {
        self.allocated_memory
            + self.map.capacity()
                * (std::mem::size_of::<String>() + std::mem::size_of::<Entry<V>>())
    }

    /// Returns the memory utilization in percent.
    pub fn memory_utilization(&self) -> f32 {
        match self.max_memory {
            0 => 0.,
            max => self.allocated_memory as f32 / max as f32 * 100.,
        }
    }

    /// Returns the cache hit rate in percent.
    ///
    /// Note that all metrics are reset when **flush()** is called.
    pub fn hit_rate(&self) -> f32 {
        match self.reads {
            0 => 0.,
            n => self.hits as f32 / n as f32 * 100.,
        }
    }

    /// Returns the total number of reads performed on this cache since the last flush.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Returns the number of reads which found a value since the last flush.
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Returns the total number of writes performed on this cache since the last flush.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Returns the number of entries evicted due to the memory constraint since the last flush.
    pub fn evictions(&self) -> usize {
        self.evictions
    }

    /// Sums up the sizes of all entries by walking the whole cache.
    #[cfg(test)]
    fn recompute_memory(&self) -> usize {
        self.map
            .iter()
            .map(|(key, entry)| key.len() + entry.value.allocated_size())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use crate::lru::{ByteSize, LRUCache};
    use crate::ByteView;

    fn view(len: usize) -> ByteView {
        ByteView::from(vec![b'x'; len])
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        // Each entry uses 2 bytes for its key and 3 for its value...
        let mut lru = LRUCache::new(10);
        lru.put("k1".to_owned(), view(3));
        lru.put("k2".to_owned(), view(3));
        assert_eq!(lru.len(), 2);
        assert_eq!(lru.allocated_memory(), 10);

        // ..so the third one pushes the oldest one out.
        lru.put("k3".to_owned(), view(3));
        assert_eq!(lru.get("k1"), None);
        assert_eq!(lru.get("k2"), Some(&view(3)));
        assert_eq!(lru.get("k3"), Some(&view(3)));
        assert_eq!(lru.allocated_memory(), 10);
        assert_eq!(lru.evictions(), 1);
    }

    #[test]
    fn accessed_entries_are_evicted_last() {
        let mut lru = LRUCache::new(5 * 4);
        for key in ["a", "b", "c", "d"] {
            lru.put(key.to_owned(), view(4));
        }

        // "Use" the oldest entry...
        assert_eq!(lru.get("a").is_some(), true);

        // ..and add three more entries which evict every entry which hasn't been touched.
        for key in ["e", "f", "g"] {
            lru.put(key.to_owned(), view(4));
        }
        assert_eq!(lru.get("a").is_some(), true);
        assert_eq!(lru.get("b"), None);
        assert_eq!(lru.get("c"), None);
        assert_eq!(lru.get("d"), None);

        // One more insertion and even "a" has to go, as "e", "f" and "g" are younger...
        assert_eq!(lru.get("e").is_some(), true);
        assert_eq!(lru.get("f").is_some(), true);
        assert_eq!(lru.get("g").is_some(), true);
        lru.put("h".to_owned(), view(4));
        assert_eq!(lru.get("a"), None);
    }

    #[test]
    fn max_memory_is_enforced() {
        let mut lru = LRUCache::new(12 * 4);

        // We expect 4 entries with a size of 12 bytes each to fully fit in the cache....
        lru.put("Hello0".to_owned(), ByteView::from("World0"));
        lru.put("Hello1".to_owned(), ByteView::from("World1"));
        lru.put("Hello2".to_owned(), ByteView::from("World2"));
        lru.put("Hello3".to_owned(), ByteView::from("World3"));
        assert_eq!(lru.len(), 4);
        assert_eq!(lru.allocated_memory(), 12 * 4);

        // If we remove an entry, the used memory is corrected...
        lru.remove("Hello0");
        assert_eq!(lru.len(), 3);
        assert_eq!(lru.allocated_memory(), 12 * 3);

        // If we replace an entry, the used memory is corrected...
        lru.put("Hello1".to_owned(), ByteView::default());
        assert_eq!(lru.allocated_memory(), 12 * 3 - 6);

        // Restore the original entry, so that the table as three entries with 12 bytes each...
        lru.put("Hello1".to_owned(), ByteView::from("World1"));
        assert_eq!(lru.allocated_memory(), 12 * 3);

        // If we now add an entry with is 13 bytes long, one entry has to be dropped and therefore
        // we end up with three remaining entries....
        lru.put("Hello0".to_owned(), ByteView::from("World01"));
        assert_eq!(lru.allocated_memory(), 12 * 3 + 1);
        assert_eq!(lru.len(), 3);
        // "Hello2" was the least recently touched/modified, so it will have been evicted to make
        // room for our new entry...
        assert_eq!(lru.get("Hello2"), None);
    }

    #[test]
    fn updates_also_enforce_the_budget() {
        let mut lru = LRUCache::new(20);
        lru.put("a".to_owned(), view(4));
        lru.put("b".to_owned(), view(4));

        // Growing "b" leaves no room for "a"...
        lru.put("b".to_owned(), view(15));
        assert_eq!(lru.get("a"), None);
        assert_eq!(lru.get("b"), Some(&view(15)));
        assert_eq!(lru.allocated_memory(), 16);
    }

    #[test]
    fn oversized_entries_are_accepted_but_churned_out() {
        let mut lru = LRUCache::new(10);
        lru.put("small".to_owned(), view(2));

        lru.put("huge".to_owned(), view(64));
        assert_eq!(lru.get("huge"), None);
        assert_eq!(lru.get("small"), None);
        assert_eq!(lru.is_empty(), true);
        assert_eq!(lru.allocated_memory(), 0);
    }

    #[test]
    fn a_budget_of_zero_caches_nothing() {
        let mut lru = LRUCache::new(0);
        lru.put("a".to_owned(), view(1));
        assert_eq!(lru.get("a"), None);
        assert_eq!(lru.allocated_memory(), 0);
        assert_eq!(lru.evictions(), 1);
    }

    #[test]
    fn accounting_matches_the_resident_entries() {
        let mut lru = LRUCache::new(256);

        // A simple linear congruential generator provides a reproducible mix of operations...
        let mut seed: u32 = 17;
        let mut next = move || {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (seed >> 16) as usize
        };

        for _ in 0..10_000 {
            let key = format!("key{}", next() % 64);
            match next() % 4 {
                0 => {
                    let _ = lru.get(&key);
                }
                1 => lru.remove(&key),
                _ => lru.put(key, view(next() % 48)),
            }

            assert_eq!(lru.allocated_memory(), lru.recompute_memory());
            assert!(lru.allocated_memory() <= lru.max_memory());
        }
    }

    #[test]
    fn eviction_listener_sees_evicted_entries() {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut lru: LRUCache<ByteView> = LRUCache::with_eviction_listener(
            12,
            Box::new(move |key: &str, value: &ByteView| {
                tx.send((key.to_owned(), value.allocated_size())).unwrap()
            }),
        );

        lru.put("a".to_owned(), view(5));
        lru.put("b".to_owned(), view(5));
        lru.put("c".to_owned(), view(5));
        lru.remove("b");

        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![("a".to_owned(), 5)]);
    }

    #[test]
    fn metrics_are_computed_correctly() {
        let mut lru = LRUCache::new(10);

        // Write 3 values into the cache...
        lru.put("A".to_owned(), "A".to_owned());
        lru.put("B".to_owned(), "B".to_owned());
        lru.put("C".to_owned(), "C".to_owned());

        // Perform 4 reads, of which 3 hit a cache entry...
        assert_eq!(lru.get("A").is_some(), true);
        assert_eq!(lru.get("B").is_some(), true);
        assert_eq!(lru.get("C").is_some(), true);
        assert_eq!(lru.get("D").is_none(), true);

        // ... therefore we hat 3 writes, 4 reads of which 3 hit a value which
        // yields a hit rate of 75%
        assert_eq!(lru.writes(), 3);
        assert_eq!(lru.reads(), 4);
        assert_eq!(lru.hits(), 3);
        assert_eq!(lru.hit_rate().round() as i32, 75);

        // We know our keys and values consume 6 bytes...
        assert_eq!(lru.allocated_memory(), 6);
        assert_eq!(lru.total_allocated_memory() > lru.allocated_memory(), true);
        assert_eq!(lru.memory_utilization().round() as i32, 60);

        lru.flush();
        assert_eq!(lru.len(), 0);
        assert_eq!(lru.reads(), 0);
        assert_eq!(lru.allocated_memory(), 0);
    }
}
