//! Provides a byte size constrained LRU Cache.
//!
//! An LRU cache drops the least recently used entry once it is about to grow beyond its memory
//! budget. The budget is expressed in bytes and each entry accounts for the length of its key plus
//! the size reported by its value via the [ByteSize](ByteSize) trait.
//!
//! [LRUCache](LRUCache) itself performs no synchronization. Each cache group therefore wraps its
//! engine in a [SharedCache](cache::SharedCache) which guards it with a mutex and only creates
//! it once the first value is stored.
pub mod cache;
mod lru_cache;

pub use lru_cache::ByteSize;
pub use lru_cache::EvictionListener;
pub use lru_cache::LRUCache;
