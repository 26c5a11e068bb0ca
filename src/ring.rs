//! Provides consistent hashing to determine which peer owns a key.
//!
//! Each node is placed on a ring of 32-bit hashes several times ("virtual nodes" or replicas).
//! A key belongs to the node of the first virtual node whose hash is equal or greater than the
//! hash of the key. If there is no such virtual node, we wrap around and use the first one on the
//! ring.
//!
//! Placing each node several times smooths out the distribution of keys, which is especially
//! relevant for small clusters. A lookup is a binary search over all virtual nodes.
//!
//! # Examples
//! ```
//! # use geecache::ring::HashRing;
//! let mut ring = HashRing::new(3);
//! ring.add(["A", "B"]);
//!
//! let owner = ring.get("hello").unwrap().to_owned();
//! assert!(owner == "A" || owner == "B");
//!
//! // The mapping is stable as long as the ring isn't changed...
//! assert_eq!(ring.get("hello").unwrap(), owner);
//! ```
use std::collections::HashMap;

/// Computes the position of a key or virtual node on the ring.
pub type HashFn = fn(&[u8]) -> u32;

/// Maps keys onto a set of nodes using consistent hashing.
pub struct HashRing {
    hash: HashFn,
    replicas: usize,
    keys: Vec<u32>,
    nodes: HashMap<u32, String>,
}

impl HashRing {
    /// Creates an empty ring which places each node **replicas** times using CRC32 (IEEE).
    pub fn new(replicas: usize) -> Self {
        HashRing::with_hash(replicas, crc32fast::hash)
    }

    /// Creates an empty ring which uses the given hash function.
    ///
    /// All nodes of a cluster must use the same function (and replica count), as otherwise they
    /// would disagree on which node owns a key.
    pub fn with_hash(replicas: usize, hash: HashFn) -> Self {
        HashRing {
            hash,
            replicas,
            keys: Vec::new(),
            nodes: HashMap::new(),
        }
    }

    /// Places the given nodes on the ring.
    ///
    /// Virtual node **i** of a node named **n** is located at `hash("{i}{n}")`.
    pub fn add<I, S>(&mut self, nodes: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for node in nodes {
            let node = node.as_ref();
            for index in 0..self.replicas {
                let hash = (self.hash)(format!("{}{}", index, node).as_bytes());
                self.keys.push(hash);
                let _ = self.nodes.insert(hash, node.to_owned());
            }
        }

        self.keys.sort_unstable();
    }

    /// Determines the node which owns the given key.
    ///
    /// Returns **None** if the ring is empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }

        let hash = (self.hash)(key.as_bytes());
        let index = self.keys.partition_point(|candidate| *candidate < hash);
        let point = self.keys[index % self.keys.len()];

        self.nodes.get(&point).map(|node| node.as_str())
    }

    /// Returns the number of virtual nodes on the ring.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Determines if no node has been added yet.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns the number of virtual nodes placed per node.
    pub fn replicas(&self) -> usize {
        self.replicas
    }
}
