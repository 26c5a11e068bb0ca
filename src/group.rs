//! Provides named cache groups which orchestrate cache, peers and loader.
//!
//! A [Group](Group) is a cache namespace with its own memory budget and its own loader (a
//! [Getter](Getter)). Asking a group for a key resolves it as follows:
//!
//! 1. If the key is present in the local cache, its value is returned immediately.
//! 2. Otherwise all concurrent requests for this key are collapsed into a single load (see
//!    [Flight](crate::flight::Flight)).
//! 3. If peers are registered and another peer owns the key, the value is fetched from that peer.
//!    The owner keeps the value in its cache, therefore we don't store it locally.
//! 4. If we own the key (or the peer failed to answer), the loader computes the value, which is
//!    then stored in the local cache.
//!
//! Groups are kept in a [Groups](Groups) registry so that they can be looked up by name (e.g. by
//! the [HttpPool](crate::http::HttpPool) when serving requests of peers). There is a process
//! wide registry ([Groups::global](Groups::global)), which is created on first use and lives as
//! long as the process does. Tests or embedded setups can use their own registry instead.
//!
//! # Examples
//! ```
//! # use geecache::group::{getter_fn, Groups};
//! # #[tokio::main]
//! # async fn main() {
//! let groups = Groups::new();
//! groups.create("squares", 1024, getter_fn(|key| {
//!     let number: u64 = key.parse()?;
//!     Ok((number * number).to_string().into_bytes())
//! }));
//!
//! let squares = groups.find("squares").unwrap();
//! assert_eq!(squares.get("12").await.unwrap().to_string(), "144");
//!
//! // The second call is served from the cache...
//! assert_eq!(squares.get("12").await.unwrap().to_string(), "144");
//! assert_eq!(squares.stats().cache_hits, 1);
//! assert_eq!(squares.stats().local_loads, 1);
//! # }
//! ```
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use crate::flight::Flight;
use crate::lru::cache::{CacheStats, SharedCache};
use crate::peers::{PeerGetter, PeerPicker};
use crate::proto::Request;
use crate::{ByteView, Error, Result};

/// Computes the value of a key if it isn't present in the cache.
///
/// The returned buffer is owned by the group afterwards, so that the caller can't modify the
/// cached value by accident.
#[async_trait]
pub trait Getter: Send + Sync {
    /// Loads the value for the given key.
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

struct FnGetter<F> {
    function: F,
}

#[async_trait]
impl<F> Getter for FnGetter<F>
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        (self.function)(key)
    }
}

/// Turns a plain (synchronous) function into a [Getter](Getter).
///
/// # Examples
/// ```
/// # use geecache::group::{getter_fn, Getter};
/// # #[tokio::main]
/// # async fn main() {
/// let getter = getter_fn(|key| Ok(key.to_uppercase().into_bytes()));
/// assert_eq!(getter.get("tom").await.unwrap(), b"TOM".to_vec());
/// # }
/// ```
pub fn getter_fn<F>(function: F) -> Arc<dyn Getter>
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
{
    Arc::new(FnGetter { function })
}

#[derive(Default)]
struct Counters {
    gets: AtomicUsize,
    cache_hits: AtomicUsize,
    peer_loads: AtomicUsize,
    peer_errors: AtomicUsize,
    loads: AtomicUsize,
    loads_deduped: AtomicUsize,
    local_loads: AtomicUsize,
    local_load_errors: AtomicUsize,
    server_requests: AtomicUsize,
}

fn inc(counter: &AtomicUsize) {
    let _ = counter.fetch_add(1, Ordering::Relaxed);
}

/// Provides a snapshot of the metrics of a [Group](Group).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Contains the number of calls to [Group::get](Group::get).
    pub gets: usize,

    /// Contains the number of calls which were answered from the local cache.
    pub cache_hits: usize,

    /// Contains the number of values successfully fetched from peers.
    pub peer_loads: usize,

    /// Contains the number of failed attempts to fetch a value from a peer.
    pub peer_errors: usize,

    /// Contains the number of cache misses (gets - cache_hits - invalid keys).
    pub loads: usize,

    /// Contains the number of loads which were actually performed after collapsing concurrent
    /// requests for the same key.
    pub loads_deduped: usize,

    /// Contains the number of invocations of the loader.
    pub local_loads: usize,

    /// Contains the number of loader invocations which failed.
    pub local_load_errors: usize,

    /// Contains the number of requests received from peers.
    pub server_requests: usize,
}

/// Represents a named cache namespace.
///
/// Use [Groups::create](Groups::create) (or [new_group](new_group)) to create a group.
pub struct Group {
    name: String,
    getter: Arc<dyn Getter>,
    main_cache: SharedCache,
    peers: OnceCell<Arc<dyn PeerPicker>>,
    loader: Flight<Result<ByteView>>,
    counters: Counters,
}

impl Group {
    fn new(name: String, max_memory: usize, getter: Arc<dyn Getter>) -> Self {
        Group {
            name,
            getter,
            main_cache: SharedCache::new(max_memory),
            peers: OnceCell::new(),
            loader: Flight::new(),
            counters: Counters::default(),
        }
    }

    /// Returns the name of this group.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Installs the peer picker used to determine the owner of a key.
    ///
    /// # Panics
    /// The topology of a group has to be set up once. Therefore this panics if peers have
    /// already been registered.
    pub fn register_peers(&self, peers: Arc<dyn PeerPicker>) {
        if self.peers.set(peers).is_err() {
            panic!(
                "register_peers called more than once for group '{}'",
                self.name
            );
        }
    }

    /// Fetches the value for the given key.
    ///
    /// The value is either taken from the local cache, fetched from the owning peer or computed
    /// by the loader. An empty key is rejected with [Error::EmptyKey](Error::EmptyKey).
    pub async fn get(&self, key: &str) -> Result<ByteView> {
        inc(&self.counters.gets);
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }

        if let Some(value) = self.main_cache.get(key) {
            inc(&self.counters.cache_hits);
            log::debug!("[{}] Cache hit for '{}'", self.name, key);
            return Ok(value);
        }

        self.load(key).await
    }

    async fn load(&self, key: &str) -> Result<ByteView> {
        inc(&self.counters.loads);
        self.loader
            .run(key, || async {
                inc(&self.counters.loads_deduped);

                if let Some(picker) = self.peers.get() {
                    if let Some(peer) = picker.pick_peer(key) {
                        match self.get_from_peer(peer.as_ref(), key, picker.fetch_timeout()).await {
                            Ok(value) => {
                                inc(&self.counters.peer_loads);
                                return Ok(value);
                            }
                            Err(error) => {
                                inc(&self.counters.peer_errors);
                                log::warn!(
                                    "[{}] Failed to get '{}' from peer {}: {:#}",
                                    self.name,
                                    key,
                                    peer.peer(),
                                    error
                                );
                            }
                        }
                    }
                }

                self.get_locally(key).await
            })
            .await
    }

    async fn get_from_peer(
        &self,
        peer: &dyn PeerGetter,
        key: &str,
        timeout: Duration,
    ) -> anyhow::Result<ByteView> {
        let request = Request::new(self.name.as_str(), key);
        let response = peer.get(&request, timeout).await?;

        Ok(ByteView::from(response))
    }

    async fn get_locally(&self, key: &str) -> Result<ByteView> {
        inc(&self.counters.local_loads);
        match self.getter.get(key).await {
            Ok(data) => {
                let value = ByteView::from(data);
                self.main_cache.put(key, value.clone());
                Ok(value)
            }
            Err(error) => {
                inc(&self.counters.local_load_errors);
                Err(Error::Loader {
                    group: self.name.clone(),
                    key: key.to_owned(),
                    message: format!("{:#}", error),
                })
            }
        }
    }

    /// Records that a peer asked this node for a value of this group.
    pub(crate) fn record_server_request(&self) {
        inc(&self.counters.server_requests);
    }

    /// Collects the current metrics of this group.
    pub fn stats(&self) -> GroupStats {
        let load = |counter: &AtomicUsize| counter.load(Ordering::Relaxed);

        GroupStats {
            gets: load(&self.counters.gets),
            cache_hits: load(&self.counters.cache_hits),
            peer_loads: load(&self.counters.peer_loads),
            peer_errors: load(&self.counters.peer_errors),
            loads: load(&self.counters.loads),
            loads_deduped: load(&self.counters.loads_deduped),
            local_loads: load(&self.counters.local_loads),
            local_load_errors: load(&self.counters.local_load_errors),
            server_requests: load(&self.counters.server_requests),
        }
    }

    /// Collects the current metrics of the local cache of this group.
    pub fn cache_stats(&self) -> CacheStats {
        self.main_cache.stats()
    }
}

/// Keeps all groups by name.
pub struct Groups {
    groups: RwLock<HashMap<String, Arc<Group>>>,
}

lazy_static::lazy_static! {
    static ref GLOBAL_GROUPS: Arc<Groups> = Groups::new();
}

impl Groups {
    /// Creates a new and empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Groups {
            groups: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the process wide registry.
    pub fn global() -> Arc<Groups> {
        GLOBAL_GROUPS.clone()
    }

    /// Creates a new group and registers it under its name.
    ///
    /// If there is already a group with the given name, it is replaced. Note that callers which
    /// still hold the previous group keep using it.
    pub fn create(
        &self,
        name: impl Into<String>,
        max_memory: usize,
        getter: Arc<dyn Getter>,
    ) -> Arc<Group> {
        let name = name.into();
        let group = Arc::new(Group::new(name.clone(), max_memory, getter));

        if self.groups.write().insert(name, group.clone()).is_some() {
            log::warn!(
                "A group named '{}' already existed and has been replaced.",
                group.name()
            );
        } else {
            log::debug!(
                "Created group '{}' with a budget of {}.",
                group.name(),
                crate::fmt::format_size(max_memory)
            );
        }

        group
    }

    /// Looks up the group with the given name.
    pub fn find(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.read().get(name).cloned()
    }

    /// Returns the names of all known groups in alphabetical order.
    pub fn names(&self) -> Vec<String> {
        let mut names = self.groups.read().keys().cloned().collect::<Vec<_>>();
        names.sort();

        names
    }

    /// Returns all known groups ordered by name.
    pub fn all(&self) -> Vec<Arc<Group>> {
        let mut groups = self.groups.read().values().cloned().collect::<Vec<_>>();
        groups.sort_by(|a, b| a.name.cmp(&b.name));

        groups
    }
}

/// Creates a group within the [global registry](Groups::global).
pub fn new_group(
    name: impl Into<String>,
    max_memory: usize,
    getter: Arc<dyn Getter>,
) -> Arc<Group> {
    GLOBAL_GROUPS.create(name, max_memory, getter)
}

/// Looks up a group within the [global registry](Groups::global).
pub fn get_group(name: &str) -> Option<Arc<Group>> {
    GLOBAL_GROUPS.find(name)
}

#[cfg(test)]
mod tests {
    use crate::group::{get_group, getter_fn, new_group, Getter, Groups};
    use crate::peers::{PeerGetter, PeerPicker};
    use crate::proto::{Request, Response};
    use crate::testing::test_async;
    use crate::Error;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Provides the score table used throughout the tests and counts each lookup per key.
    fn score_table(counts: Arc<parking_lot::Mutex<HashMap<String, usize>>>) -> Arc<dyn Getter> {
        getter_fn(move |key| {
            *counts.lock().entry(key.to_owned()).or_insert(0) += 1;
            match key {
                "Tom" => Ok(b"630".to_vec()),
                "Jack" => Ok(b"589".to_vec()),
                "Sam" => Ok(b"567".to_vec()),
                _ => Err(anyhow::anyhow!("{} not exist", key)),
            }
        })
    }

    struct SlowGetter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Getter for SlowGetter {
        async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(key.as_bytes().to_vec())
        }
    }

    /// Simulates a peer which owns every key except "local".
    struct FakePicker {
        peer: Arc<FakePeer>,
    }

    impl PeerPicker for FakePicker {
        fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
            if key == "local" {
                None
            } else {
                Some(self.peer.clone())
            }
        }

        fn fetch_timeout(&self) -> Duration {
            Duration::from_millis(250)
        }
    }

    struct FakePeer {
        healthy: bool,
        delay: Duration,
        requests: AtomicUsize,
    }

    #[async_trait]
    impl PeerGetter for FakePeer {
        async fn get(&self, request: &Request, timeout: Duration) -> anyhow::Result<Response> {
            let _ = self.requests.fetch_add(1, Ordering::SeqCst);
            assert_eq!(timeout, Duration::from_millis(250));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.healthy {
                Ok(Response::new(format!("{}/{}@peer", request.group, request.key)))
            } else {
                Err(anyhow::anyhow!("connection refused"))
            }
        }

        fn peer(&self) -> &str {
            "fake"
        }
    }

    fn fake_picker(healthy: bool) -> (Arc<FakePicker>, Arc<FakePeer>) {
        slow_fake_picker(healthy, Duration::ZERO)
    }

    fn slow_fake_picker(healthy: bool, delay: Duration) -> (Arc<FakePicker>, Arc<FakePeer>) {
        let peer = Arc::new(FakePeer {
            healthy,
            delay,
            requests: AtomicUsize::new(0),
        });

        (Arc::new(FakePicker { peer: peer.clone() }), peer)
    }

    #[test]
    fn values_are_loaded_once_and_then_cached() {
        test_async(async {
            let counts = Arc::new(parking_lot::Mutex::new(HashMap::new()));
            let groups = Groups::new();
            let scores = groups.create("scores", 2048, score_table(counts.clone()));

            for (key, value) in [("Tom", "630"), ("Jack", "589"), ("Sam", "567")] {
                assert_eq!(scores.get(key).await.unwrap().to_string(), value);
                assert_eq!(scores.get(key).await.unwrap().to_string(), value);
                assert_eq!(counts.lock()[key], 1);
            }

            let stats = scores.stats();
            assert_eq!(stats.gets, 6);
            assert_eq!(stats.cache_hits, 3);
            assert_eq!(stats.local_loads, 3);
            assert_eq!(scores.cache_stats().entries, 3);
        });
    }

    #[test]
    fn empty_keys_are_rejected() {
        test_async(async {
            let groups = Groups::new();
            let scores = groups.create("scores", 2048, score_table(Default::default()));

            assert_eq!(scores.get("").await, Err(Error::EmptyKey));
            assert_eq!(scores.stats().loads, 0);
        });
    }

    #[test]
    fn loader_errors_are_reported_but_not_cached() {
        test_async(async {
            let counts = Arc::new(parking_lot::Mutex::new(HashMap::new()));
            let groups = Groups::new();
            let scores = groups.create("scores", 2048, score_table(counts.clone()));

            for _ in 0..2 {
                match scores.get("unknown").await {
                    Err(Error::Loader {
                        group,
                        key,
                        message,
                    }) => {
                        assert_eq!(group, "scores");
                        assert_eq!(key, "unknown");
                        assert_eq!(message, "unknown not exist");
                    }
                    other => panic!("Unexpected result: {:?}", other),
                }
            }

            // Each call hit the loader again as nothing was cached...
            assert_eq!(counts.lock()["unknown"], 2);
            assert_eq!(scores.stats().local_load_errors, 2);
            assert_eq!(scores.cache_stats().entries, 0);
        });
    }

    #[test]
    fn concurrent_gets_invoke_the_loader_once() {
        test_async(async {
            let getter = Arc::new(SlowGetter {
                calls: AtomicUsize::new(0),
            });
            let groups = Groups::new();
            let group = groups.create("slow", 2048, getter.clone());

            let (a, b, c, d) = tokio::join!(
                group.get("key"),
                group.get("key"),
                group.get("key"),
                group.get("key")
            );

            assert_eq!(getter.calls.load(Ordering::SeqCst), 1);
            for result in [a, b, c, d] {
                assert_eq!(result.unwrap().as_slice(), b"key");
            }

            let stats = group.stats();
            assert_eq!(stats.loads, 4);
            assert_eq!(stats.loads_deduped, 1);
        });
    }

    #[test]
    fn budget_zero_means_uncached() {
        test_async(async {
            let counts = Arc::new(parking_lot::Mutex::new(HashMap::new()));
            let groups = Groups::new();
            let scores = groups.create("scores", 0, score_table(counts.clone()));

            assert_eq!(scores.get("Tom").await.unwrap().to_string(), "630");
            assert_eq!(scores.get("Tom").await.unwrap().to_string(), "630");
            assert_eq!(counts.lock()["Tom"], 2);
        });
    }

    #[test]
    fn values_owned_by_peers_are_fetched_remotely() {
        test_async(async {
            let counts = Arc::new(parking_lot::Mutex::new(HashMap::new()));
            let groups = Groups::new();
            let scores = groups.create("scores", 2048, score_table(counts.clone()));
            let (picker, peer) = fake_picker(true);
            scores.register_peers(picker);

            assert_eq!(scores.get("Tom").await.unwrap().to_string(), "scores/Tom@peer");
            // The owner caches the value, we don't...
            assert_eq!(scores.get("Tom").await.unwrap().to_string(), "scores/Tom@peer");
            assert_eq!(peer.requests.load(Ordering::SeqCst), 2);
            assert!(counts.lock().get("Tom").is_none());

            // Keys we own ourselves are loaded locally...
            assert!(scores.get("local").await.is_err());
            assert_eq!(counts.lock()["local"], 1);

            let stats = scores.stats();
            assert_eq!(stats.peer_loads, 2);
            assert_eq!(stats.peer_errors, 0);
            assert_eq!(stats.local_loads, 1);
        });
    }

    #[test]
    fn concurrent_gets_fetch_from_the_peer_once() {
        test_async(async {
            let counts = Arc::new(parking_lot::Mutex::new(HashMap::new()));
            let groups = Groups::new();
            let scores = groups.create("scores", 2048, score_table(counts.clone()));
            let (picker, peer) = slow_fake_picker(true, Duration::from_millis(50));
            scores.register_peers(picker);

            let (a, b, c, d) = tokio::join!(
                scores.get("Tom"),
                scores.get("Tom"),
                scores.get("Tom"),
                scores.get("Tom")
            );

            for result in [a, b, c, d] {
                assert_eq!(result.unwrap().to_string(), "scores/Tom@peer");
            }
            assert_eq!(peer.requests.load(Ordering::SeqCst), 1);
            assert!(counts.lock().get("Tom").is_none());

            let stats = scores.stats();
            assert_eq!(stats.loads, 4);
            assert_eq!(stats.loads_deduped, 1);
            assert_eq!(stats.peer_loads, 1);
            assert_eq!(stats.local_loads, 0);
        });
    }

    #[test]
    fn failing_peers_fall_back_to_the_loader() {
        test_async(async {
            let counts = Arc::new(parking_lot::Mutex::new(HashMap::new()));
            let groups = Groups::new();
            let scores = groups.create("scores", 2048, score_table(counts.clone()));
            let (picker, peer) = fake_picker(false);
            scores.register_peers(picker);

            assert_eq!(scores.get("Sam").await.unwrap().to_string(), "567");
            assert_eq!(peer.requests.load(Ordering::SeqCst), 1);
            assert_eq!(counts.lock()["Sam"], 1);

            // The locally computed value is cached...
            assert_eq!(scores.get("Sam").await.unwrap().to_string(), "567");
            assert_eq!(peer.requests.load(Ordering::SeqCst), 1);
            assert_eq!(scores.stats().peer_errors, 1);
        });
    }

    #[test]
    #[should_panic(expected = "register_peers called more than once")]
    fn registering_peers_twice_panics() {
        let groups = Groups::new();
        let scores = groups.create("scores", 2048, score_table(Default::default()));
        scores.register_peers(fake_picker(true).0);
        scores.register_peers(fake_picker(true).0);
    }

    #[test]
    fn registry_finds_and_replaces_groups() {
        let groups = Groups::new();
        assert!(groups.find("scores").is_none());

        let first = groups.create("scores", 2048, score_table(Default::default()));
        let _ = groups.create("animals", 2048, score_table(Default::default()));
        assert!(Arc::ptr_eq(&groups.find("scores").unwrap(), &first));
        assert_eq!(groups.names(), vec!["animals".to_owned(), "scores".to_owned()]);

        // Creating a group with an existing name replaces the previous one...
        let second = groups.create("scores", 1024, score_table(Default::default()));
        assert!(Arc::ptr_eq(&groups.find("scores").unwrap(), &second));
        assert_eq!(groups.all().len(), 2);
        assert_eq!(groups.find("scores").unwrap().cache_stats().max_memory, 1024);
    }

    #[test]
    fn global_registry_is_shared() {
        let group = new_group("group-tests-global", 64, score_table(Default::default()));
        assert!(Arc::ptr_eq(&get_group("group-tests-global").unwrap(), &group));
        assert!(Groups::global().names().contains(&"group-tests-global".to_owned()));
        assert!(get_group("group-tests-unknown").is_none());
    }
}
