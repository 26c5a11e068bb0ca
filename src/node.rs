//! Keeps the central components of a running cache node together.
//!
//! A node consists of its [Config](crate::config::Config), the [Groups](crate::group::Groups)
//! it serves and the [HttpPool](crate::http::HttpPool) which connects it to its peers. Also this
//! keeps the central **is_running** flag which is toggled to *false* once
//! [Node::terminate](Node::terminate) is invoked. All background tasks (the server, the config
//! monitor, the peer watcher) observe this flag and exit once it is cleared.
//!
//! Use the [Builder](crate::builder::Builder) to create a node.
//!
//! # Examples
//!
//! ```
//! # use std::sync::Arc;
//! # use geecache::config::Config;
//! # use geecache::group::Groups;
//! # use geecache::http::HttpPool;
//! # use geecache::node::Node;
//! let groups = Groups::new();
//! let pool = Arc::new(HttpPool::new("http://localhost:8001", groups.clone()));
//! let node = Node::new(Arc::new(Config::new("settings.yml")), groups, pool);
//!
//! // By default the node is running...
//! assert_eq!(node.is_running(), true);
//!
//! // Once terminated...
//! node.terminate();
//!
//! // the node is no longer considered active...
//! assert_eq!(node.is_running(), false);
//! ```
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::group::{Getter, Group, Groups};
use crate::http::HttpPool;

/// Provides access to all components of a node.
pub struct Node {
    config: Arc<Config>,
    groups: Arc<Groups>,
    pool: Arc<HttpPool>,
    is_running: AtomicBool,
}

impl Node {
    /// Creates a new node from the given components.
    pub fn new(config: Arc<Config>, groups: Arc<Groups>, pool: Arc<HttpPool>) -> Arc<Self> {
        Arc::new(Node {
            config,
            groups,
            pool,
            is_running: AtomicBool::new(true),
        })
    }

    /// Returns the configuration of this node.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Returns the registry of groups served by this node.
    pub fn groups(&self) -> &Arc<Groups> {
        &self.groups
    }

    /// Returns the pool which serves the groups and picks peers.
    pub fn pool(&self) -> &Arc<HttpPool> {
        &self.pool
    }

    /// Creates a group which uses the peers of this node.
    ///
    /// The memory budget is read from **groups.<name>.max_memory** in the config. If absent,
    /// **default_max_memory** is used.
    pub fn create_group(
        &self,
        name: &str,
        default_max_memory: usize,
        getter: Arc<dyn Getter>,
    ) -> Arc<Group> {
        let max_memory = self
            .config
            .current()
            .size(format!("groups.{}.max_memory", name), default_max_memory);

        let group = self.groups.create(name, max_memory, getter);
        group.register_peers(self.pool.clone());

        group
    }

    /// Determines if the node is still running or if [Node::terminate](Node::terminate) has
    /// already been called.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Terminates the node.
    ///
    /// The server closes its socket and all background tasks exit eventually.
    pub fn terminate(&self) {
        log::info!("Terminating node {}...", self.pool.self_url());
        self.is_running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::group::{getter_fn, Groups};
    use crate::http::HttpPool;
    use crate::node::Node;
    use std::sync::Arc;

    #[test]
    fn groups_pick_up_their_budget_from_the_config() {
        let config = Arc::new(Config::new("settings.yml"));
        config
            .load_from_string("groups:\n    scores:\n        max_memory: 4k", None)
            .unwrap();
        let groups = Groups::new();
        let pool = Arc::new(HttpPool::new("http://localhost:8001", groups.clone()));
        let node = Node::new(config, groups, pool);

        let scores = node.create_group("scores", 64, getter_fn(|key| Ok(key.into())));
        let animals = node.create_group("animals", 64, getter_fn(|key| Ok(key.into())));

        assert_eq!(scores.cache_stats().max_memory, 4096);
        assert_eq!(animals.cache_stats().max_memory, 64);
        assert!(Arc::ptr_eq(&node.groups().find("scores").unwrap(), &scores));
    }
}
