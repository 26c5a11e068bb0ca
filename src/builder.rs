//! Provides a builder which can be used to setup and initialize a cache node.
//!
//! A node consists of some mandatory parts (the groups and the pool of peers) and some optional
//! ones (logging, signal handling, a config file being observed). The builder permits to
//! selectively enable or disable the optional ones.
//!
//! # Example
//! Setting up a node with all features enabled:
//! ```no_run
//! # use geecache::builder::Builder;
//! # use geecache::group::getter_fn;
//! # use geecache::server::Server;
//! #[tokio::main]
//! async fn main() {
//!     // Enable all features and build the node...
//!     let node = Builder::new().enable_all().build().await;
//!
//!     // Register groups here...
//!     node.create_group("echo", 1024, getter_fn(|key| Ok(key.as_bytes().to_vec())));
//!
//!     // Start the main event loop of the server...
//!     Server::new(&node).event_loop().await;
//! }
//! ```
use std::sync::Arc;

use log::LevelFilter;

use crate::config::{Config, DEFAULT_CONFIG_FILE};
use crate::group::Groups;
use crate::http::{HttpPool, PeerSettings};
use crate::node::Node;
use crate::{init_logging, GEECACHE_REVISION, GEECACHE_VERSION};

/// Initializes a node by creating and wiring all its components.
pub struct Builder {
    setup_logging: bool,
    enable_signals: bool,
    setup_config: bool,
    config_file: String,
    settings: Option<String>,
    groups: Option<Arc<Groups>>,
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new()
    }
}

impl Builder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Builder {
            setup_logging: false,
            enable_signals: false,
            setup_config: false,
            config_file: DEFAULT_CONFIG_FILE.to_owned(),
            settings: None,
            groups: None,
        }
    }

    /// Enables all features.
    ///
    /// Note that using this method (and then maybe disabling selected components) is quite
    /// convenient, but be aware that new components which might be added in a library update
    /// will then also be enabled by default.
    pub fn enable_all(mut self) -> Self {
        self.setup_logging = true;
        self.enable_signals = true;
        self.setup_config = true;

        self
    }

    /// Enables the automatic setup of the logging system.
    ///
    /// Using this, we properly initialize **simplelog** to log to stdout.
    pub fn enable_logging(mut self) -> Self {
        self.setup_logging = true;
        self
    }

    /// Disables the automatic setup of the logging system after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_logging(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Installs a signal listener which terminates the node once **CTRL-C** or **SIGHUP**
    /// is received.
    ///
    /// For more details see: [signals](crate::signals)
    pub fn enable_signals(mut self) -> Self {
        self.enable_signals = true;
        self
    }

    /// Disables installing the signal listener after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_signals(mut self) -> Self {
        self.enable_signals = false;
        self
    }

    /// Loads the config file and observes it for changes.
    ///
    /// If disabled, the node starts with an empty config (or the one given via
    /// [with_settings](Builder::with_settings)). For more details see: [config](crate::config)
    pub fn enable_config(mut self) -> Self {
        self.setup_config = true;
        self
    }

    /// Disables loading and observing the config file after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_config(mut self) -> Self {
        self.setup_config = false;
        self
    }

    /// Selects the config file to load instead of **config/settings.yml**.
    pub fn with_config_file(mut self, file: impl Into<String>) -> Self {
        self.config_file = file.into();
        self
    }

    /// Provides the config as YAML string.
    ///
    /// This is applied after the config file has been loaded. Note however, that a change of the
    /// config file (if observed) will replace these settings.
    pub fn with_settings(mut self, settings: impl Into<String>) -> Self {
        self.settings = Some(settings.into());
        self
    }

    /// Specifies the registry of groups to serve instead of the process wide one.
    pub fn with_groups(mut self, groups: Arc<Groups>) -> Self {
        self.groups = Some(groups);
        self
    }

    /// Builds the [Node](crate::node::Node) with all the enabled components being set up.
    pub async fn build(self) -> Arc<Node> {
        if self.setup_logging {
            init_logging(LevelFilter::Debug);
        }

        log::info!(
            "||. GEECACHE (v {} - rev {}) running on {} core(s) in {} CPU(s)",
            GEECACHE_VERSION,
            GEECACHE_REVISION,
            num_cpus::get(),
            num_cpus::get_physical()
        );

        let config = if self.setup_config {
            crate::config::install(&self.config_file).await
        } else {
            Arc::new(Config::new(&self.config_file))
        };

        if let Some(settings) = &self.settings {
            if let Err(error) = config.load_from_string(settings, None) {
                log::error!("Cannot apply the given settings: {:#}", error);
            }
        }

        let groups = self.groups.unwrap_or_else(Groups::global);
        let pool = Arc::new(HttpPool::from_settings(
            &PeerSettings::from_config(&config.current()),
            groups.clone(),
        ));

        let node = Node::new(config, groups, pool);

        crate::http::run_peer_watcher(node.clone());
        if self.setup_config {
            crate::config::run_config_change_monitor(node.clone());
        }

        if self.enable_signals {
            crate::signals::install(node.clone());
        }

        node
    }
}
