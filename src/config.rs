//! Contains the node configuration.
//!
//! The configuration is loaded from **config/settings.yml** (unless another file is selected via
//! [Builder::with_config_file](crate::builder::Builder::with_config_file)). The file is observed
//! and reloaded once a change is detected. Each user of the config should therefore attach itself
//! to the [Config::notifier](Config::notifier) and re-process the config once a change message is
//! received. This way the list of peers can be updated without restarting a node.
//!
//! Note that a [Handle](Handle) obtained via [Config::current](Config::current) should not be
//! kept around, as it isn't updated once a new config has been loaded.
//!
//! A complete config looks like this:
//! ```yaml
//! server:
//!     host: 0.0.0.0
//!     port: 8001
//! peers:
//!     self: http://localhost:8001
//!     base_path: /geecache
//!     replicas: 50
//!     timeout: 5s
//!     nodes:
//!         - http://localhost:8001
//!         - http://localhost:8002
//!         - http://localhost:8003
//! groups:
//!     scores:
//!         max_memory: 2k
//! ```
//!
//! # Examples
//!
//! ```
//! # use geecache::config::Config;
//! # use std::time::Duration;
//! let config = Config::new("settings.yml");
//! config.load_from_string("
//! peers:
//!     timeout: 250ms
//! groups:
//!     scores:
//!         max_memory: 2k
//! ", None).unwrap();
//!
//! let handle = config.current();
//! assert_eq!(handle.size("groups.scores.max_memory", 0), 2048);
//! assert_eq!(handle.duration("peers.timeout", Duration::from_secs(5)), Duration::from_millis(250));
//!
//! // Absent values yield the given default...
//! assert_eq!(handle.size("groups.animals.max_memory", 1024), 1024);
//! ```
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use arc_swap::ArcSwap;
use yaml_rust::{Yaml, YamlLoader};

use crate::node::Node;

/// Contains the config file being used unless another one is selected.
pub const DEFAULT_CONFIG_FILE: &str = "config/settings.yml";

/// Provides access to the node configuration.
pub struct Config {
    filename: String,
    tx: tokio::sync::broadcast::Sender<()>,
    config: ArcSwap<(Yaml, Option<SystemTime>)>,
}

/// Represents the change listener.
///
/// The message being broadcast carries no information. All that matters is, once a message has
/// been received, the config was changed and needs to be re-processed.
pub type ChangeNotifier = tokio::sync::broadcast::Receiver<()>;

/// Represents a handle to the currently loaded configuration.
pub struct Handle {
    config: Arc<(Yaml, Option<SystemTime>)>,
}

impl Config {
    /// Creates a new and empty config which is backed by the given file.
    ///
    /// Note that this doesn't read the file. Use [load](Config::load) or [install](install) for
    /// this.
    pub fn new(file: &str) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(1);
        Config {
            filename: file.to_owned(),
            config: ArcSwap::new(Arc::new((Yaml::Hash(Default::default()), None))),
            tx,
        }
    }

    /// Returns the name of the underlying file.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Obtains a change notifier which receives a message once the config changed.
    pub fn notifier(&self) -> ChangeNotifier {
        self.tx.subscribe()
    }

    /// Obtains a handle to the currently loaded configuration.
    pub fn current(&self) -> Handle {
        Handle {
            config: self.config.load_full(),
        }
    }

    /// Determines the last modified date of the config file on disk.
    ///
    /// Directories (e.g. an unmounted docker volume) are treated as absent.
    #[cfg(not(test))]
    async fn last_modified(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .filter(|meta| meta.is_file())
            .and_then(|meta| meta.modified().ok())
    }

    /// Reads the underlying file.
    ///
    /// A missing file isn't an error, the node then simply runs with its defaults.
    pub async fn load(&self) -> anyhow::Result<()> {
        match tokio::fs::metadata(&self.filename).await {
            Ok(metadata) if metadata.is_file() => (),
            _ => {
                log::info!(
                    "Config file {} doesn't exist - using defaults.",
                    &self.filename
                );
                return Ok(());
            }
        }

        log::info!("Loading config file {}...", &self.filename);
        let config_data = tokio::fs::read_to_string(&self.filename)
            .await
            .with_context(|| format!("Cannot load config file {}", &self.filename))?;

        let last_modified = tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .and_then(|metadata| metadata.modified().ok());

        self.load_from_string(config_data.as_str(), last_modified)
    }

    /// Writes the given config into the underlying file.
    ///
    /// The data is verified before it is written, so that an invalid config never replaces a
    /// valid one. Note that this doesn't apply the config, this is done by the change monitor
    /// (or by invoking [load](Config::load)).
    ///
    /// # Example
    ///
    /// ```
    /// # use geecache::config::Config;
    /// # #[tokio::main]
    /// # async fn main() {
    /// let config = Config::new("geecache_test_config.yml");
    ///
    /// assert!(config.store("
    /// server:
    ///     port: 12345
    /// ").await.is_ok());
    ///
    /// assert!(config.load().await.is_ok());
    /// assert_eq!(config.current().query("server.port").as_i64(), Some(12345));
    ///
    /// // Writing an invalid config file is prevented...
    /// assert!(config.store("server: \"test").await.is_err());
    ///
    /// // Therefore the original config is still present...
    /// assert!(config.load().await.is_ok());
    /// assert_eq!(config.current().query("server.port").as_i64(), Some(12345));
    /// # let _ = std::fs::remove_file("geecache_test_config.yml");
    /// # }
    /// ```
    pub async fn store(&self, config: &str) -> anyhow::Result<()> {
        log::info!(
            "Programmatically updating the config file {}...",
            &self.filename
        );

        let _ = YamlLoader::load_from_str(config).context("Cannot parse config data")?;
        tokio::fs::write(&self.filename, config)
            .await
            .context("Failed to write to config file!")?;
        log::info!("Config has been updated successfully!");

        Ok(())
    }

    /// Loads a configuration from the given string instead of a file.
    ///
    /// If the data cannot be parsed, an error is returned and the previous config remains
    /// active. Otherwise all change listeners are notified.
    pub fn load_from_string(
        &self,
        data: &str,
        last_modified: Option<SystemTime>,
    ) -> anyhow::Result<()> {
        let docs = YamlLoader::load_from_str(data)
            .with_context(|| format!("Cannot parse config file {}", &self.filename))?;

        let doc = match docs.into_iter().next() {
            Some(doc @ Yaml::Hash(_)) => doc,
            _ => Yaml::Hash(Default::default()),
        };

        self.config.store(Arc::new((doc, last_modified)));

        // Notify all listeners - we ignore if there are none...
        let _ = self.tx.send(());

        Ok(())
    }
}

impl Handle {
    /// Provides access to the root of the currently loaded configuration.
    pub fn config(&self) -> &Yaml {
        &self.config.0
    }

    /// Resolves a dotted path like **server.port**.
    ///
    /// Returns **Yaml::BadValue** if any part of the path doesn't exist.
    pub fn query(&self, query: impl AsRef<str>) -> &Yaml {
        query
            .as_ref()
            .split('.')
            .fold(&self.config.0, |yaml, key| &yaml[key])
    }

    /// Reads a string value.
    pub fn string(&self, query: impl AsRef<str>) -> Option<&str> {
        self.query(query).as_str()
    }

    /// Reads a list of strings.
    ///
    /// A single string is treated as a list with one entry.
    pub fn strings(&self, query: impl AsRef<str>) -> Vec<String> {
        match self.query(query) {
            Yaml::Array(values) => values
                .iter()
                .filter_map(|value| value.as_str())
                .map(str::to_owned)
                .collect(),
            Yaml::String(value) => vec![value.clone()],
            _ => Vec::new(),
        }
    }

    /// Reads a size like "2k" (see [parse_size](crate::fmt::parse_size)) or a plain number.
    ///
    /// If the value is absent or invalid, the given default is used.
    pub fn size(&self, query: impl AsRef<str>, default: usize) -> usize {
        let query = query.as_ref();
        match self.query(query) {
            Yaml::Integer(value) => usize::try_from(*value).unwrap_or_else(|_| {
                log::warn!("Invalid size for {}: {}", query, value);
                default
            }),
            Yaml::String(value) => crate::fmt::parse_size(value).unwrap_or_else(|error| {
                log::warn!("Invalid size for {}: {}", query, error);
                default
            }),
            _ => default,
        }
    }

    /// Reads a duration like "5s" (see [parse_duration](crate::fmt::parse_duration)).
    ///
    /// Plain numbers are treated as milliseconds. If the value is absent or invalid, the given
    /// default is used.
    pub fn duration(&self, query: impl AsRef<str>, default: Duration) -> Duration {
        let query = query.as_ref();
        match self.query(query) {
            Yaml::Integer(value) if *value >= 0 => Duration::from_millis(*value as u64),
            Yaml::String(value) => crate::fmt::parse_duration(value).unwrap_or_else(|error| {
                log::warn!("Invalid duration for {}: {}", query, error);
                default
            }),
            _ => default,
        }
    }
}

/// Creates a config for the given file and reads its contents.
///
/// The directory of the file is created if necessary so that a config can be placed there later
/// on. Note that this is invoked by the [Builder](crate::builder::Builder) unless the config is
/// disabled.
pub async fn install(file: &str) -> Arc<Config> {
    if let Some(directory) = Path::new(file).parent().filter(|dir| !dir.as_os_str().is_empty()) {
        if let Err(error) = tokio::fs::create_dir_all(directory).await {
            log::warn!(
                "Failed to create config directory {}: {}",
                directory.to_string_lossy(),
                error
            )
        }
    }

    let config = Arc::new(Config::new(file));
    if let Err(error) = config.load().await {
        log::error!("{:#}", error);
    }

    config
}

/// Installs a monitor which reloads the config of the given node once its file changed.
///
/// The monitor checks the last modified date every 2s and only runs while the node is running.
#[cfg(not(test))]
pub fn run_config_change_monitor(node: Arc<Node>) {
    crate::spawn!(async move {
        let config = node.config().clone();
        while node.is_running() {
            tokio::time::sleep(Duration::from_secs(2)).await;

            // Contains the last modified date of the file or None if the file is absent...
            let last_modified = config.last_modified().await;

            // Contains the timestamp of the file which was loaded the last time or None if no
            // file has been loaded yet...
            let last_loaded = config.config.load().1;

            if last_modified.is_some() && (last_loaded.is_none() || last_modified > last_loaded) {
                match config.load().await {
                    Ok(_) => log::info!("Node configuration was re-loaded."),
                    Err(error) => log::error!("Failed to re-load node config: {:#}", error),
                }
            }
        }
    });
}

/// Installs a monitor which reloads the config of the given node once its file changed.
///
/// Tests provide their config programmatically, therefore no monitor is started.
#[cfg(test)]
pub fn run_config_change_monitor(_node: Arc<Node>) {}
