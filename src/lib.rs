//! geecache is a peer-replicated, read-through cache.
//!
//! # Introduction
//! Callers ask a named [Group](group::Group) for the value of a key. The group answers from a
//! bounded, in-memory LRU cache. On a miss it determines, using a consistent hashing ring, which
//! node of the cluster owns the key. If another peer owns it, the value is fetched from that peer
//! over HTTP. Otherwise the application supplied [Getter](group::Getter) computes the value
//! locally, which is then placed in the cache so that subsequent requests are served from memory.
//!
//! Concurrent requests for the same missing key are collapsed into a single load (see
//! [flight](flight)), so that a cold key never hits the loader or a peer more than once per
//! node at a time.
//!
//! # Modules
//! * **LRU**: a byte size constrained cache ([lru::LRUCache]) and the mutex protected façade
//!   used per group ([lru::cache::SharedCache]).
//! * **Ring**: consistent hashing with virtual nodes to map keys onto peers ([ring::HashRing]).
//! * **Flight**: collapses concurrent loads of the same key ([flight::Flight]).
//! * **Group**: the orchestration of cache, peers and loader ([group::Group]) along with the
//!   registry of all groups ([group::Groups]).
//! * **Peers**: the capabilities to pick and to query peers ([peers]), a compact binary wire
//!   format ([proto]) and the HTTP binding of both ([http::HttpPool]).
//! * **Node**: ties config, registry and peer pool together and is served by the
//!   [Server](server::Server). Use the [Builder](builder::Builder) to set it up.
//!
//! # Example
//! ```
//! # use geecache::group::{getter_fn, Groups};
//! # #[tokio::main]
//! # async fn main() {
//! let groups = Groups::new();
//! let scores = groups.create(
//!     "scores",
//!     2048,
//!     getter_fn(|key| match key {
//!         "Tom" => Ok(b"630".to_vec()),
//!         _ => Err(anyhow::anyhow!("{} not exist", key)),
//!     }),
//! );
//!
//! assert_eq!(scores.get("Tom").await.unwrap().to_string(), "630");
//! assert!(scores.get("Kate").await.is_err());
//! # }
//! ```
#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod builder;
pub mod byteview;
pub mod config;
pub mod error;
pub mod flight;
pub mod fmt;
pub mod group;
pub mod http;
pub mod lru;
pub mod node;
pub mod peers;
pub mod proto;
pub mod ring;
pub mod server;
pub mod signals;

pub use byteview::ByteView;
pub use error::{Error, Result};

/// Contains the version of the geecache library.
pub const GEECACHE_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the geecache build being used.
pub const GEECACHE_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// Logs are written to stdout using the given level. Calling this more than once is fine, only the
/// first invocation has an effect.
///
/// Note that most probably the simplest way is to use a [Builder](builder::Builder) to set up a
/// node, which will also set up logging if enabled.
pub fn init_logging(level: LevelFilter) {
    static INIT_LOGGING: Once = Once::new();

    // Tests and nodes running side by side in one process would otherwise try to install
    // several loggers...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            level,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            eprintln!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async block within `tokio::spawn`.
///
/// The join handle is dropped on purpose, as the spawned task is expected to run detached.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate geecache;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}
