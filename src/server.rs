//! Contains the HTTP server of a node.
//!
//! Opens a server socket on the specified port (**server.port** in the config or 8001 as
//! fallback) and binds it to the selected IP (**server.host** in the config or 0.0.0.0 as
//! fallback). All incoming requests are handled by the [HttpPool](crate::http::HttpPool) of the
//! node.
//!
//! Note that the server periodically tries to bind the socket to the selected port. Therefore a
//! new instance can be started while the old one is still shutting down, and the port will be
//! handed through with minimal downtime. Also this listens to change events of the config and
//! will relocate to another port or host if changed.
//!
//! # Example
//!
//! ```no_run
//! use geecache::builder::Builder;
//! use geecache::group::getter_fn;
//! use geecache::server::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Setup and create a node...
//!     let node = Builder::new()
//!         .enable_all()
//!         .with_settings("
//!             server:
//!                 port: 8002
//!         ")
//!         .build()
//!         .await;
//!
//!     // Register the groups to serve...
//!     node.create_group("echo", 1024 * 1024, getter_fn(|key| Ok(key.as_bytes().to_vec())));
//!
//!     // Run the server until the node is terminated...
//!     Server::new(&node).event_loop().await;
//! }
//! ```
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hyper::server::conn::AddrIncoming;
use hyper::service::{make_service_fn, service_fn};
use parking_lot::Mutex;
use tokio::net::TcpListener;

use crate::config::Handle;
use crate::node::Node;
use crate::spawn;

/// Contains the port to listen on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 8001;

/// Contains the host to bind to unless configured otherwise.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Specifies the interval in which we retry to bind the server socket.
const BIND_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Specifies the interval in which a failure to bind the server socket is logged.
const BIND_ERROR_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Specifies the interval in which we check if the node is still running while serving.
const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Reads the port to listen on from the given config.
pub fn port(handle: &Handle) -> u16 {
    handle
        .query("server.port")
        .as_i64()
        .and_then(|port| u16::try_from(port).ok())
        .filter(|port| *port > 0)
        .unwrap_or(DEFAULT_PORT)
}

/// Reads the address to bind to from the given config.
pub fn address(handle: &Handle) -> String {
    format!(
        "{}:{}",
        handle.string("server.host").unwrap_or(DEFAULT_HOST),
        port(handle)
    )
}

/// Serves the groups of a node via HTTP.
pub struct Server {
    running: AtomicBool,
    current_address: Mutex<Option<String>>,
    node: Arc<Node>,
}

impl Server {
    /// Creates a new server for the given node.
    ///
    /// Note that this doesn't open the server socket. This is done by
    /// [event_loop](Server::event_loop).
    pub fn new(node: &Arc<Node>) -> Arc<Self> {
        Arc::new(Server {
            running: AtomicBool::new(false),
            current_address: Mutex::new(None),
            node: node.clone(),
        })
    }

    /// Determines if the server socket should keep listening.
    ///
    /// In contrast to **Node::is_running** this is not used to control the shutdown of the
    /// server. Rather we toggle this flag to false if a config and therefore address change was
    /// detected. This way the current socket is closed and a new one for the appropriate
    /// address is set up by the **event_loop**.
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns the address the server socket is currently bound to.
    pub fn current_address(&self) -> Option<String> {
        self.current_address.lock().clone()
    }

    fn address(&self) -> String {
        address(&self.node.config().current())
    }

    /// Starts the event loop in a separate task.
    ///
    /// This is most probably used by test scenarios where the tests itself run in the main task.
    pub fn fork(server: &Arc<Server>) {
        let cloned_server = server.clone();
        spawn!(async move {
            cloned_server.event_loop().await;
        });
    }

    /// Starts the event loop in a separate task and waits until the server socket is open.
    ///
    /// Just like **fork** this is intended to be used in test environments.
    pub async fn fork_and_await(server: &Arc<Server>) {
        Server::fork(server);

        while server.current_address().is_none() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Tries to open a server socket on the configured address and serves incoming requests.
    ///
    /// This returns once the node is terminated. If the configured address changes, the socket
    /// is closed and re-opened on the new address.
    pub async fn event_loop(&self) {
        let mut address = String::new();
        let mut last_bind_error_reported: Option<Instant> = None;

        while self.node.is_running() {
            // If the sever is started for the first time or if it has been restarted due to a
            // config change, we need to reload the address...
            if !self.is_running() {
                address = self.address();
                self.running.store(true, Ordering::Release);
            }

            match Server::bind(&address).await {
                Ok(incoming) => {
                    log::info!("Opened server socket on {}...", &address);
                    *self.current_address.lock() = Some(address.clone());
                    self.serve(incoming).await;
                    *self.current_address.lock() = None;
                    log::info!("Closing server socket on {}.", &address);
                }
                Err(error) => {
                    // We retry every 500ms but only log every once in a while...
                    if last_bind_error_reported
                        .map(|reported| reported.elapsed() > BIND_ERROR_REPORT_INTERVAL)
                        .unwrap_or(true)
                    {
                        log::error!(
                            "Cannot open server address {}: {:#}. Retrying every 500ms...",
                            &address,
                            error
                        );
                        last_bind_error_reported = Some(Instant::now());
                    }
                    tokio::time::sleep(BIND_RETRY_INTERVAL).await;
                }
            }
        }
    }

    async fn bind(address: &str) -> anyhow::Result<AddrIncoming> {
        let listener = TcpListener::bind(address).await?;
        let mut incoming = AddrIncoming::from_listener(listener)?;
        incoming.set_nodelay(true);

        Ok(incoming)
    }

    async fn serve(&self, incoming: AddrIncoming) {
        let pool = self.node.pool().clone();
        let make_service = make_service_fn(move |_| {
            let pool = pool.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |request| {
                    let pool = pool.clone();
                    async move { Ok::<_, Infallible>(pool.handle(request).await) }
                }))
            }
        });

        if let Err(error) = hyper::Server::builder(incoming)
            .serve(make_service)
            .with_graceful_shutdown(self.await_shutdown())
            .await
        {
            log::error!("The server terminated unexpectedly: {}", error);
        }
    }

    /// Completes once the node is terminated or the configured address changed.
    async fn await_shutdown(&self) {
        let mut config_changed = self.node.config().notifier();

        while self.node.is_running() && self.is_running() {
            tokio::select! {
                // The node doesn't notify us when it is terminated, we therefore check
                // every once in a while...
                _ = tokio::time::sleep(SHUTDOWN_CHECK_INTERVAL) => (),
                _ = config_changed.recv() => {
                    let new_address = self.address();
                    let address_changed = self
                        .current_address
                        .lock()
                        .as_ref()
                        .map(|current_address| current_address != &new_address)
                        .unwrap_or(false);

                    if address_changed {
                        log::info!("Server address has changed. Restarting server socket...");

                        // Force the event_loop to re-evaluate the expected server address...
                        self.running.store(false, Ordering::Release);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::group::{getter_fn, Groups};
    use crate::ring::HashRing;
    use crate::server::Server;
    use crate::testing::test_async;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const NODES: [&str; 2] = ["http://127.0.0.1:1503", "http://127.0.0.1:1504"];

    fn settings(port: u16) -> String {
        format!(
            "
server:
    host: 127.0.0.1
    port: {port}
peers:
    self: http://127.0.0.1:{port}
    timeout: 2s
    nodes:
        - {}
        - {}
",
            NODES[0],
            NODES[1],
            port = port
        )
    }

    #[test]
    fn nodes_resolve_keys_through_each_other() {
        // We want exclusive access to the ports 1503 and 1504...
        log::info!("Acquiring shared resources...");
        let _guard = crate::testing::SHARED_TEST_RESOURCES.lock().unwrap();
        log::info!("Successfully acquired shared resources.");

        test_async(async {
            let loads = Arc::new(AtomicUsize::new(0));
            let mut nodes = Vec::new();
            for port in [1503, 1504] {
                let node = Builder::new()
                    .with_settings(&settings(port))
                    .with_groups(Groups::new())
                    .build()
                    .await;

                let loads = loads.clone();
                let _ = node.create_group(
                    "scores",
                    2048,
                    getter_fn(move |key| {
                        let _ = loads.fetch_add(1, Ordering::SeqCst);
                        match key {
                            "Tom" => Ok(b"630".to_vec()),
                            "Jack" => Ok(b"589".to_vec()),
                            "Sam" => Ok(b"567".to_vec()),
                            _ => Err(anyhow::anyhow!("{} not exist", key)),
                        }
                    }),
                );

                let server = Server::new(&node);
                Server::fork_and_await(&server).await;
                assert_eq!(
                    server.current_address(),
                    Some(format!("127.0.0.1:{}", port))
                );
                nodes.push(node);
            }

            let mut ring = HashRing::new(50);
            ring.add(NODES);

            // Every node delivers every value, but only the owner of a key invokes the loader...
            for _ in 0..2 {
                for (key, value) in [("Tom", "630"), ("Jack", "589"), ("Sam", "567")] {
                    for node in &nodes {
                        let scores = node.groups().find("scores").unwrap();
                        assert_eq!(scores.get(key).await.unwrap().to_string(), value);
                    }
                }
            }
            assert_eq!(loads.load(Ordering::SeqCst), 3);

            for (index, node) in nodes.iter().enumerate() {
                let stats = node.groups().find("scores").unwrap().stats();
                let owned = ["Tom", "Jack", "Sam"]
                    .iter()
                    .filter(|key| ring.get(key) == Some(NODES[index]))
                    .count();

                assert_eq!(stats.local_loads, owned);
                assert_eq!(stats.peer_loads, 2 * (3 - owned));
                assert_eq!(stats.peer_errors, 0);
            }

            // Loader errors are reported by the owner and end up as local error on the other
            // node...
            for node in &nodes {
                let scores = node.groups().find("scores").unwrap();
                assert!(scores.get("Kate").await.is_err());
            }

            for node in &nodes {
                node.terminate();
            }
        });
    }
}
