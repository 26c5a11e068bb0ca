//! Provides the HTTP binding of the peer protocol.
//!
//! Each node exposes its groups under a common base path (**/geecache** by default). A value is
//! requested via `GET <base_path>/<group>/<key>` where both, the group and the key are percent
//! encoded. The response body is a [Response](crate::proto::Response) message which is sent as
//! **application/octet-stream**.
//!
//! | Status | Meaning                                         |
//! |--------|-------------------------------------------------|
//! | 200    | The body contains the encoded value.            |
//! | 400    | The path is malformed or the key is empty.      |
//! | 404    | The group is unknown.                           |
//! | 405    | Another method than GET or HEAD was used.       |
//! | 500    | The loader failed, the body contains the error. |
//!
//! Additionally **/_stats** renders a plain text overview of all groups and the current peers.
//!
//! The [HttpPool](HttpPool) serves these requests and also acts as
//! [PeerPicker](crate::peers::PeerPicker): it places all peers on a [HashRing](HashRing) and
//! hands out an [HttpGetter](HttpGetter) for the owner of a key (unless it is the local node).
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Client, Method, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use parking_lot::Mutex;
use urlencoding::{decode, encode};

use crate::config::Handle;
use crate::fmt::{format_duration, format_short_duration, format_size};
use crate::group::Groups;
use crate::node::Node;
use crate::peers::{PeerGetter, PeerPicker, DEFAULT_FETCH_TIMEOUT};
use crate::proto;
use crate::ring::HashRing;
use crate::Error;

/// Contains the path prefix under which groups are served unless configured otherwise.
pub const DEFAULT_BASE_PATH: &str = "/geecache";

/// Contains the number of virtual nodes per peer unless configured otherwise.
pub const DEFAULT_REPLICAS: usize = 50;

/// Contains the path of the statistics page.
pub const STATS_PATH: &str = "/_stats";

type HttpsClient = Client<HttpsConnector<HttpConnector>>;

/// Contains the peer related part of the config (**peers.***).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerSettings {
    /// Contains the base URL of the local node as it appears in the list of nodes.
    pub self_url: String,

    /// Contains the path prefix under which groups are served.
    pub base_path: String,

    /// Contains the number of virtual nodes per peer.
    pub replicas: usize,

    /// Contains the time a peer has to answer.
    pub timeout: Duration,

    /// Contains the base URLs of all nodes of the cluster.
    pub nodes: Vec<String>,
}

impl PeerSettings {
    /// Reads the settings from the given config, using defaults for absent values.
    ///
    /// If **peers.self** is absent, `http://localhost:<server.port>` is used.
    pub fn from_config(handle: &Handle) -> Self {
        PeerSettings {
            self_url: handle
                .string("peers.self")
                .map(str::to_owned)
                .unwrap_or_else(|| format!("http://localhost:{}", crate::server::port(handle))),
            base_path: handle
                .string("peers.base_path")
                .unwrap_or(DEFAULT_BASE_PATH)
                .to_owned(),
            replicas: handle
                .query("peers.replicas")
                .as_i64()
                .filter(|replicas| *replicas > 0)
                .map(|replicas| replicas as usize)
                .unwrap_or(DEFAULT_REPLICAS),
            timeout: handle.duration("peers.timeout", DEFAULT_FETCH_TIMEOUT),
            nodes: handle.strings("peers.nodes"),
        }
    }
}

struct PeerState {
    nodes: Vec<String>,
    ring: HashRing,
    getters: HashMap<String, Arc<HttpGetter>>,
}

/// Serves the groups of a node via HTTP and picks peers for keys owned by other nodes.
///
/// # Examples
/// ```
/// # use geecache::group::Groups;
/// # use geecache::http::HttpPool;
/// # use geecache::peers::PeerPicker;
/// let pool = HttpPool::new("http://localhost:8001", Groups::new()).with_replicas(10);
/// pool.set(["http://localhost:8001", "http://localhost:8002"]);
///
/// // Keys are either handled locally or by the other peer...
/// match pool.pick_peer("Tom") {
///     Some(peer) => assert_eq!(peer.peer(), "http://localhost:8002"),
///     None => (),
/// }
/// ```
pub struct HttpPool {
    self_url: String,
    base_path: String,
    replicas: usize,
    timeout: Duration,
    groups: Arc<Groups>,
    client: HttpsClient,
    state: Mutex<PeerState>,
}

impl HttpPool {
    /// Creates a new pool for the node reachable via **self_url** serving the given groups.
    ///
    /// Initially there are no peers, use [set](HttpPool::set) to provide them.
    pub fn new(self_url: impl Into<String>, groups: Arc<Groups>) -> Self {
        let self_url = self_url.into();
        HttpPool {
            self_url: self_url.trim_end_matches('/').to_owned(),
            base_path: DEFAULT_BASE_PATH.to_owned(),
            replicas: DEFAULT_REPLICAS,
            timeout: DEFAULT_FETCH_TIMEOUT,
            groups,
            client: Client::builder().build::<_, Body>(HttpsConnector::new()),
            state: Mutex::new(PeerState {
                nodes: Vec::new(),
                ring: HashRing::new(DEFAULT_REPLICAS),
                getters: HashMap::new(),
            }),
        }
    }

    /// Creates a pool as described by the given settings and applies its list of nodes.
    pub fn from_settings(settings: &PeerSettings, groups: Arc<Groups>) -> Self {
        let pool = HttpPool::new(settings.self_url.as_str(), groups)
            .with_base_path(&settings.base_path)
            .with_replicas(settings.replicas)
            .with_timeout(settings.timeout);
        pool.set(&settings.nodes);

        pool
    }

    /// Specifies the path prefix under which groups are served.
    ///
    /// A missing leading slash is added, a trailing one is removed. The root path is kept as
    /// empty prefix, so that groups are served as `/<group>/<key>`.
    pub fn with_base_path(mut self, base_path: &str) -> Self {
        self.base_path = match base_path.trim_matches('/') {
            "" => String::new(),
            base_path => format!("/{}", base_path),
        };
        self
    }

    /// Specifies the number of virtual nodes per peer.
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self.state.get_mut().ring = HashRing::new(replicas);
        self
    }

    /// Specifies the time a peer has to answer.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the base URL of the local node.
    pub fn self_url(&self) -> &str {
        &self.self_url
    }

    /// Returns the path prefix under which groups are served.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Replaces the set of peers.
    ///
    /// The ring is rebuilt from scratch, therefore the owner of a key might change.
    pub fn set<I, S>(&self, nodes: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let nodes = nodes
            .into_iter()
            .map(|node| node.as_ref().trim_end_matches('/').to_owned())
            .collect::<Vec<_>>();

        let mut ring = HashRing::new(self.replicas);
        ring.add(&nodes);

        let getters = nodes
            .iter()
            .map(|node| {
                let getter = HttpGetter::new(node, &self.base_path, self.client.clone());
                (node.clone(), Arc::new(getter))
            })
            .collect();

        log::info!("[{}] Using peers: {}", self.self_url, nodes.join(", "));
        *self.state.lock() = PeerState {
            nodes,
            ring,
            getters,
        };
    }

    /// Returns the current set of peers.
    pub fn peers(&self) -> Vec<String> {
        self.state.lock().nodes.clone()
    }

    /// Handles an incoming HTTP request.
    ///
    /// This can directly be used as service function within a hyper server.
    pub async fn handle(&self, request: hyper::Request<Body>) -> hyper::Response<Body> {
        let watch = Instant::now();
        let path = request.uri().path().to_owned();

        let response = if path == STATS_PATH {
            text_response(StatusCode::OK, self.render_stats())
        } else if let Some(remainder) = path
            .strip_prefix(self.base_path.as_str())
            .and_then(|remainder| remainder.strip_prefix('/'))
        {
            self.serve_group_request(request.method(), remainder).await
        } else {
            text_response(StatusCode::NOT_FOUND, "not found")
        };

        log::debug!(
            "[{}] {} {} -> {} ({})",
            self.self_url,
            request.method(),
            path,
            response.status(),
            format_short_duration(watch.elapsed().as_micros() as u64)
        );

        response
    }

    async fn serve_group_request(&self, method: &Method, remainder: &str) -> hyper::Response<Body> {
        if method != Method::GET && method != Method::HEAD {
            return text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
        }

        // <base_path>/<group>/<key> is required...
        let parts = remainder.split('/').collect::<Vec<_>>();
        if parts.len() != 2 {
            return text_response(StatusCode::BAD_REQUEST, "bad request");
        }

        let (group_name, key) = match (decode(parts[0]), decode(parts[1])) {
            (Ok(group_name), Ok(key)) => (group_name, key),
            _ => return text_response(StatusCode::BAD_REQUEST, "bad request"),
        };
        if key.is_empty() {
            return text_response(StatusCode::BAD_REQUEST, Error::EmptyKey.to_string());
        }

        let group = match self.groups.find(&group_name) {
            Some(group) => group,
            None => {
                return text_response(
                    StatusCode::NOT_FOUND,
                    format!("no such group: {}", group_name),
                )
            }
        };
        group.record_server_request();

        match group.get(&key).await {
            Ok(value) => {
                let mut response =
                    hyper::Response::new(Body::from(proto::Response::from(value).encode()));
                let _ = response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/octet-stream"),
                );
                response
            }
            Err(error) => text_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
        }
    }

    fn render_stats(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(result, "Node:    {}", self.self_url);
        let _ = writeln!(result, "Peers:   {}", self.peers().join(", "));
        let _ = writeln!(result, "Timeout: {}", format_duration(self.timeout));
        let _ = writeln!(result);
        let _ = writeln!(
            result,
            "{:<20} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>12} {:>12}",
            "Group",
            "Gets",
            "Hits",
            "Loads",
            "Peer",
            "Peer Errs",
            "Local",
            "Local Errs",
            "Entries",
            "Memory"
        );
        let _ = writeln!(result, "{}", "-".repeat(132));

        for group in self.groups.all() {
            let stats = group.stats();
            let cache = group.cache_stats();
            let _ = writeln!(
                result,
                "{:<20} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>12} {:>12}",
                group.name(),
                stats.gets,
                stats.cache_hits,
                stats.loads_deduped,
                stats.peer_loads,
                stats.peer_errors,
                stats.local_loads,
                stats.local_load_errors,
                cache.entries,
                format!(
                    "{} / {}",
                    format_size(cache.allocated_memory),
                    format_size(cache.max_memory)
                )
            );
        }

        result
    }
}

impl PeerPicker for HttpPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let state = self.state.lock();
        let peer = state.ring.get(key)?;
        if peer == self.self_url {
            return None;
        }

        log::debug!("[{}] Pick peer {} for '{}'", self.self_url, peer, key);
        state
            .getters
            .get(peer)
            .map(|getter| getter.clone() as Arc<dyn PeerGetter>)
    }

    fn fetch_timeout(&self) -> Duration {
        self.timeout
    }
}

/// Fetches values from a peer via HTTP.
pub struct HttpGetter {
    peer: String,
    base_url: String,
    client: HttpsClient,
}

impl HttpGetter {
    fn new(peer: &str, base_path: &str, client: HttpsClient) -> Self {
        HttpGetter {
            peer: peer.to_owned(),
            base_url: format!("{}{}", peer, base_path),
            client,
        }
    }

    async fn fetch(&self, uri: Uri) -> anyhow::Result<proto::Response> {
        let response = self
            .client
            .get(uri)
            .await
            .context("Failed to send request")?;
        if response.status() != StatusCode::OK {
            return Err(anyhow::anyhow!("server returned {}", response.status()));
        }

        let body = hyper::body::to_bytes(response.into_body())
            .await
            .context("Failed to read response body")?;

        proto::Response::decode(&body).context("Failed to decode response body")
    }
}

#[async_trait]
impl PeerGetter for HttpGetter {
    async fn get(
        &self,
        request: &proto::Request,
        timeout: Duration,
    ) -> anyhow::Result<proto::Response> {
        let url = format!(
            "{}/{}/{}",
            self.base_url,
            encode(&request.group),
            encode(&request.key)
        );
        let uri = url
            .parse::<Uri>()
            .with_context(|| format!("Invalid url: {}", url))?;

        match tokio::time::timeout(timeout, self.fetch(uri)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "No response within {}",
                format_duration(timeout)
            )),
        }
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}

/// Re-applies the list of peers once the config of the given node changes.
///
/// Note that this is invoked by the [Builder](crate::builder::Builder).
pub fn run_peer_watcher(node: Arc<Node>) {
    let mut notifier = node.config().notifier();
    crate::spawn!(async move {
        while node.is_running() {
            match tokio::time::timeout(Duration::from_millis(500), notifier.recv()).await {
                Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => return,
                Ok(_) => {
                    let nodes = PeerSettings::from_config(&node.config().current()).nodes;
                    if nodes != node.pool().peers() {
                        node.pool().set(nodes);
                    }
                }
                // Timeout: re-check whether the node is still running...
                Err(_) => (),
            }
        }
    });
}

fn text_response(status: StatusCode, text: impl Into<String>) -> hyper::Response<Body> {
    let mut text = text.into();
    text.push('\n');

    let mut response = hyper::Response::new(Body::from(text));
    *response.status_mut() = status;
    let _ = response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));

    response
}
