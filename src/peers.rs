//! Defines the capabilities a [Group](crate::group::Group) needs to talk to other nodes.
//!
//! Selecting the owner of a key and fetching a value from a specific peer are kept apart:
//! A [PeerPicker](PeerPicker) knows the topology of the cluster and hands out a
//! [PeerGetter](PeerGetter) for each remote peer. The getter then performs the actual network
//! round-trip. [HttpPool](crate::http::HttpPool) implements both roles on top of HTTP.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::proto::{Request, Response};

/// Contains the time a peer has to answer unless configured otherwise.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Determines which peer owns a key.
pub trait PeerPicker: Send + Sync {
    /// Returns the getter for the peer owning the given key.
    ///
    /// Returns **None** if the key is owned by the local node (or if there are no peers at all),
    /// in which case the value has to be computed locally.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;

    /// Returns the maximal duration to wait for a peer to answer.
    fn fetch_timeout(&self) -> Duration {
        DEFAULT_FETCH_TIMEOUT
    }
}

/// Fetches values from one specific peer.
#[async_trait]
pub trait PeerGetter: Send + Sync {
    /// Asks the peer for the value of the given key.
    ///
    /// If the peer doesn't answer within **timeout**, an error is returned.
    async fn get(&self, request: &Request, timeout: Duration) -> anyhow::Result<Response>;

    /// Returns the name of the peer, used for logging.
    fn peer(&self) -> &str;
}
