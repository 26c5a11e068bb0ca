use std::collections::HashMap;

use geecache::builder::Builder;
use geecache::group::getter_fn;
use geecache::server::Server;

/// Contains the budget of the demo group unless **groups.scores.max_memory** is configured.
const DEFAULT_SCORES_MEMORY: usize = 2048;

#[tokio::main]
async fn main() {
    // Build a node and enable all features...
    let node = Builder::new().enable_all().build().await;

    // Setup the demo group which is backed by a slow "database"...
    let db: HashMap<&'static str, &'static str> =
        [("Tom", "630"), ("Jack", "589"), ("Sam", "567")]
            .into_iter()
            .collect();

    let _ = node.create_group(
        "scores",
        DEFAULT_SCORES_MEMORY,
        getter_fn(move |key| {
            log::info!("[SlowDB] search key {}", key);
            db.get(key)
                .map(|score| score.as_bytes().to_vec())
                .ok_or_else(|| anyhow::anyhow!("{} not exist", key))
        }),
    );

    Server::new(&node).event_loop().await;
}
