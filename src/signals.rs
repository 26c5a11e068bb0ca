//! Installs a signal handler which terminates the node on CTRL+C or SIGHUP.
//!
//! Forks an async task which waits for either **CTRL+C** or **SIGHUP** and then invokes
//! [Node::terminate](crate::node::Node::terminate) on the given node. The server then closes its
//! socket and the main event loop returns.
use std::sync::Arc;

use tokio::signal::unix::SignalKind;

use crate::node::Node;

/// Installs a signal handler for the given node.
///
/// Note that this is automatically called by the [Builder](crate::builder::Builder) if enabled.
pub fn install(node: Arc<Node>) {
    crate::spawn!(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sig_hup = match tokio::signal::unix::signal(SignalKind::hangup()) {
            Ok(signal) => signal,
            Err(error) => {
                log::error!("Failed to install a handler for SIGHUP: {}", error);
                return;
            }
        };

        tokio::select! {
            _ = ctrl_c => {
                log::info!("Received CTRL-C. Shutting down...");
                node.terminate();
            },
            _ = sig_hup.recv() => {
                log::info!("Received SIGHUP. Shutting down...");
                node.terminate();
            }
        }
    });
}
