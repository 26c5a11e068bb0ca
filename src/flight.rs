//! Collapses concurrent loads of the same key into a single execution.
//!
//! When a key is missing in a cache, many callers tend to ask for it at the very same time (e.g.
//! right after a node started). A [Flight](Flight) ensures that only the first caller (the
//! leader) actually resolves the key. All callers arriving while this resolution is in progress
//! (the waiters) simply wait for the outcome and receive a clone of it. Note that the outcome is
//! shared as it is, therefore an error is handed to all waiters as well.
//!
//! Once the leader has completed, the key is forgotten. Any later call performs a new resolution,
//! as keeping results around is the job of the surrounding cache.
//!
//! If the leader is cancelled (its future is dropped) before producing a result, the key is
//! released and the waiters start over. One of them becomes the new leader.
//!
//! # Examples
//! ```
//! # use geecache::flight::Flight;
//! # use std::time::Duration;
//! # #[tokio::main]
//! # async fn main() {
//! let flight = Flight::new();
//!
//! let (a, b) = tokio::join!(
//!     flight.run("answer", || async {
//!         tokio::time::sleep(Duration::from_millis(10)).await;
//!         42
//!     }),
//!     flight.run("answer", || async { 41 })
//! );
//!
//! // The second call joined the first one...
//! assert_eq!(a, 42);
//! assert_eq!(b, 42);
//! # }
//! ```
use std::collections::HashMap;
use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::watch;

/// Deduplicates concurrent resolutions per key.
pub struct Flight<T> {
    calls: Mutex<HashMap<String, watch::Receiver<Option<T>>>>,
}

/// Removes the registration of a leader once it completes or is cancelled.
struct Leadership<'a, T> {
    calls: &'a Mutex<HashMap<String, watch::Receiver<Option<T>>>>,
    key: &'a str,
}

impl<T> Drop for Leadership<'_, T> {
    fn drop(&mut self) {
        let _ = self.calls.lock().remove(self.key);
    }
}

impl<T: Clone> Flight<T> {
    /// Creates a new flight without any resolution in progress.
    pub fn new() -> Self {
        Flight {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves the given key or joins a resolution which is already in progress.
    ///
    /// **resolve** is only invoked if this call becomes the leader for the key. The returned
    /// value is either the one computed by **resolve** or the one computed by the leader this
    /// call joined.
    pub async fn run<F, Fut>(&self, key: &str, resolve: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let publisher = loop {
            let receiver = {
                let mut calls = self.calls.lock();
                match calls.get(key) {
                    Some(receiver) => receiver.clone(),
                    None => {
                        let (publisher, receiver) = watch::channel(None);
                        let _ = calls.insert(key.to_owned(), receiver);
                        break publisher;
                    }
                }
            };

            if let Some(value) = Flight::await_outcome(receiver).await {
                return value;
            }

            log::debug!("Leader for '{}' vanished without a result. Retrying...", key);
        };

        let leadership = Leadership {
            calls: &self.calls,
            key,
        };
        let value = resolve().await;

        // New callers now start their own resolution, whereas everyone who already joined
        // receives the value below...
        std::mem::drop(leadership);
        let _ = publisher.send_replace(Some(value.clone()));

        value
    }

    /// Waits for the leader to publish its outcome.
    ///
    /// Yields **None** if the leader was dropped before publishing anything.
    async fn await_outcome(mut receiver: watch::Receiver<Option<T>>) -> Option<T> {
        match receiver.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        }
    }

    /// Returns the number of keys currently being resolved.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}

impl<T: Clone> Default for Flight<T> {
    fn default() -> Self {
        Flight::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::flight::Flight;
    use crate::testing::test_async;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn concurrent_calls_share_one_resolution() {
        test_async(async {
            let flight = Flight::new();
            let counter = AtomicUsize::new(0);
            let resolutions = &counter;

            let resolve = move || async move {
                let _ = resolutions.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                "630".to_owned()
            };

            let (a, b, c) = tokio::join!(
                flight.run("Tom", resolve),
                flight.run("Tom", resolve),
                flight.run("Tom", resolve)
            );

            assert_eq!(resolutions.load(Ordering::SeqCst), 1);
            assert_eq!(a, "630");
            assert_eq!(b, "630");
            assert_eq!(c, "630");
            assert_eq!(flight.in_flight(), 0);
        });
    }

    #[test]
    fn different_keys_are_resolved_independently() {
        test_async(async {
            let flight = Flight::new();
            let (a, b) = tokio::join!(
                flight.run("a", || async { 1 }),
                flight.run("b", || async { 2 })
            );

            assert_eq!(a, 1);
            assert_eq!(b, 2);
        });
    }

    #[test]
    fn completed_calls_are_forgotten() {
        test_async(async {
            let flight = Flight::new();
            let counter = AtomicUsize::new(0);
            let resolutions = &counter;

            for _ in 0..3 {
                let value = flight
                    .run("key", move || async move {
                        resolutions.fetch_add(1, Ordering::SeqCst) + 1
                    })
                    .await;
                assert_eq!(value, resolutions.load(Ordering::SeqCst));
            }

            assert_eq!(resolutions.load(Ordering::SeqCst), 3);
        });
    }

    #[test]
    fn errors_are_shared_with_all_waiters() {
        test_async(async {
            let flight: Flight<Result<i32, String>> = Flight::new();

            let (a, b) = tokio::join!(
                flight.run("key", || async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err("boom".to_owned())
                }),
                flight.run("key", || async { Ok(1) })
            );

            assert_eq!(a, Err("boom".to_owned()));
            assert_eq!(b, Err("boom".to_owned()));
        });
    }

    #[test]
    fn waiters_take_over_if_the_leader_is_cancelled() {
        test_async(async {
            let flight = Arc::new(Flight::new());

            let leader = {
                let flight = flight.clone();
                tokio::spawn(async move {
                    flight
                        .run("key", || async {
                            tokio::time::sleep(Duration::from_secs(60)).await;
                            1
                        })
                        .await
                })
            };
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert_eq!(flight.in_flight(), 1);

            let waiter = {
                let flight = flight.clone();
                tokio::spawn(async move { flight.run("key", || async { 2 }).await })
            };
            tokio::time::sleep(Duration::from_millis(20)).await;

            // Cancelling the leader releases the key so that the waiter resolves it itself...
            leader.abort();
            assert_eq!(waiter.await.unwrap(), 2);
            assert_eq!(flight.in_flight(), 0);
        });
    }
}
