use std::future::Future;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::errors::ServiceError;

/// Collapses concurrent identical operations into one in-flight execution.
///
/// The first caller for a key runs the operation; every caller that arrives
/// while it is in flight awaits the same settled result instead of
/// re-executing. The entry is removed once the operation settles, success or
/// failure. Followers observe the leader's error as its message text.
pub struct RequestCoalescer<T: Clone + Send + 'static> {
    inflight: DashMap<String, broadcast::Sender<Result<T, String>>>,
}

impl<T: Clone + Send + 'static> Default for RequestCoalescer<T> {
    fn default() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }
}

impl<T: Clone + Send + 'static> RequestCoalescer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn execute<F, Fut>(&self, key: &str, op: F) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        // The subscribe happens while the map shard is held, so the leader's
        // removal (and subsequent send) cannot slip in between.
        let sender = match self.inflight.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                let mut rx = entry.get().subscribe();
                drop(entry);
                debug!(key, "coalesced onto in-flight operation");
                return match rx.recv().await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(message)) => Err(ServiceError::InternalError(message)),
                    Err(_) => Err(ServiceError::InternalError(
                        "coalesced operation settled without a result".to_string(),
                    )),
                };
            }
            Entry::Vacant(entry) => {
                let (tx, _rx) = broadcast::channel(1);
                entry.insert(tx.clone());
                tx
            }
        };

        let result = op().await;

        // Remove before broadcasting so a caller arriving after settlement
        // starts a fresh execution instead of hanging on a drained channel.
        self.inflight.remove(key);
        let shared = match &result {
            Ok(value) => Ok(value.clone()),
            Err(err) => Err(err.to_string()),
        };
        let _ = sender.send(shared);

        result
    }
}
