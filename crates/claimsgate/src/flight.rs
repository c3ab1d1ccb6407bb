//! Single-flight coalescing of concurrent identical operations
//!
//! The first caller for a key launches the operation on its own tokio task;
//! later callers for the same key join it and all of them observe the same
//! result, success or failure. Because the work runs on a spawned task, a
//! waiter that is cancelled (client disconnect) only stops waiting: the shared
//! operation carries on for everybody else.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::{AuthError, AuthResult};

type SharedResult<V> = Shared<BoxFuture<'static, AuthResult<V>>>;
type FlightMap<K, V> = Arc<Mutex<HashMap<K, SharedResult<V>>>>;

/// Group of in-flight operations keyed by `K`
pub(crate) struct SingleFlight<K, V> {
    in_flight: FlightMap<K, V>,
    /// Classifies a coalesced task that died without producing a result
    on_abort: fn(String) -> AuthError,
}

impl<K, V> std::fmt::Debug for SingleFlight<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(on_abort: fn(String) -> AuthError) -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            on_abort,
        }
    }

    /// Join the in-flight operation for `key`, or start one
    ///
    /// `check` runs under the group lock before anything is launched. An
    /// operation stores its result before it leaves the group, so a caller
    /// arriving after completion finds the stored value through `check`
    /// instead of starting a second operation.
    pub(crate) async fn run<C, F, Fut>(&self, key: K, check: C, operation: F) -> AuthResult<V>
    where
        C: FnOnce() -> Option<V>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AuthResult<V>> + Send + 'static,
    {
        let shared = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    if let Some(value) = check() {
                        return Ok(value);
                    }
                    let shared = self.launch(key.clone(), operation());
                    in_flight.insert(key, shared.clone());
                    shared
                }
            }
        };

        shared.await
    }

    /// Number of operations currently running
    pub(crate) fn len(&self) -> usize {
        self.in_flight.lock().len()
    }

    // Called with the group lock held, so the task cannot leave the group
    // before it has been inserted.
    fn launch<Fut>(&self, key: K, operation: Fut) -> SharedResult<V>
    where
        Fut: Future<Output = AuthResult<V>> + Send + 'static,
    {
        let guard = FlightGuard {
            key: Some(key),
            in_flight: Arc::clone(&self.in_flight),
        };
        let handle = tokio::spawn(async move {
            let _guard = guard;
            operation.await
        });

        let on_abort = self.on_abort;
        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(on_abort(format!("coalesced operation aborted: {e}"))),
            }
        }
        .boxed()
        .shared()
    }
}

/// Removes the flight from the group when the task finishes, even by panic
struct FlightGuard<K: Eq + Hash, V> {
    key: Option<K>,
    in_flight: FlightMap<K, V>,
}

impl<K: Eq + Hash, V> Drop for FlightGuard<K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.in_flight.lock().remove(&key);
        }
    }
}
