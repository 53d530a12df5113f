//! In-process key-value store with prefix watches.
//!
//! Used when no external store is configured, and by tests to drive the
//! subscriber with realistic register/teardown sequences.
//!
//! Writes and subscriptions share one lock, so a watcher sees the snapshot
//! taken at subscription time followed by exactly the changes made after it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::{ChangeStream, WatchClient, WatchError};
use crate::decoder::ChangeEvent;

/// Default capacity of the change broadcast channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
struct KvState {
    entries: BTreeMap<String, String>,
    /// `None` once the store is closed.
    events: Option<broadcast::Sender<ChangeEvent>>,
}

/// Cloneable handle to an in-memory key-value store.
#[derive(Debug, Clone)]
pub struct MemoryKv {
    state: Arc<Mutex<KvState>>,
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKv {
    /// Creates an empty store with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates an empty store whose watchers buffer up to `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            state: Arc::new(Mutex::new(KvState {
                entries: BTreeMap::new(),
                events: Some(sender),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, KvState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets `key` to `value` and notifies watchers.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        let (key, value) = (key.into(), value.into());
        let mut state = self.lock();
        state.entries.insert(key.clone(), value.clone());
        notify(&state, ChangeEvent::put(key, value));
    }

    /// Deletes `key`. Returns false if it did not exist.
    pub fn delete(&self, key: &str) -> bool {
        let mut state = self.lock();
        if state.entries.remove(key).is_none() {
            return false;
        }
        notify(&state, ChangeEvent::delete(key));
        true
    }

    /// Deletes every key under `prefix`, one notification per key.
    pub fn delete_prefix(&self, prefix: &str) -> usize {
        let mut state = self.lock();
        let keys: Vec<String> = keys_under(&state.entries, prefix).cloned().collect();
        for key in &keys {
            state.entries.remove(key);
            notify(&state, ChangeEvent::delete(key.as_str()));
        }
        keys.len()
    }

    /// Current value of `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().entries.get(key).cloned()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns true if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Closes the store; every open watch stream ends.
    pub fn close(&self) {
        self.lock().events = None;
    }
}

fn notify(state: &KvState, event: ChangeEvent) {
    if let Some(sender) = &state.events {
        // No watchers is fine.
        let _ = sender.send(event);
    }
}

fn keys_under<'a>(
    entries: &'a BTreeMap<String, String>,
    prefix: &'a str,
) -> impl Iterator<Item = &'a String> + 'a {
    entries
        .range(prefix.to_string()..)
        .map(|(key, _)| key)
        .take_while(move |key| key.starts_with(prefix))
}

impl WatchClient for MemoryKv {
    fn watch<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<ChangeStream, WatchError>> {
        let state = self.lock();
        let Some(sender) = &state.events else {
            return future::ready(Err(WatchError::StreamClosed)).boxed();
        };
        let receiver = sender.subscribe();
        let snapshot: Vec<Result<ChangeEvent, WatchError>> = keys_under(&state.entries, prefix)
            .map(|key| Ok(ChangeEvent::put(key.as_str(), state.entries[key].as_str())))
            .collect();
        drop(state);

        let live = stream::unfold(
            (receiver, prefix.to_string()),
            |(mut receiver, prefix)| async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) if event.key.starts_with(&prefix) => {
                            return Some((Ok(event), (receiver, prefix)));
                        }
                        Ok(_) => continue,
                        Err(RecvError::Lagged(missed)) => {
                            return Some((Err(WatchError::Lagged(missed)), (receiver, prefix)));
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            },
        );

        let stream: ChangeStream = stream::iter(snapshot).chain(live).boxed();
        future::ready(Ok(stream)).boxed()
    }
}
