//! Watch-driven synchronization of the registry.
//!
//! The [`WatchSubscriber`] owns one long-lived subscription to a key-value
//! change stream (through a [`WatchClient`]) and feeds every decoded event
//! into the [`Registry`].
//!
//! ## Lifecycle
//!
//! 1. [`WatchSubscriber::bootstrap`] applies the statically configured
//!    sources through the same `add` path as live updates.
//! 2. [`WatchSubscriber::run`] subscribes under the namespace prefix and
//!    applies events in arrival order until the stream ends (an error for
//!    the caller, never retried here) or the shutdown signal fires (a clean
//!    `Ok(())`).
//!
//! Each event is applied end-to-end (decode, then one registry call) before
//! the next is read, so cancellation never leaves a half-applied event.
//! Replayed events are harmless: `add` and `remove` are idempotent.

mod etcd;
mod memory;

pub use etcd::EtcdWatchClient;
pub use memory::MemoryKv;

use std::sync::Arc;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::decoder::{ChangeDecoder, ChangeEvent, Mutation};
use crate::namespace::WatchNamespace;
use crate::registry::Registry;
use crate::types::DocSource;

/// Stream of change events delivered by a [`WatchClient`].
pub type ChangeStream = BoxStream<'static, Result<ChangeEvent, WatchError>>;

/// Errors that terminate a watch subscription.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The namespace prefix is empty; nothing was subscribed.
    #[error("watch key prefix is empty")]
    EmptyPrefix,

    /// The change stream ended.
    #[error("watch stream closed")]
    StreamClosed,

    /// The subscriber fell behind and events were lost.
    #[error("watch stream lagged, {0} event(s) missed")]
    Lagged(u64),

    /// Transport failure talking to the key-value store.
    #[error("watch transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The key-value store sent something we could not interpret.
    #[error("watch protocol error: {0}")]
    Protocol(String),
}

/// Client side of an external key-value store that supports prefix watches.
///
/// Implementations deliver the current state under the prefix followed by
/// live changes. Reconnection and backoff, if any, are the implementation's
/// business; a stream that ends is final.
pub trait WatchClient: Send + Sync {
    /// Subscribes to every key under `prefix`.
    fn watch<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<ChangeStream, WatchError>>;
}

/// Applies static sources and live change events to the registry.
#[derive(Debug, Clone)]
pub struct WatchSubscriber {
    registry: Arc<Registry>,
    namespace: WatchNamespace,
    decoder: ChangeDecoder,
}

impl WatchSubscriber {
    /// Creates a subscriber for `namespace` writing into `registry`.
    pub fn new(registry: Arc<Registry>, namespace: WatchNamespace) -> Self {
        let decoder = ChangeDecoder::with_prefix(namespace.prefix());
        Self {
            registry,
            namespace,
            decoder,
        }
    }

    /// The namespace this subscriber watches.
    pub fn namespace(&self) -> &WatchNamespace {
        &self.namespace
    }

    /// Registers statically configured sources.
    ///
    /// `local_host` is the aggregator's own address; sources backed by a
    /// local file are registered under it.
    pub fn bootstrap(&self, sources: &[DocSource], local_host: &str) {
        for source in sources {
            if source.module.is_empty() {
                warn!(title = %source.title, "Skipping static doc source without module name");
                continue;
            }
            let (host, location) = source.registration(local_host);
            self.registry.add(
                &source.module,
                &host,
                &location,
                &source.debug_origin,
                &source.title,
            );
            debug!(module = %source.module, host = %host, "Static doc source added");
        }
        info!(count = sources.len(), "Static doc sources applied");
    }

    /// Decodes and applies one event. Malformed events are logged and dropped.
    ///
    /// Returns true if the event reached the registry.
    pub fn handle(&self, event: &ChangeEvent) -> bool {
        match self.decoder.decode(event) {
            Ok(mutation) => {
                match &mutation {
                    Mutation::RemoveHost { module, host } => {
                        debug!(module = %module, host = %host, "Doc source left");
                    }
                    Mutation::UpsertAttribute {
                        module,
                        host,
                        attribute,
                        ..
                    } => {
                        debug!(
                            module = %module,
                            host = %host,
                            attribute = %attribute,
                            "Doc source updated"
                        );
                    }
                }
                self.registry.apply(&mutation);
                true
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed watch event");
                false
            }
        }
    }

    /// Runs the subscription until the stream ends or shutdown is signalled.
    ///
    /// Returns `Ok(())` on shutdown. Any stream termination is returned as an
    /// error so the owning process can treat it as fatal.
    pub async fn run<C>(
        &self,
        client: &C,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), WatchError>
    where
        C: WatchClient + ?Sized,
    {
        let prefix = self.namespace.prefix();
        if prefix.is_empty() {
            return Err(WatchError::EmptyPrefix);
        }
        if *shutdown.borrow() {
            return Ok(());
        }

        info!(prefix = %prefix, "Watching doc registrations");
        let mut stream = client.watch(&prefix).await?;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Watch subscriber stopped");
                        return Ok(());
                    }
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        self.handle(&event);
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Watch stream failed");
                        return Err(e);
                    }
                    None => {
                        warn!(prefix = %prefix, "Watch stream closed");
                        return Err(WatchError::StreamClosed);
                    }
                }
            }
        }
    }
}
