//! apidocs-core: documentation source registry for the API docs aggregator
//!
//! This crate provides:
//! - The concurrent [`Registry`] of documentation sources per module
//! - Decoding of key-value watch events into typed registry mutations
//! - The [`WatchSubscriber`] that keeps the registry in sync with producers
//! - Watch clients: an in-process [`MemoryKv`] and an etcd v3 gateway client
//!
//! # Architecture
//!
//! Producers register documentation under
//! `/<cluster>/Doc/<service>/<module>/<host>/<attribute>` keys. The
//! subscriber watches that prefix, decodes each event, and applies it to the
//! registry. Statically configured sources enter through the same path at
//! startup, so the registry cannot tell them apart.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use apidocs_core::{MemoryKv, Registry, WatchNamespace, WatchSubscriber};
//!
//! let registry = Arc::new(Registry::new());
//! let subscriber = WatchSubscriber::new(registry.clone(), WatchNamespace::new("dev", "swg"));
//! subscriber.bootstrap(&static_sources, "127.0.0.1:8001");
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! subscriber.run(&MemoryKv::new(), shutdown_rx).await?;
//! ```

pub mod decoder;
pub mod namespace;
pub mod registry;
pub mod types;
pub mod watch;

pub use decoder::{Attribute, ChangeDecoder, ChangeEvent, DecodeError, Mutation};
pub use namespace::{DOC_RECORD_TYPE, WatchNamespace};
pub use registry::Registry;
pub use types::{DocSource, SCHEMA_VERSION, ServiceEntry, SourceInstance};
pub use watch::{
    ChangeStream, EtcdWatchClient, MemoryKv, WatchClient, WatchError, WatchSubscriber,
};
