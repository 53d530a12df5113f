//! apidocs-server: HTTP front end of the API documentation aggregator
//!
//! This crate provides:
//! - The module listing consumed by the documentation UI
//! - Per-module content, read from disk or reverse-proxied upstream
//! - A shared-secret access gate with signed session cookies
//! - Environment-driven configuration
//!
//! # Architecture
//!
//! The server is built on Axum. Handlers share an [`AppState`] holding the
//! [`apidocs_core::Registry`] that a background watch subscriber keeps up to
//! date. The middleware stack adds:
//! - Request tracing and logging
//! - CORS handling
//! - Request ID generation
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use apidocs_server::{AppState, ServerConfig, routes};
//!
//! let config = ServerConfig::from_env()?;
//! let registry = Arc::new(apidocs_core::Registry::new());
//! let app = routes::build_router(AppState::new(config, registry)?);
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod middleware;
pub mod resolver;
pub mod routes;
pub mod state;

// Re-exports for convenience
pub use auth::{AccessGate, Session};
pub use config::{ConfigError, ServerConfig};
pub use error::ApiError;
pub use resolver::{Content, ContentResolver, SourceLocation};
pub use state::AppState;

// Re-export dependent crates
pub use apidocs_core;
