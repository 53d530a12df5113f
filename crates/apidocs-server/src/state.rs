//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use apidocs_core::Registry;
use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use crate::auth::AccessGate;
use crate::config::{ConfigError, ServerConfig};
use crate::resolver::ContentResolver;

/// Application state shared across all handlers.
///
/// This is cloneable and can be extracted in handlers using `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    /// Documentation source registry, shared with the watch subscriber.
    registry: Arc<Registry>,
    /// Content resolver for module documents.
    resolver: Arc<ContentResolver>,
    /// Access gate for the UI index.
    gate: Arc<AccessGate>,
    /// Server configuration.
    config: Arc<ServerConfig>,
    /// Session cookie signing key.
    cookie_key: Key,
}

impl AppState {
    /// Create new application state around an existing registry.
    pub fn new(config: ServerConfig, registry: Arc<Registry>) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.proxy_timeout_secs))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        let cookie_key = match &config.session_secret {
            Some(secret) => Key::try_from(secret.as_bytes()).map_err(|e| ConfigError::InvalidValue {
                name: "SESSION_SECRET".to_string(),
                reason: e.to_string(),
            })?,
            None => Key::generate(),
        };

        Ok(Self {
            resolver: Arc::new(ContentResolver::new(registry.clone(), http)),
            gate: Arc::new(AccessGate::new(config.tokens.clone(), config.prefix.clone())),
            registry,
            config: Arc::new(config),
            cookie_key,
        })
    }

    /// Get a reference to the registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Get a reference to the content resolver.
    pub fn resolver(&self) -> &ContentResolver {
        &self.resolver
    }

    /// Get a reference to the access gate.
    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    /// Get a reference to the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("modules", &self.registry.module_count())
            .finish_non_exhaustive()
    }
}
