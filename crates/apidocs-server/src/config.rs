//! Server configuration from environment variables.

use std::env;
use std::path::PathBuf;

use apidocs_core::{DocSource, WatchNamespace};

/// Minimum length of `SESSION_SECRET`, as required for cookie signing keys.
pub const MIN_SESSION_SECRET_LEN: usize = 64;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server port to listen on.
    pub port: u16,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// CORS allowed origins (comma-separated or "*" for all).
    pub cors_allowed_origins: String,
    /// Route prefix, normalized to `""` or `"/segment[/...]"`.
    pub prefix: String,
    /// Shared secrets for the UI index. Empty means open access.
    pub tokens: Vec<String>,
    /// Gateway origin passed to the UI page.
    pub gateway_origin: Option<String>,
    /// Session signing secret; a random key is used when absent.
    pub session_secret: Option<String>,
    /// JSON file with statically configured doc sources.
    pub docs_file: Option<PathBuf>,
    /// Cluster identifier for the watch namespace.
    pub cluster_id: String,
    /// Service identifier for the watch namespace.
    pub service_id: String,
    /// Address this aggregator is reachable at; owner of local doc files.
    pub advertised_host: String,
    /// etcd endpoint; the in-process store is used when absent.
    pub etcd_endpoint: Option<String>,
    /// Timeout for proxied upstream requests, in seconds.
    pub proxy_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `PORT`: Server port (default: 8001)
    /// - `LOG_LEVEL`: Logging level (default: "info")
    /// - `CORS_ALLOWED_ORIGINS`: Allowed CORS origins (default: "*")
    /// - `SWAGGER_PREFIX`: Route prefix (default: none)
    /// - `SWAGGER_TOKENS`: Comma-separated access tokens (default: open access)
    /// - `GATEWAY_ORIGIN`: Gateway origin shown by the UI
    /// - `SESSION_SECRET`: Cookie signing secret, at least 64 bytes
    /// - `SWAGGER_DOCS_FILE`: JSON list of static doc sources
    /// - `CLUSTER_ID` / `SERVICE_ID`: Watch namespace (default: "dev" / "swg")
    /// - `ADVERTISED_HOST`: Own address (default: "127.0.0.1:<port>")
    /// - `ETCD_ENDPOINT`: etcd JSON gateway, e.g. `http://127.0.0.1:2379`
    /// - `PROXY_TIMEOUT_SECS`: Upstream timeout (default: 30)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let port = parse_var(&var, "PORT", 8001)?;
        let proxy_timeout_secs = parse_var(&var, "PROXY_TIMEOUT_SECS", 30)?;

        let session_secret = var("SESSION_SECRET");
        if let Some(secret) = &session_secret {
            if secret.len() < MIN_SESSION_SECRET_LEN {
                return Err(ConfigError::InvalidValue {
                    name: "SESSION_SECRET".to_string(),
                    reason: format!("must be at least {MIN_SESSION_SECRET_LEN} bytes"),
                });
            }
        }

        let tokens = var("SWAGGER_TOKENS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            port,
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            cors_allowed_origins: var("CORS_ALLOWED_ORIGINS").unwrap_or_else(|| "*".to_string()),
            prefix: normalize_prefix(&var("SWAGGER_PREFIX").unwrap_or_default()),
            tokens,
            gateway_origin: var("GATEWAY_ORIGIN"),
            session_secret,
            docs_file: var("SWAGGER_DOCS_FILE").map(PathBuf::from),
            cluster_id: var("CLUSTER_ID").unwrap_or_else(|| "dev".to_string()),
            service_id: var("SERVICE_ID").unwrap_or_else(|| "swg".to_string()),
            advertised_host: var("ADVERTISED_HOST").unwrap_or_else(|| format!("127.0.0.1:{port}")),
            etcd_endpoint: var("ETCD_ENDPOINT"),
            proxy_timeout_secs,
        })
    }

    /// Get the socket address for the server.
    pub fn socket_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    /// Base path of every documentation route: `<prefix>/swagger`.
    pub fn base_path(&self) -> String {
        format!("{}/swagger", self.prefix)
    }

    /// Key namespace the watch subscriber listens on.
    pub fn namespace(&self) -> WatchNamespace {
        WatchNamespace::new(&self.cluster_id, &self.service_id)
    }

    /// Reads the static doc sources, if a file is configured.
    pub fn load_doc_sources(&self) -> Result<Vec<DocSource>, ConfigError> {
        let Some(path) = &self.docs_file else {
            return Ok(Vec::new());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::DocsFile {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::DocsParse {
            path: path.clone(),
            source,
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            reason: format!("cannot parse {raw:?}"),
        }),
    }
}

/// Normalizes a route prefix to `""` or `/a/b` (no trailing slash).
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid environment variable value.
    #[error("invalid value for environment variable {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    /// Static doc source file could not be read.
    #[error("cannot read doc sources from {path:?}: {source}")]
    DocsFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Static doc source file is not valid JSON.
    #[error("invalid doc sources in {path:?}: {source}")]
    DocsParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// HTTP client for proxying could not be built.
    #[error("cannot build HTTP client: {0}")]
    HttpClient(String),
}
