//! Content resolution: module name to file bytes or a proxied upstream fetch.
//!
//! The registry is consulted once per request. Everything after that (the
//! file read or the network round trip) happens without touching it again.
//! Failures never surface as HTTP errors: a missing module answers `{}` and
//! an unreachable source answers an empty JSON-typed body.

use std::path::PathBuf;
use std::sync::Arc;

use apidocs_core::Registry;
use axum::{
    Json,
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderName, StatusCode, header},
    response::{IntoResponse, Response},
};
use reqwest::Url;

/// Content type of file-backed and degraded responses.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Upper bound on a request body forwarded upstream.
pub const MAX_FORWARD_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Hop-by-hop headers, never forwarded in either direction.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Where a module's documentation lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// Fetched by reverse proxy.
    Remote(Url),
    /// Read from the local filesystem.
    Local(PathBuf),
}

impl SourceLocation {
    /// Classifies a registry location. Anything starting with `http` is remote.
    pub fn parse(location: &str) -> Result<Self, ResolveError> {
        if location.starts_with("http") {
            Url::parse(location)
                .map(Self::Remote)
                .map_err(|e| ResolveError::InvalidUrl {
                    location: location.to_string(),
                    reason: e.to_string(),
                })
        } else {
            Ok(Self::Local(PathBuf::from(location)))
        }
    }
}

/// Resolution failures. These are logged, never returned to clients.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid upstream url {location:?}: {reason}")]
    InvalidUrl { location: String, reason: String },

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("cannot read {path:?}: {source}")]
    File {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot read request body: {0}")]
    Body(String),
}

/// Outcome of resolving a module.
pub enum Content {
    /// No source registered for the module.
    Missing,
    /// Whole contents of a local file.
    File(Vec<u8>),
    /// Upstream response, passed through.
    Upstream {
        status: StatusCode,
        headers: HeaderMap,
        body: Body,
    },
    /// The source exists but could not be read or reached.
    Unavailable,
}

impl std::fmt::Debug for Content {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => f.write_str("Missing"),
            Self::File(bytes) => f.debug_tuple("File").field(&bytes.len()).finish(),
            Self::Upstream { status, .. } => f
                .debug_struct("Upstream")
                .field("status", status)
                .finish_non_exhaustive(),
            Self::Unavailable => f.write_str("Unavailable"),
        }
    }
}

impl IntoResponse for Content {
    fn into_response(self) -> Response {
        match self {
            Self::Missing => Json(serde_json::json!({})).into_response(),
            Self::File(bytes) => ([(header::CONTENT_TYPE, JSON_CONTENT_TYPE)], bytes).into_response(),
            Self::Upstream {
                status,
                headers,
                body,
            } => {
                let mut response = Response::new(body);
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                response
            }
            Self::Unavailable => {
                ([(header::CONTENT_TYPE, JSON_CONTENT_TYPE)], Body::empty()).into_response()
            }
        }
    }
}

/// Turns module names into documentation content.
#[derive(Debug, Clone)]
pub struct ContentResolver {
    registry: Arc<Registry>,
    http: reqwest::Client,
}

impl ContentResolver {
    /// Creates a resolver reading from `registry` and proxying through `http`.
    pub fn new(registry: Arc<Registry>, http: reqwest::Client) -> Self {
        Self { registry, http }
    }

    /// Canonical location of `module`, if any.
    pub fn locate(&self, module: &str) -> Option<Result<SourceLocation, ResolveError>> {
        self.registry
            .lookup(module)
            .map(|location| SourceLocation::parse(&location))
    }

    /// Resolves `module` for the incoming `request`.
    pub async fn resolve(&self, module: &str, request: Request) -> Content {
        let Some(located) = self.locate(module) else {
            tracing::debug!(module, "No source registered");
            return Content::Missing;
        };

        let result = match located {
            Ok(SourceLocation::Local(path)) => read_file(path).await,
            Ok(SourceLocation::Remote(url)) => self.proxy(url, request).await,
            Err(e) => Err(e),
        };

        result.unwrap_or_else(|error| {
            tracing::warn!(module, %error, "Documentation source unavailable");
            Content::Unavailable
        })
    }

    async fn proxy(&self, mut target: Url, request: Request) -> Result<Content, ResolveError> {
        let (parts, body) = request.into_parts();
        if let Some(query) = parts.uri.query() {
            target.set_query(Some(query));
        }

        let body = axum::body::to_bytes(body, MAX_FORWARD_BODY_BYTES)
            .await
            .map_err(|e| ResolveError::Body(e.to_string()))?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        tracing::debug!(method = %parts.method, url = %target, "Proxying documentation request");
        let mut upstream = self.http.request(parts.method, target).headers(headers);
        if !body.is_empty() {
            upstream = upstream.body(body);
        }
        let upstream = upstream.send().await?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        Ok(Content::Upstream {
            status,
            headers,
            body: Body::from_stream(upstream.bytes_stream()),
        })
    }
}

async fn read_file(path: PathBuf) -> Result<Content, ResolveError> {
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(Content::File(bytes)),
        Err(source) => Err(ResolveError::File { path, source }),
    }
}

/// Removes hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}
