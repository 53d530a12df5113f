//! Core data types for the documentation registry.
//!
//! A *module* is one logical documentation set (e.g. `billing-backend`).
//! Each module can be served by several hosts; every host's registration is
//! a [`SourceInstance`]. The UI consumes the registry through flattened
//! [`ServiceEntry`] rows, one per module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version reported for every listing entry.
pub const SCHEMA_VERSION: &str = "2.0";

// ============================================================================
// Registry Types
// ============================================================================

/// One host's registration of a documentation module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInstance {
    /// Identity of the reporting instance; unique per module.
    pub host: String,
    /// Filesystem path or fully-qualified URL of the document.
    pub location: String,
    /// Human-facing alternate origin, shown in the UI as `host`.
    pub debug_origin: String,
    /// Title shown in the UI module list.
    pub display_name: String,
    /// Last time any field of this instance changed.
    pub updated_at: DateTime<Utc>,
}

impl SourceInstance {
    /// Creates a new instance for `host` with the given fields.
    pub fn new(host: &str, location: &str, debug_origin: &str, display_name: &str) -> Self {
        Self {
            host: host.to_string(),
            location: location.to_string(),
            debug_origin: debug_origin.to_string(),
            display_name: display_name.to_string(),
            updated_at: Utc::now(),
        }
    }

    /// Merges the non-empty fields into this instance.
    ///
    /// Returns true if any field actually changed.
    pub fn merge(&mut self, location: &str, debug_origin: &str, display_name: &str) -> bool {
        let mut changed = false;
        for (field, value) in [
            (&mut self.location, location),
            (&mut self.debug_origin, debug_origin),
            (&mut self.display_name, display_name),
        ] {
            if !value.is_empty() && field.as_str() != value {
                *field = value.to_string();
                changed = true;
            }
        }
        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }

    /// Returns true if a document location is known for this instance.
    pub fn has_location(&self) -> bool {
        !self.location.is_empty()
    }

    /// Origin surfaced to the UI: the debug origin, or the host itself.
    pub fn display_host(&self) -> &str {
        if self.debug_origin.is_empty() {
            &self.host
        } else {
            &self.debug_origin
        }
    }
}

/// A row of the `services.json` listing consumed by the documentation UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntry {
    /// Display name of the module.
    pub name: String,
    /// Always [`SCHEMA_VERSION`].
    pub swagger_version: String,
    /// Proxy-able path of the module document.
    pub url: String,
    /// Same as `url`.
    pub location: String,
    /// Origin shown in the UI.
    pub host: String,
    /// The module name.
    pub key: String,
}

// ============================================================================
// Bootstrap Types
// ============================================================================

/// A statically configured documentation source, applied once at startup.
///
/// A non-empty `local_path` wins over `url`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocSource {
    /// Module name.
    pub module: String,
    /// Title shown in the UI.
    #[serde(default)]
    pub title: String,
    /// Remote document URL.
    #[serde(default)]
    pub url: String,
    /// Local document path.
    #[serde(default)]
    pub local_path: String,
    /// Informational alternate origin.
    #[serde(default)]
    pub debug_origin: String,
}

impl DocSource {
    /// Resolves the `(host, location)` pair this source registers under.
    ///
    /// Local files are attributed to `local_host` (the aggregator itself);
    /// remote documents to the `host[:port]` of their URL.
    pub fn registration(&self, local_host: &str) -> (String, String) {
        if !self.local_path.is_empty() {
            return (local_host.to_string(), self.local_path.clone());
        }
        let host = url_authority(&self.url).unwrap_or(local_host);
        (host.to_string(), self.url.clone())
    }
}

/// Extracts `host[:port]` from a URL of the form `scheme://authority/path`.
pub fn url_authority(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let authority = authority.rsplit('@').next()?;
    (!authority.is_empty()).then_some(authority)
}
