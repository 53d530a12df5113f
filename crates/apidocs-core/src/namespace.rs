//! Key namespace under which documentation producers register.

use std::fmt;

/// Record type marker for documentation registrations.
pub const DOC_RECORD_TYPE: &str = "Doc";

/// Identity fields that scope the watched key space.
///
/// Producers write `<prefix><module>/<host>/<attribute>` keys, where the
/// prefix is `/<cluster>/Doc/<service>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchNamespace {
    /// Cluster (deployment environment) identifier.
    pub cluster_id: String,
    /// Identifier of the aggregator service the docs belong to.
    pub service_id: String,
}

impl WatchNamespace {
    /// Creates a namespace from its identity fields.
    pub fn new(cluster_id: impl Into<String>, service_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            service_id: service_id.into(),
        }
    }

    /// The key prefix to subscribe to.
    ///
    /// Empty when either identity field is blank; subscribing with an empty
    /// prefix is refused by the watch subscriber.
    pub fn prefix(&self) -> String {
        let cluster = self.cluster_id.trim_matches('/');
        let service = self.service_id.trim_matches('/');
        if cluster.is_empty() || service.is_empty() {
            return String::new();
        }
        format!("/{cluster}/{DOC_RECORD_TYPE}/{service}/")
    }
}

impl fmt::Display for WatchNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix())
    }
}
