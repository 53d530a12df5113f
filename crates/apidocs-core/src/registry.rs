//! Concurrent registry of documentation sources.
//!
//! The registry maps a module name to the set of hosts currently serving
//! documentation for it. It is written by the watch subscriber (and by
//! static bootstrap) and read by every listing and content request.
//!
//! ## Locking
//!
//! Modules live in a sharded [`DashMap`]; each operation locks only the
//! shard holding its module, and only for the in-memory map work. Callers
//! never hold a registry guard across I/O: [`Registry::lookup`] hands back
//! an owned location string.
//!
//! ## Canonical instance
//!
//! When several hosts serve the same module, the canonical instance is the
//! one with the lexicographically smallest host among the instances that
//! already know a location. If none does, the smallest host overall is
//! used. [`Registry::lookup`] and [`Registry::list`] share this rule, so a
//! registry that is not mutated between calls answers consistently.

use std::collections::BTreeMap;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::decoder::{Attribute, Mutation};
use crate::types::{SCHEMA_VERSION, ServiceEntry, SourceInstance};

/// Instances of one module keyed by host. Ordered so the tie-break is stable.
type ModuleInstances = BTreeMap<String, SourceInstance>;

/// Process-wide registry of documentation sources.
#[derive(Debug, Default)]
pub struct Registry {
    modules: DashMap<String, ModuleInstances>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or updates the `(module, host)` instance.
    ///
    /// A new instance takes all supplied fields. An existing instance only
    /// takes the non-empty ones, so partial updates never clobber values
    /// they do not carry. Empty module names are ignored.
    pub fn add(
        &self,
        module: &str,
        host: &str,
        location: &str,
        debug_origin: &str,
        display_name: &str,
    ) {
        if module.is_empty() {
            tracing::warn!(host = %host, "Ignoring registration with empty module name");
            return;
        }

        let mut instances = self.modules.entry(module.to_string()).or_default();
        match instances.get_mut(host) {
            Some(instance) => {
                if instance.merge(location, debug_origin, display_name) {
                    tracing::debug!(module = %module, host = %host, "Updated doc source");
                }
            }
            None => {
                instances.insert(
                    host.to_string(),
                    SourceInstance::new(host, location, debug_origin, display_name),
                );
                tracing::debug!(module = %module, host = %host, "Added doc source");
            }
        }
    }

    /// Removes the `(module, host)` instance.
    ///
    /// The module itself disappears with its last host. Returns true if an
    /// instance was removed; removing an absent instance is a no-op.
    pub fn remove(&self, module: &str, host: &str) -> bool {
        let Entry::Occupied(mut entry) = self.modules.entry(module.to_string()) else {
            return false;
        };

        let removed = entry.get_mut().remove(host).is_some();
        if entry.get().is_empty() {
            entry.remove();
            tracing::debug!(module = %module, "Removed last doc source, module dropped");
        } else if removed {
            tracing::debug!(module = %module, host = %host, "Removed doc source");
        }
        removed
    }

    /// Returns the canonical location of `module`, if one is known.
    pub fn lookup(&self, module: &str) -> Option<String> {
        let instances = self.modules.get(module)?;
        canonical(&instances)
            .filter(|instance| instance.has_location())
            .map(|instance| instance.location.clone())
    }

    /// Builds the UI listing, one entry per module, ordered by module name.
    ///
    /// `url` and `location` point at `route_prefix/<module>` so the UI always
    /// goes through the content endpoint rather than the raw source.
    pub fn list(&self, route_prefix: &str) -> Vec<ServiceEntry> {
        let mut entries: Vec<ServiceEntry> = self
            .modules
            .iter()
            .filter_map(|module| {
                let instance = canonical(module.value())?;
                let path = format!("{}/{}", route_prefix, module.key());
                Some(ServiceEntry {
                    name: instance.display_name.clone(),
                    swagger_version: SCHEMA_VERSION.to_string(),
                    url: path.clone(),
                    location: path,
                    host: instance.display_host().to_string(),
                    key: module.key().clone(),
                })
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Applies a decoded change-stream mutation as a single registry call.
    pub fn apply(&self, mutation: &Mutation) {
        match mutation {
            Mutation::UpsertAttribute {
                module,
                host,
                attribute,
                value,
            } => match attribute {
                Attribute::Title => self.add(module, host, "", "", value),
                Attribute::Url => self.add(module, host, value, "", ""),
                Attribute::DebugOrigin => self.add(module, host, "", value, ""),
                Attribute::Other(name) => {
                    tracing::trace!(
                        module = %module,
                        host = %host,
                        attribute = %name,
                        "Ignoring unknown doc attribute"
                    );
                }
            },
            Mutation::RemoveHost { module, host } => {
                self.remove(module, host);
            }
        }
    }

    /// Snapshot of every instance registered for `module`, ordered by host.
    pub fn instances(&self, module: &str) -> Vec<SourceInstance> {
        self.modules
            .get(module)
            .map(|instances| instances.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of modules with at least one instance.
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Returns true if no module is registered.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Picks the canonical instance of a module (see the module docs).
fn canonical(instances: &ModuleInstances) -> Option<&SourceInstance> {
    instances
        .values()
        .find(|instance| instance.has_location())
        .or_else(|| instances.values().next())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_add_is_idempotent() {
        let registry = Registry::new();
        registry.add("billing", "h1", "/docs/billing.json", "dbg", "Billing");
        let once = registry.instances("billing");
        let listed_once = registry.list("swaggers");

        registry.add("billing", "h1", "/docs/billing.json", "dbg", "Billing");
        let twice = registry.instances("billing");

        assert_eq!(once, twice);
        assert_eq!(listed_once, registry.list("swaggers"));
        assert_eq!(registry.module_count(), 1);
    }

    #[test]
    fn test_partial_update_preserves_other_fields() {
        let registry = Registry::new();
        registry.add("m", "h", "/docs/m.json", "dbg:1", "Old");
        registry.add("m", "h", "", "", "New");

        let instances = registry.instances("m");
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].location, "/docs/m.json");
        assert_eq!(instances[0].debug_origin, "dbg:1");
        assert_eq!(instances[0].display_name, "New");
    }

    #[test]
    fn test_last_host_removal_clears_module() {
        let registry = Registry::new();
        registry.add("m", "h1", "/docs/m.json", "", "M");
        assert!(registry.remove("m", "h1"));

        assert_eq!(registry.lookup("m"), None);
        assert!(registry.list("swaggers").is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_multi_host_survival() {
        let registry = Registry::new();
        registry.add("m", "h1", "http://h1/doc.json", "", "M");
        registry.add("m", "h2", "http://h2/doc.json", "", "M");
        registry.remove("m", "h1");

        assert_eq!(registry.lookup("m"), Some("http://h2/doc.json".to_string()));
        assert_eq!(registry.list("swaggers").len(), 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let registry = Registry::new();
        assert!(!registry.remove("nope", "h1"));

        registry.add("m", "h1", "/a", "", "M");
        assert!(!registry.remove("m", "h2"));
        assert_eq!(registry.module_count(), 1);
        assert!(registry.remove("m", "h1"));
        assert!(!registry.remove("m", "h1"));
    }

    #[test]
    fn test_tie_break_prefers_smallest_host_with_location() {
        let registry = Registry::new();
        registry.add("m", "b-host", "http://b/doc.json", "", "B");
        registry.add("m", "c-host", "http://c/doc.json", "", "C");
        // Smallest host, but nothing to serve yet.
        registry.add("m", "a-host", "", "", "A");

        assert_eq!(registry.lookup("m"), Some("http://b/doc.json".to_string()));
        let listing = registry.list("swaggers");
        assert_eq!(listing[0].name, "B");

        // Repeated calls on an unchanged registry agree.
        for _ in 0..10 {
            assert_eq!(registry.lookup("m"), Some("http://b/doc.json".to_string()));
        }

        registry.add("m", "a-host", "http://a/doc.json", "", "");
        assert_eq!(registry.lookup("m"), Some("http://a/doc.json".to_string()));
    }

    #[test]
    fn test_module_without_location_is_listed_but_not_resolvable() {
        let registry = Registry::new();
        registry.add("m", "h1", "", "", "Pending");

        assert_eq!(registry.lookup("m"), None);
        let listing = registry.list("swaggers");
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "Pending");
    }

    #[test]
    fn test_list_scenario() {
        let registry = Registry::new();
        registry.add("billing", "10.0.0.1:8080", "/docs/billing.json", "", "Billing");

        let listing = registry.list("swaggers");
        assert_eq!(
            listing,
            vec![ServiceEntry {
                name: "Billing".to_string(),
                swagger_version: "2.0".to_string(),
                url: "swaggers/billing".to_string(),
                location: "swaggers/billing".to_string(),
                host: "10.0.0.1:8080".to_string(),
                key: "billing".to_string(),
            }]
        );
    }

    #[test]
    fn test_list_is_ordered_by_module() {
        let registry = Registry::new();
        for module in ["zeta", "alpha", "mid"] {
            registry.add(module, "h", "/a", "", module);
        }
        let keys: Vec<_> = registry.list("p").into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_list_surfaces_debug_origin_as_host() {
        let registry = Registry::new();
        registry.add("m", "10.0.0.1:8080", "/a", "dev.example.com:9000", "M");
        assert_eq!(registry.list("p")[0].host, "dev.example.com:9000");
    }

    #[test]
    fn test_empty_module_name_is_ignored() {
        let registry = Registry::new();
        registry.add("", "h", "/a", "", "M");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_apply_mutations() {
        let registry = Registry::new();
        let upsert = |attribute, value: &str| Mutation::UpsertAttribute {
            module: "m".to_string(),
            host: "h".to_string(),
            attribute,
            value: value.to_string(),
        };

        registry.apply(&upsert(Attribute::Title, "Title"));
        registry.apply(&upsert(Attribute::Url, "http://h/doc.json"));
        registry.apply(&upsert(Attribute::DebugOrigin, "dbg:1"));
        registry.apply(&upsert(Attribute::Other("weight".to_string()), "10"));

        let instance = &registry.instances("m")[0];
        assert_eq!(instance.display_name, "Title");
        assert_eq!(instance.location, "http://h/doc.json");
        assert_eq!(instance.debug_origin, "dbg:1");

        let remove = Mutation::RemoveHost {
            module: "m".to_string(),
            host: "h".to_string(),
        };
        registry.apply(&remove);
        registry.apply(&remove);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_attribute_alone_creates_nothing() {
        let registry = Registry::new();
        registry.apply(&Mutation::UpsertAttribute {
            module: "m".to_string(),
            host: "h".to_string(),
            attribute: Attribute::Other("weight".to_string()),
            value: "1".to_string(),
        });
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let registry = Arc::new(Registry::new());
        let mut handles = Vec::new();

        for worker in 0..8 {
            let registry = registry.clone();
            handles.push(thread::spawn(move || {
                let host = format!("host-{worker}");
                for i in 0..200 {
                    let module = format!("module-{}", i % 10);
                    registry.add(&module, &host, "/doc.json", "", &module);
                    let _ = registry.lookup(&module);
                    let _ = registry.list("swaggers");
                    if i % 3 == 0 {
                        registry.remove(&module, &host);
                    }
                }
                // Leave every module registered for this host.
                for i in 0..10 {
                    let module = format!("module-{i}");
                    registry.add(&module, &host, "/doc.json", "", &module);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.module_count(), 10);
        for i in 0..10 {
            assert_eq!(registry.instances(&format!("module-{i}")).len(), 8);
        }
    }
}
