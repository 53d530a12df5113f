//! Decoding of watch-stream events into registry mutations.
//!
//! Producers publish one key per attribute:
//!
//! ```text
//! <namespace prefix>/<module>/<host>/<attribute> = <value>
//! ```
//!
//! The decoder turns each raw event into a [`Mutation`] before anything
//! touches the registry. A deletion of *any* attribute removes the whole
//! `(module, host)` instance; producers delete every attribute key on
//! teardown, and the repeats are harmless because removal is idempotent.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A raw change notification from the key-value watch stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Full key path.
    pub key: String,
    /// Value after the change (empty for deletions).
    pub value: String,
    /// True if the key was deleted.
    pub is_delete: bool,
}

impl ChangeEvent {
    /// Creates an upsert event.
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            is_delete: false,
        }
    }

    /// Creates a deletion event.
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: String::new(),
            is_delete: true,
        }
    }
}

/// Attribute carried by an upsert event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    /// `title`: display name of the module.
    Title,
    /// `url`: document location.
    Url,
    /// `debugOrigin`: informational alternate origin.
    DebugOrigin,
    /// Anything else. Accepted for forward compatibility, applied as a no-op.
    Other(String),
}

impl Attribute {
    /// Parses an attribute key segment.
    pub fn parse(segment: &str) -> Self {
        match segment {
            "title" => Self::Title,
            "url" => Self::Url,
            "debugOrigin" => Self::DebugOrigin,
            other => Self::Other(other.to_string()),
        }
    }

    /// The key segment for this attribute.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Title => "title",
            Self::Url => "url",
            Self::DebugOrigin => "debugOrigin",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registry mutation decoded from one change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Set one attribute of the `(module, host)` instance.
    UpsertAttribute {
        module: String,
        host: String,
        attribute: Attribute,
        value: String,
    },
    /// Drop the `(module, host)` instance.
    RemoveHost { module: String, host: String },
}

/// Reasons an event cannot be decoded. Such events are logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Key has fewer than `module/host/attribute` segments.
    #[error("key {key:?} has {segments} segment(s), expected at least 3")]
    TooFewSegments { key: String, segments: usize },

    /// Module or host segment is empty.
    #[error("key {key:?} has an empty {segment} segment")]
    EmptySegment { key: String, segment: &'static str },

    /// Key does not live under the subscribed namespace.
    #[error("key {key:?} is outside namespace {prefix:?}")]
    OutsideNamespace { key: String, prefix: String },
}

/// Decodes change events into [`Mutation`]s.
///
/// With a namespace prefix configured, keys must start with it; the
/// remainder is then read from its trailing `module/host/attribute`
/// segments, so deeper nesting below the prefix is tolerated.
#[derive(Debug, Clone, Default)]
pub struct ChangeDecoder {
    prefix: Option<String>,
}

impl ChangeDecoder {
    /// Decoder that only counts trailing segments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that also checks keys against the subscribed prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: (!prefix.is_empty()).then_some(prefix),
        }
    }

    /// Decodes a single event.
    pub fn decode(&self, event: &ChangeEvent) -> Result<Mutation, DecodeError> {
        let path = self.strip_prefix(&event.key)?;

        let segments: Vec<&str> = path.split('/').collect();
        let [.., module, host, attribute] = segments.as_slice() else {
            return Err(DecodeError::TooFewSegments {
                key: event.key.clone(),
                segments: segments.len(),
            });
        };

        if module.is_empty() {
            return Err(DecodeError::EmptySegment {
                key: event.key.clone(),
                segment: "module",
            });
        }
        if host.is_empty() {
            return Err(DecodeError::EmptySegment {
                key: event.key.clone(),
                segment: "host",
            });
        }

        let module = (*module).to_string();
        let host = (*host).to_string();
        if event.is_delete {
            return Ok(Mutation::RemoveHost { module, host });
        }

        Ok(Mutation::UpsertAttribute {
            module,
            host,
            attribute: Attribute::parse(attribute),
            value: event.value.clone(),
        })
    }

    fn strip_prefix<'a>(&self, key: &'a str) -> Result<&'a str, DecodeError> {
        let Some(prefix) = &self.prefix else {
            return Ok(key);
        };
        key.strip_prefix(prefix.as_str())
            // "/ns/swg" must not match "/ns/swgx/...".
            .filter(|rest| prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/'))
            .map(|rest| rest.trim_start_matches('/'))
            .ok_or_else(|| DecodeError::OutsideNamespace {
                key: key.to_string(),
                prefix: prefix.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_title_upsert() {
        let decoder = ChangeDecoder::new();
        let event = ChangeEvent::put("ns/billing/10.0.0.1:8080/title", "Billing");
        assert_eq!(
            decoder.decode(&event).unwrap(),
            Mutation::UpsertAttribute {
                module: "billing".to_string(),
                host: "10.0.0.1:8080".to_string(),
                attribute: Attribute::Title,
                value: "Billing".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_recognized_attributes() {
        let decoder = ChangeDecoder::new();
        for (segment, expected) in [
            ("title", Attribute::Title),
            ("url", Attribute::Url),
            ("debugOrigin", Attribute::DebugOrigin),
            ("weight", Attribute::Other("weight".to_string())),
        ] {
            let event = ChangeEvent::put(format!("ns/m/h/{segment}"), "v");
            match decoder.decode(&event).unwrap() {
                Mutation::UpsertAttribute { attribute, .. } => assert_eq!(attribute, expected),
                other => panic!("unexpected mutation: {other:?}"),
            }
        }
    }

    #[test]
    fn test_decode_delete_of_any_attribute_removes_host() {
        let decoder = ChangeDecoder::new();
        for attribute in ["title", "url", "debugOrigin", "weight"] {
            let event = ChangeEvent::delete(format!("ns/billing/10.0.0.1:8080/{attribute}"));
            assert_eq!(
                decoder.decode(&event).unwrap(),
                Mutation::RemoveHost {
                    module: "billing".to_string(),
                    host: "10.0.0.1:8080".to_string(),
                }
            );
        }
    }

    #[test]
    fn test_decode_nested_namespace() {
        let decoder = ChangeDecoder::new();
        let event = ChangeEvent::put("/dev/Doc/backend/api/swg/users/h1/url", "http://h1/doc");
        match decoder.decode(&event).unwrap() {
            Mutation::UpsertAttribute { module, host, .. } => {
                assert_eq!(module, "users");
                assert_eq!(host, "h1");
            }
            other => panic!("unexpected mutation: {other:?}"),
        }
    }

    #[test]
    fn test_decode_too_few_segments() {
        let decoder = ChangeDecoder::new();
        let err = decoder.decode(&ChangeEvent::put("host/title", "x")).unwrap_err();
        assert_eq!(
            err,
            DecodeError::TooFewSegments {
                key: "host/title".to_string(),
                segments: 2,
            }
        );
        assert!(decoder.decode(&ChangeEvent::delete("")).is_err());
    }

    #[test]
    fn test_decode_empty_segments() {
        let decoder = ChangeDecoder::new();
        assert!(matches!(
            decoder.decode(&ChangeEvent::put("ns//h/title", "x")),
            Err(DecodeError::EmptySegment { segment: "module", .. })
        ));
        assert!(matches!(
            decoder.decode(&ChangeEvent::put("ns/m//title", "x")),
            Err(DecodeError::EmptySegment { segment: "host", .. })
        ));
    }

    #[test]
    fn test_decode_with_prefix() {
        let decoder = ChangeDecoder::with_prefix("/dev/Doc/swg/");
        let event = ChangeEvent::put("/dev/Doc/swg/billing/h1/title", "Billing");
        assert!(matches!(
            decoder.decode(&event),
            Ok(Mutation::UpsertAttribute { ref module, .. }) if module == "billing"
        ));

        let outside = ChangeEvent::put("/prod/Doc/swg/billing/h1/title", "Billing");
        assert!(matches!(
            decoder.decode(&outside),
            Err(DecodeError::OutsideNamespace { .. })
        ));
    }

    #[test]
    fn test_decode_prefix_matches_whole_segments() {
        let decoder = ChangeDecoder::with_prefix("/dev/Doc/swg");
        let sibling = ChangeEvent::put("/dev/Doc/swg2/billing/h1/title", "Billing");
        assert!(matches!(
            decoder.decode(&sibling),
            Err(DecodeError::OutsideNamespace { .. })
        ));
        let inside = ChangeEvent::put("/dev/Doc/swg/billing/h1/title", "Billing");
        assert!(decoder.decode(&inside).is_ok());
    }

    #[test]
    fn test_decode_prefix_does_not_count_as_segments() {
        // Without the prefix check, "Doc/swg/title" would look like a
        // module/host/attribute triple.
        let decoder = ChangeDecoder::with_prefix("/dev/Doc/swg");
        let err = decoder
            .decode(&ChangeEvent::put("/dev/Doc/swg/title", "x"))
            .unwrap_err();
        assert!(matches!(err, DecodeError::TooFewSegments { segments: 1, .. }));
    }

    #[test]
    fn test_decode_error_messages() {
        let err = DecodeError::TooFewSegments {
            key: "a/b".to_string(),
            segments: 2,
        };
        assert_eq!(
            err.to_string(),
            "key \"a/b\" has 2 segment(s), expected at least 3"
        );
    }
}
