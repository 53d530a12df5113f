//! Shared-secret access gate for the documentation UI.
//!
//! The gate is deliberately coarse: one list of tokens, no user identity,
//! no rate limiting. It only guards the index page of a read-only viewer.
//!
//! A successful login stores a marker for the route namespace in a signed
//! session cookie with a one-hour `Max-Age`. The value also carries its own
//! expiry so that a captured cookie stops working after
//! [`SESSION_MAX_AGE_SECS`] even if replayed.

use std::collections::BTreeSet;

use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use chrono::Utc;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "SWGSESSID";

/// Session lifetime in seconds.
pub const SESSION_MAX_AGE_SECS: i64 = 60 * 60;

const LOGIN_MARKER_SUFFIX: &str = "logined";

// ============================================================================
// Session
// ============================================================================

/// Markers stored in the signed session cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    markers: BTreeSet<String>,
}

impl Session {
    /// Reads the session from the cookie jar.
    ///
    /// Missing, tampered or expired cookies yield an empty session.
    pub fn from_jar(jar: &SignedCookieJar) -> Self {
        jar.get(SESSION_COOKIE)
            .and_then(|cookie| Self::decode(cookie.value(), Utc::now().timestamp()))
            .unwrap_or_default()
    }

    /// Returns true if `marker` is set.
    pub fn contains(&self, marker: &str) -> bool {
        self.markers.contains(marker)
    }

    /// Sets `marker`.
    pub fn insert(&mut self, marker: impl Into<String>) {
        self.markers.insert(marker.into());
    }

    /// Writes the session into the jar with a fresh expiry.
    pub fn save(&self, jar: SignedCookieJar) -> SignedCookieJar {
        let expires_at = Utc::now().timestamp() + SESSION_MAX_AGE_SECS;
        let cookie = Cookie::build((SESSION_COOKIE, self.encode(expires_at)))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(SESSION_MAX_AGE_SECS));
        jar.add(cookie)
    }

    /// `<expires_at>|marker&marker...`
    fn encode(&self, expires_at: i64) -> String {
        let markers: Vec<&str> = self.markers.iter().map(String::as_str).collect();
        format!("{expires_at}|{}", markers.join("&"))
    }

    fn decode(value: &str, now: i64) -> Option<Self> {
        let (expires_at, markers) = value.split_once('|')?;
        let expires_at: i64 = expires_at.parse().ok()?;
        if expires_at <= now {
            return None;
        }
        Some(Self {
            markers: markers
                .split('&')
                .filter(|m| !m.is_empty())
                .map(String::from)
                .collect(),
        })
    }
}

// ============================================================================
// Access Gate
// ============================================================================

/// Token check in front of the UI index route.
#[derive(Debug, Clone)]
pub struct AccessGate {
    tokens: Vec<String>,
    namespace: String,
}

impl AccessGate {
    /// Creates a gate for the routes under `namespace`.
    ///
    /// Blank tokens are discarded; with no tokens left the gate is open.
    pub fn new(tokens: Vec<String>, namespace: impl Into<String>) -> Self {
        Self {
            tokens: tokens.into_iter().filter(|t| !t.is_empty()).collect(),
            namespace: namespace.into(),
        }
    }

    /// Returns true if no token is configured.
    pub fn is_open(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Session marker recording a login for this namespace.
    pub fn marker(&self) -> String {
        format!("{}{}", self.namespace, LOGIN_MARKER_SUFFIX)
    }

    /// Returns true if `session` may see the index.
    pub fn admits(&self, session: &Session) -> bool {
        self.is_open() || session.contains(&self.marker())
    }

    /// Checks a submitted secret against the configured tokens.
    pub fn verify(&self, secret: &str) -> bool {
        !secret.is_empty() && self.tokens.iter().any(|token| token == secret)
    }
}

#[cfg(test)]
mod tests {
    use axum_extra::extract::cookie::Key;

    use super::*;

    #[test]
    fn test_open_gate_admits_everyone() {
        let gate = AccessGate::new(Vec::new(), "/docs");
        assert!(gate.is_open());
        assert!(gate.admits(&Session::default()));
        assert!(!gate.verify("anything"));
    }

    #[test]
    fn test_blank_tokens_keep_gate_open() {
        let gate = AccessGate::new(vec![String::new()], "");
        assert!(gate.is_open());
        assert!(!gate.verify(""));
    }

    #[test]
    fn test_gate_requires_marker() {
        let gate = AccessGate::new(vec!["alpha".to_string(), "beta".to_string()], "/docs");
        let mut session = Session::default();
        assert!(!gate.admits(&session));

        assert!(gate.verify("beta"));
        assert!(!gate.verify("Beta"));
        assert!(!gate.verify("gamma"));

        session.insert(gate.marker());
        assert!(gate.admits(&session));
    }

    #[test]
    fn test_marker_is_namespaced() {
        let docs = AccessGate::new(vec!["t".to_string()], "/docs");
        let other = AccessGate::new(vec!["t".to_string()], "/other");
        assert_eq!(docs.marker(), "/docslogined");

        let mut session = Session::default();
        session.insert(docs.marker());
        assert!(docs.admits(&session));
        assert!(!other.admits(&session));
    }

    #[test]
    fn test_session_encoding() {
        let mut session = Session::default();
        session.insert("/docslogined");
        session.insert("logined");

        let encoded = session.encode(2_000);
        assert_eq!(encoded, "2000|/docslogined&logined");
        assert_eq!(Session::decode(&encoded, 1_000), Some(session));
    }

    #[test]
    fn test_saved_cookie_attributes() {
        let mut session = Session::default();
        session.insert("/docslogined");
        let jar = session.save(SignedCookieJar::new(Key::generate()));

        let cookie = jar.get(SESSION_COOKIE).unwrap();
        assert_eq!(cookie.max_age(), Some(time::Duration::hours(1)));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(Session::from_jar(&jar), session);
    }

    #[test]
    fn test_session_expiry_and_garbage() {
        let mut session = Session::default();
        session.insert("logined");
        let encoded = session.encode(1_000);

        assert_eq!(Session::decode(&encoded, 1_000), None);
        assert_eq!(Session::decode("garbage", 0), None);
        assert_eq!(Session::decode("x|logined", 0), None);
        assert_eq!(Session::decode("5|", 0), Some(Session::default()));
    }
}
