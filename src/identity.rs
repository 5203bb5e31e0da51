//! Player identity resolution.
//!
//! A player is identified by an opaque id the server stored in the
//! `user-id` cookie. Without one, the client can only offer the flow that
//! acquires an identity; every game view requires it.

use std::fmt;
use std::path::Path;

use tracing::{debug, warn};

/// Name of the cookie carrying the player id.
pub const IDENTITY_COOKIE: &str = "user-id";

/// An opaque player id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(String);

impl Identity {
    /// Wrap `id`, rejecting empty or whitespace-only values.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        (!id.trim().is_empty()).then_some(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the client should go once identity has been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// No identity yet: only the acquisition flow is available.
    AcquireIdentity,
    /// Identity present: the game views may be entered.
    Ready(Identity),
}

/// Resolves the player identity from the client's cookie store.
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    identity: Option<Identity>,
}

impl IdentityResolver {
    /// Resolve from a `Cookie` header value such as `a=1; user-id=abc`.
    pub fn from_cookie_header(header: &str) -> Self {
        let identity = header
            .split(';')
            .filter_map(|pair| pair.split_once('='))
            .find(|(name, _)| name.trim() == IDENTITY_COOKIE)
            .and_then(|(_, value)| Identity::new(value.trim().trim_matches('"')));
        debug!(found = identity.is_some(), "resolved identity from cookies");
        Self { identity }
    }

    /// Resolve from a file holding a cookie string.
    ///
    /// A missing or unreadable file means no identity.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_cookie_header(contents.trim()),
            Err(e) => {
                warn!(path = %path.display(), "could not read cookie file: {e}");
                Self::default()
            }
        }
    }

    pub fn from_identity(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
        }
    }

    pub fn has_identity(&self) -> bool {
        self.identity.is_some()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn entry(&self) -> Entry {
        match &self.identity {
            Some(identity) => Entry::Ready(identity.clone()),
            None => Entry::AcquireIdentity,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn finds_cookie_among_others() {
        let resolver = IdentityResolver::from_cookie_header("theme=dark; user-id=abc123; x=y");
        assert!(resolver.has_identity());
        assert_eq!(resolver.identity().unwrap().as_str(), "abc123");
        assert_eq!(
            resolver.entry(),
            Entry::Ready(Identity::new("abc123").unwrap())
        );
    }

    #[test]
    fn missing_or_empty_cookie_means_no_identity() {
        for header in ["", "theme=dark", "user-id=", "user-id=  ", "user-idx=abc"] {
            let resolver = IdentityResolver::from_cookie_header(header);
            assert!(!resolver.has_identity(), "{header:?}");
            assert_eq!(resolver.entry(), Entry::AcquireIdentity);
        }
    }

    #[test]
    fn quoted_values_are_unwrapped() {
        let resolver = IdentityResolver::from_cookie_header("user-id=\"q1\"");
        assert_eq!(resolver.identity().map(Identity::as_str), Some("q1"));
    }

    #[test]
    fn unreadable_file_means_no_identity() {
        let resolver = IdentityResolver::load("/nonexistent/beer-game/cookies.txt");
        assert!(!resolver.has_identity());
    }

    #[test]
    fn loads_cookie_file() {
        let path = std::env::temp_dir().join(format!("beer-game-cookie-{}", std::process::id()));
        std::fs::write(&path, "user-id=from-file\n").unwrap();
        let resolver = IdentityResolver::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(resolver.identity().map(Identity::as_str), Some("from-file"));
    }
}
