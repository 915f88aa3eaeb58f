//! Content-addressable statement store
//!
//! Signed statements are immutable, so they are stored under a digest of
//! their own bytes and published as `{uri_base}/{digest}`. Two backends:
//! - `MemoryStatementStore`: hashmap, lost on restart
//! - `FsStatementStore`: one file per digest under a base directory

pub mod fs;
pub mod memory;

pub use fs::FsStatementStore;
pub use memory::MemoryStatementStore;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};
use std::fmt::Debug;

use crate::error::{FederationError, Result};

/// Storage backend for signed statements
///
/// Implementations must be thread-safe. Concurrent `put`s are safe;
/// `reset` must not race with other operations.
pub trait StatementStore: Send + Sync + Debug {
    /// Store a token and return its digest; storing the same token again
    /// is a no-op returning the same digest
    fn put(&self, token: &str) -> Result<String>;

    /// Fetch a token by digest
    fn get(&self, digest: &str) -> Result<String>;

    /// Check if a digest is present
    fn contains(&self, digest: &str) -> Result<bool>;

    /// List all stored digests
    fn digests(&self) -> Result<Vec<String>>;

    /// Remove every entry
    fn reset(&self) -> Result<()>;
}

/// Digest under which a token is stored: base64url(SHA-256(token))
pub fn digest(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

/// Locator URI for a digest
pub fn locator(uri_base: &str, digest: &str) -> String {
    format!("{}/{}", uri_base.trim_end_matches('/'), digest)
}

/// Recover the digest from a locator URI published under `uri_base`
pub fn digest_from_locator(uri_base: &str, uri: &str) -> Result<String> {
    let prefix = format!("{}/", uri_base.trim_end_matches('/'));
    match uri.strip_prefix(&prefix) {
        Some(digest) if !digest.is_empty() && !digest.contains('/') => Ok(digest.to_string()),
        _ => Err(FederationError::InvalidLocator(format!(
            "'{}' is not a statement under '{}'",
            uri, uri_base
        ))),
    }
}

/// Store a token and return its locator URI
pub fn publish(store: &dyn StatementStore, uri_base: &str, token: &str) -> Result<String> {
    let digest = store.put(token)?;
    Ok(locator(uri_base, &digest))
}

/// Fetch the token a locator URI points at
pub fn resolve(store: &dyn StatementStore, uri_base: &str, uri: &str) -> Result<String> {
    store.get(&digest_from_locator(uri_base, uri)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_deterministic() {
        assert_eq!(digest("a.b.c"), digest("a.b.c"));
        assert_ne!(digest("a.b.c"), digest("a.b.d"));
        // SHA-256 is 32 bytes, 43 base64url characters without padding
        assert_eq!(digest("a.b.c").len(), 43);
    }

    #[test]
    fn test_locator_roundtrip() {
        let d = digest("a.b.c");
        let uri = locator("https://example.org/ms/", &d);
        assert_eq!(uri, format!("https://example.org/ms/{}", d));
        assert_eq!(digest_from_locator("https://example.org/ms", &uri).unwrap(), d);
    }

    #[test]
    fn test_foreign_locator_rejected() {
        let err = digest_from_locator("https://example.org/ms", "https://other.org/ms/abc");
        assert!(matches!(err, Err(FederationError::InvalidLocator(_))));

        let err = digest_from_locator("https://example.org/ms", "https://example.org/ms/");
        assert!(matches!(err, Err(FederationError::InvalidLocator(_))));
    }

    #[test]
    fn test_publish_and_resolve() {
        let store = MemoryStatementStore::new();
        let uri = publish(&store, "https://example.org/ms", "a.b.c").unwrap();
        assert_eq!(resolve(&store, "https://example.org/ms", &uri).unwrap(), "a.b.c");
    }
}
