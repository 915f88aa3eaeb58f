//! In-memory statement store
//!
//! Default backend. Suitable for tests and single-process publication.
//! Data is lost on restart.

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

use super::{digest, StatementStore};
use crate::error::{FederationError, Result};

/// In-memory statement store
#[derive(Debug, Default)]
pub struct MemoryStatementStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStatementStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl StatementStore for MemoryStatementStore {
    fn put(&self, token: &str) -> Result<String> {
        let digest = digest(token);
        let mut entries = self.entries.write();
        if !entries.contains_key(&digest) {
            debug!(digest = %digest, "Storing statement");
            entries.insert(digest.clone(), token.to_string());
        }
        Ok(digest)
    }

    fn get(&self, digest: &str) -> Result<String> {
        self.entries
            .read()
            .get(digest)
            .cloned()
            .ok_or_else(|| FederationError::StoreMiss(digest.to_string()))
    }

    fn contains(&self, digest: &str) -> Result<bool> {
        Ok(self.entries.read().contains_key(digest))
    }

    fn digests(&self) -> Result<Vec<String>> {
        let mut digests: Vec<String> = self.entries.read().keys().cloned().collect();
        digests.sort();
        Ok(digests)
    }

    fn reset(&self) -> Result<()> {
        let mut entries = self.entries.write();
        info!(entries = entries.len(), "Resetting statement store");
        entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_is_idempotent() {
        let store = MemoryStatementStore::new();

        let first = store.put("header.payload.sig").unwrap();
        let second = store.put("header.payload.sig").unwrap();

        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&first).unwrap(), "header.payload.sig");
    }

    #[test]
    fn test_get_missing() {
        let store = MemoryStatementStore::new();
        assert!(matches!(store.get("nope"), Err(FederationError::StoreMiss(_))));
        assert!(!store.contains("nope").unwrap());
    }

    #[test]
    fn test_reset_clears_entries() {
        let store = MemoryStatementStore::new();
        let a = store.put("a.a.a").unwrap();
        let b = store.put("b.b.b").unwrap();
        assert_eq!(store.digests().unwrap().len(), 2);

        store.reset().unwrap();

        assert!(store.is_empty());
        assert!(matches!(store.get(&a), Err(FederationError::StoreMiss(_))));
        assert!(matches!(store.get(&b), Err(FederationError::StoreMiss(_))));
    }
}
