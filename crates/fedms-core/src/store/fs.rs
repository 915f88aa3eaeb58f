//! Filesystem statement store
//!
//! One file per statement under a base directory, named by digest.
//! Files are written to a temporary name and renamed into place, so a
//! concurrent reader never observes a partial statement.

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::{digest, StatementStore};
use crate::error::{FederationError, Result};

/// Filesystem-backed statement store
#[derive(Debug, Clone)]
pub struct FsStatementStore {
    base_dir: PathBuf,
}

impl FsStatementStore {
    /// Open a store rooted at `base_dir`, creating the directory if needed
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        info!(path = %base_dir.display(), "Opened statement store");
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn entry_path(&self, digest: &str) -> Option<PathBuf> {
        is_digest(digest).then(|| self.base_dir.join(digest))
    }
}

/// Digests are 43 base64url characters; anything else is not an entry
fn is_digest(name: &str) -> bool {
    name.len() == 43
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

impl StatementStore for FsStatementStore {
    fn put(&self, token: &str) -> Result<String> {
        let digest = digest(token);
        let path = self.base_dir.join(&digest);
        if path.exists() {
            return Ok(digest);
        }

        let mut file = NamedTempFile::new_in(&self.base_dir)?;
        file.write_all(token.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(&path).map_err(|e| FederationError::Io(e.error))?;

        debug!(digest = %digest, path = %path.display(), "Stored statement");
        Ok(digest)
    }

    fn get(&self, digest: &str) -> Result<String> {
        let path = self
            .entry_path(digest)
            .ok_or_else(|| FederationError::StoreMiss(digest.to_string()))?;
        match std::fs::read_to_string(&path) {
            Ok(token) => Ok(token),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FederationError::StoreMiss(digest.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, digest: &str) -> Result<bool> {
        Ok(self.entry_path(digest).map(|p| p.is_file()).unwrap_or(false))
    }

    fn digests(&self) -> Result<Vec<String>> {
        let mut digests = Vec::new();
        for entry in std::fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if is_digest(name) && entry.file_type()?.is_file() {
                    digests.push(name.to_string());
                }
            }
        }
        digests.sort();
        Ok(digests)
    }

    fn reset(&self) -> Result<()> {
        let digests = self.digests()?;
        info!(entries = digests.len(), path = %self.base_dir.display(), "Resetting statement store");
        for digest in digests {
            std::fs::remove_file(self.base_dir.join(digest))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStatementStore::open(dir.path().join("mds")).unwrap();

        let digest = store.put("header.payload.sig").unwrap();
        assert_eq!(store.put("header.payload.sig").unwrap(), digest);
        assert_eq!(store.get(&digest).unwrap(), "header.payload.sig");
        assert!(dir.path().join("mds").join(&digest).is_file());
        assert_eq!(store.digests().unwrap(), vec![digest]);
    }

    #[test]
    fn test_reset_and_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStatementStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("README"), "not an entry").unwrap();

        let digest = store.put("a.b.c").unwrap();
        store.reset().unwrap();

        assert!(matches!(store.get(&digest), Err(FederationError::StoreMiss(_))));
        assert!(!store.contains(&digest).unwrap());
        // Unrelated files are left alone
        assert!(dir.path().join("README").exists());
    }

    #[test]
    fn test_path_traversal_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStatementStore::open(dir.path()).unwrap();
        assert!(matches!(store.get("../etc/passwd"), Err(FederationError::StoreMiss(_))));
    }

    #[test]
    fn test_reopen_sees_entries() {
        let dir = tempfile::tempdir().unwrap();
        let digest = FsStatementStore::open(dir.path()).unwrap().put("x.y.z").unwrap();

        let reopened = FsStatementStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(&digest).unwrap(), "x.y.z");
    }
}
