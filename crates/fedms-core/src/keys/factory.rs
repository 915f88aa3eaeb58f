//! Key bundle factory
//!
//! Generates per-issuer key bundles from key definitions. Each bundle is
//! attested by a signing authority, which signs the bundle's public JWKS.
//! Bundles can be persisted as one JSON document per issuer and reloaded.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use url::Url;

use super::{Jwk, Jwks, KeyBundle, KeyDefinition};
use crate::error::{FederationError, Result};
use crate::operator::Operator;

/// On-disk form of a key bundle
#[derive(Debug, Serialize, Deserialize)]
struct PersistedBundle {
    iss: String,
    keys: Vec<Jwk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signed_jwks: Option<String>,
}

/// Builds key bundles for a set of issuers
#[derive(Debug)]
pub struct KeyBundleFactory<'a> {
    authority: &'a Operator,
    definitions: Vec<KeyDefinition>,
}

impl<'a> KeyBundleFactory<'a> {
    /// `authority` attests every bundle the factory builds
    pub fn new(authority: &'a Operator, definitions: Vec<KeyDefinition>) -> Self {
        Self {
            authority,
            definitions,
        }
    }

    pub fn definitions(&self) -> &[KeyDefinition] {
        &self.definitions
    }

    /// Build one in-memory bundle per issuer
    pub fn build<S: AsRef<str>>(&self, issuers: &[S]) -> Result<BTreeMap<String, KeyBundle>> {
        let mut bundles = BTreeMap::new();
        for issuer in issuers {
            let issuer = issuer.as_ref();
            let bundle = KeyBundle::generate(issuer, &self.definitions)?;
            let attestation = self.authority.attest(&bundle)?;
            info!(
                issuer = %issuer,
                keys = bundle.keys().len(),
                authority = %self.authority.issuer(),
                "Generated key bundle"
            );
            bundles.insert(issuer.to_string(), bundle.with_attestation(attestation));
        }
        Ok(bundles)
    }

    /// Build bundles and persist each under `base_dir`
    ///
    /// Fails with `PathCollision` before generating anything if two issuers
    /// map to the same file.
    pub fn build_persisted<S: AsRef<str>>(
        &self,
        issuers: &[S],
        base_dir: &Path,
    ) -> Result<BTreeMap<String, KeyBundle>> {
        let mut claimed: HashMap<PathBuf, &str> = HashMap::new();
        for issuer in issuers {
            let issuer = issuer.as_ref();
            let path = Self::bundle_path(base_dir, issuer);
            if let Some(first) = claimed.get(&path) {
                if *first != issuer {
                    return Err(FederationError::PathCollision {
                        first: first.to_string(),
                        second: issuer.to_string(),
                        path: path.display().to_string(),
                    });
                }
                continue;
            }
            claimed.insert(path, issuer);
        }

        std::fs::create_dir_all(base_dir)?;
        let bundles = self.build(issuers)?;
        for bundle in bundles.values() {
            Self::persist(base_dir, bundle)?;
        }
        Ok(bundles)
    }

    /// Write a bundle to its path under `base_dir`, atomically
    pub fn persist(base_dir: &Path, bundle: &KeyBundle) -> Result<PathBuf> {
        let path = Self::bundle_path(base_dir, bundle.issuer());
        let document = PersistedBundle {
            iss: bundle.issuer().to_string(),
            keys: bundle.private_jwks()?.keys,
            signed_jwks: bundle.attestation().map(str::to_string),
        };

        let mut file = NamedTempFile::new_in(base_dir)?;
        serde_json::to_writer_pretty(&mut file, &document)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(&path).map_err(|e| FederationError::Io(e.error))?;

        info!(issuer = %bundle.issuer(), path = %path.display(), "Persisted key bundle");
        Ok(path)
    }

    /// Reload a persisted bundle
    pub fn load(base_dir: &Path, issuer: &str) -> Result<KeyBundle> {
        let path = Self::bundle_path(base_dir, issuer);
        let document: PersistedBundle = serde_json::from_slice(&std::fs::read(&path)?)?;
        if document.iss != issuer {
            return Err(FederationError::PathCollision {
                first: document.iss,
                second: issuer.to_string(),
                path: path.display().to_string(),
            });
        }

        let bundle = KeyBundle::from_private_jwks(issuer, &Jwks { keys: document.keys })?;
        Ok(match document.signed_jwks {
            Some(attestation) => bundle.with_attestation(attestation),
            None => bundle,
        })
    }

    /// Reload every bundle persisted under `base_dir`, keyed by issuer
    pub fn load_all(base_dir: &Path) -> Result<BTreeMap<String, KeyBundle>> {
        let mut bundles = BTreeMap::new();
        for entry in std::fs::read_dir(base_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let document: PersistedBundle = serde_json::from_slice(&std::fs::read(&path)?)?;
            let bundle = Self::load(base_dir, &document.iss)?;
            bundles.insert(document.iss, bundle);
        }
        debug!(dir = %base_dir.display(), bundles = bundles.len(), "Loaded key bundles");
        Ok(bundles)
    }

    /// Deterministic file path of an issuer's bundle
    pub fn bundle_path(base_dir: &Path, issuer: &str) -> PathBuf {
        base_dir.join(format!("{}.json", normalize_issuer(issuer)))
    }
}

/// File-name form of an issuer identifier
///
/// The scheme is dropped; host, port and path are kept, and every character
/// outside `[A-Za-z0-9.-]` becomes `_`. Distinct issuers can collide
/// (`http` vs `https`, case of the host), which is why persisting checks.
pub fn normalize_issuer(issuer: &str) -> String {
    let raw = match Url::parse(issuer) {
        Ok(url) => match url.host_str() {
            Some(host) => {
                let mut name = host.to_string();
                if let Some(port) = url.port() {
                    name.push('_');
                    name.push_str(&port.to_string());
                }
                let path = url.path().trim_matches('/');
                if !path.is_empty() {
                    name.push('_');
                    name.push_str(path);
                }
                name
            }
            None => issuer.to_string(),
        },
        Err(_) => issuer.to_string(),
    };

    let name: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() {
        "_".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KeyAlgorithm, KeyUse, SigningKey};

    fn authority() -> Operator {
        Operator::new(KeyBundle::new(
            "https://test.example.com",
            vec![SigningKey::generate_ec(KeyUse::Sig).unwrap()],
        ))
    }

    #[test]
    fn test_normalize_issuer() {
        assert_eq!(normalize_issuer("https://swamid.sunet.se"), "swamid.sunet.se");
        assert_eq!(
            normalize_issuer("https://op.example.com:8443/fed/v1/"),
            "op.example.com_8443_fed_v1"
        );
        assert_eq!(normalize_issuer("not a url"), "not_a_url");
    }

    #[test]
    fn test_build_attests_every_bundle() {
        let authority = authority();
        let factory = KeyBundleFactory::new(&authority, vec![KeyDefinition::ec_p256()]);
        let issuers = ["https://foo.example.com", "https://bar.example.com"];

        let bundles = factory.build(&issuers).unwrap();
        assert_eq!(bundles.len(), 2);

        for issuer in issuers {
            let bundle = &bundles[issuer];
            assert_eq!(bundle.issuer(), issuer);
            assert_eq!(bundle.keys_by_alg_and_usage(KeyAlgorithm::Es256, KeyUse::Sig).len(), 1);

            let (subject, jwks) = authority
                .verify_attestation(bundle.attestation().unwrap(), "https://test.example.com")
                .unwrap();
            assert_eq!(subject, issuer);
            assert_eq!(jwks, bundle.public_jwks().unwrap());
        }
    }

    #[test]
    fn test_path_collision_detected() {
        let dir = tempfile::tempdir().unwrap();
        let authority = authority();
        let factory = KeyBundleFactory::new(&authority, vec![KeyDefinition::ec_p256()]);

        let err = factory
            .build_persisted(&["https://sunet.se", "http://sunet.se"], dir.path())
            .unwrap_err();
        assert!(matches!(err, FederationError::PathCollision { .. }));
        // Nothing was written
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_persist_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let authority = authority();
        let factory = KeyBundleFactory::new(&authority, vec![KeyDefinition::ec_p256()]);

        let bundles = factory
            .build_persisted(&["https://feide.no"], &dir.path().join("fo_jwks"))
            .unwrap();
        let path = KeyBundleFactory::bundle_path(&dir.path().join("fo_jwks"), "https://feide.no");
        assert!(path.ends_with("feide.no.json"));

        let loaded = KeyBundleFactory::load(&dir.path().join("fo_jwks"), "https://feide.no").unwrap();
        let original = &bundles["https://feide.no"];
        assert_eq!(loaded.public_jwks().unwrap(), original.public_jwks().unwrap());
        assert_eq!(loaded.attestation(), original.attestation());
    }

    #[test]
    fn test_load_all_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let authority = authority();
        let factory = KeyBundleFactory::new(&authority, vec![KeyDefinition::ec_p256()]);
        factory
            .build_persisted(&["https://feide.no", "https://sunet.se"], dir.path())
            .unwrap();
        std::fs::write(dir.path().join("README"), "not a bundle").unwrap();

        let loaded = KeyBundleFactory::load_all(dir.path()).unwrap();
        let issuers: Vec<&str> = loaded.keys().map(String::as_str).collect();
        assert_eq!(issuers, vec!["https://feide.no", "https://sunet.se"]);
    }

    #[test]
    fn test_load_missing_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let err = KeyBundleFactory::load(dir.path(), "https://nobody.example.com").unwrap_err();
        assert!(err.is_retryable());
    }
}
