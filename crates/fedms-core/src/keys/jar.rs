//! Key jar for verifiers
//!
//! Thread-safe table of the public keys a verifier trusts, per issuer.
//! Operators share one jar through an `Arc`; registering a federation
//! member after the operators were built is visible to all of them.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::info;

use super::{Jwk, Jwks, KeyBundle};
use crate::error::Result;

/// Public keys of trusted issuers
#[derive(Debug, Default)]
pub struct KeyJar {
    /// issuer -> public JWKS
    issuers: RwLock<BTreeMap<String, Jwks>>,
}

impl KeyJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a jar holding the public half of every bundle
    pub fn from_bundles<'a>(bundles: impl IntoIterator<Item = &'a KeyBundle>) -> Result<Self> {
        let jar = Self::new();
        for bundle in bundles {
            jar.register_bundle(bundle)?;
        }
        Ok(jar)
    }

    /// Register an issuer's public keys, replacing any previous set
    pub fn register(&self, issuer: impl Into<String>, jwks: &Jwks) {
        let issuer = issuer.into();
        let public = jwks.to_public();
        info!(issuer = %issuer, keys = public.keys.len(), "Registered issuer keys");
        self.issuers.write().insert(issuer, public);
    }

    /// Register the public half of a key bundle
    pub fn register_bundle(&self, bundle: &KeyBundle) -> Result<()> {
        self.register(bundle.issuer(), &bundle.public_jwks()?);
        Ok(())
    }

    /// Remove an issuer
    pub fn unregister(&self, issuer: &str) -> bool {
        let removed = self.issuers.write().remove(issuer).is_some();
        if removed {
            info!(issuer = %issuer, "Unregistered issuer keys");
        }
        removed
    }

    /// Public keys of an issuer
    pub fn issuer_keys(&self, issuer: &str) -> Option<Jwks> {
        self.issuers.read().get(issuer).cloned()
    }

    /// Check if an issuer is known
    pub fn has_issuer(&self, issuer: &str) -> bool {
        self.issuers.read().contains_key(issuer)
    }

    /// Find which issuer holds a key ID
    pub fn find_kid(&self, kid: &str) -> Option<(String, Jwk)> {
        self.issuers.read().iter().find_map(|(issuer, jwks)| {
            jwks.find(kid).map(|jwk| (issuer.clone(), jwk.clone()))
        })
    }

    /// List all known issuers
    pub fn issuers(&self) -> Vec<String> {
        self.issuers.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.issuers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.issuers.read().is_empty()
    }
}
