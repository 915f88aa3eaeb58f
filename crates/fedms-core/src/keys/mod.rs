//! Per-issuer signing key material
//!
//! Key types:
//! - `SigningKey`: one RSA or EC P-256 private key with its key ID
//! - `KeyBundle`: all signing keys of one issuer
//! - `KeyJar`: public keys of the issuers a verifier trusts
//! - `KeyBundleFactory`: builds bundles in memory or on disk

pub mod factory;
pub mod jar;
pub mod jwk;

pub use factory::KeyBundleFactory;
pub use jar::KeyJar;
pub use jwk::{Jwk, Jwks};

use jsonwebtoken::{Algorithm, EncodingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::EncodePrivateKey;
use rand::rngs::OsRng;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey};
use serde::{Deserialize, Serialize};

use crate::error::{FederationError, Result};
use jwk::{b64, unb64};

/// Smallest RSA modulus the signing backend accepts
pub const MIN_RSA_BITS: usize = 2048;

/// Signature algorithms, in signing preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    #[serde(rename = "RS256")]
    Rs256,
    #[serde(rename = "ES256")]
    Es256,
}

impl KeyAlgorithm {
    /// Preference order used when an operator picks its signing key
    pub const PREFERENCE: [KeyAlgorithm; 2] = [KeyAlgorithm::Rs256, KeyAlgorithm::Es256];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlgorithm::Rs256 => "RS256",
            KeyAlgorithm::Es256 => "ES256",
        }
    }

    /// JWK key type for this algorithm
    pub fn kty(&self) -> &'static str {
        match self {
            KeyAlgorithm::Rs256 => "RSA",
            KeyAlgorithm::Es256 => "EC",
        }
    }

    pub fn jwt_algorithm(&self) -> Algorithm {
        match self {
            KeyAlgorithm::Rs256 => Algorithm::RS256,
            KeyAlgorithm::Es256 => Algorithm::ES256,
        }
    }
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for KeyAlgorithm {
    type Err = FederationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RS256" => Ok(KeyAlgorithm::Rs256),
            "ES256" => Ok(KeyAlgorithm::Es256),
            _ => Err(FederationError::Crypto(format!("Unsupported algorithm: {}", s))),
        }
    }
}

/// Intended key usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUse {
    Sig,
}

impl KeyUse {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyUse::Sig => "sig",
        }
    }
}

impl std::str::FromStr for KeyUse {
    type Err = FederationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sig" => Ok(KeyUse::Sig),
            _ => Err(FederationError::Crypto(format!("Unsupported key use: {}", s))),
        }
    }
}

/// Key family of a [`KeyDefinition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "RSA")]
    Rsa,
    #[serde(rename = "EC")]
    Ec,
}

/// Declarative description of one key to generate per issuer
///
/// Deserializes from the usual key definition documents:
/// `{"type": "RSA", "use": ["sig"]}` or
/// `{"type": "EC", "crv": "P-256", "use": ["sig"]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDefinition {
    #[serde(rename = "type")]
    pub key_type: KeyType,

    /// Curve name, EC only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// Modulus size, RSA only
    #[serde(default = "default_rsa_bits")]
    pub bits: usize,

    #[serde(rename = "use", default = "default_uses")]
    pub uses: Vec<KeyUse>,
}

fn default_rsa_bits() -> usize {
    MIN_RSA_BITS
}

fn default_uses() -> Vec<KeyUse> {
    vec![KeyUse::Sig]
}

impl KeyDefinition {
    /// RSA signing key definition
    pub fn rsa() -> Self {
        Self {
            key_type: KeyType::Rsa,
            crv: None,
            bits: MIN_RSA_BITS,
            uses: default_uses(),
        }
    }

    /// EC P-256 signing key definition
    pub fn ec_p256() -> Self {
        Self {
            key_type: KeyType::Ec,
            crv: Some("P-256".into()),
            bits: MIN_RSA_BITS,
            uses: default_uses(),
        }
    }

    /// The default federation key set: one RSA and one EC P-256 signing key
    pub fn defaults() -> Vec<KeyDefinition> {
        vec![Self::rsa(), Self::ec_p256()]
    }

    pub fn algorithm(&self) -> Result<KeyAlgorithm> {
        match self.key_type {
            KeyType::Rsa => Ok(KeyAlgorithm::Rs256),
            KeyType::Ec => match self.crv.as_deref() {
                None | Some("P-256") => Ok(KeyAlgorithm::Es256),
                Some(crv) => Err(FederationError::Crypto(format!("Unsupported curve: {}", crv))),
            },
        }
    }

    /// Generate one key per declared usage
    pub fn generate(&self) -> Result<Vec<SigningKey>> {
        let alg = self.algorithm()?;
        self.uses
            .iter()
            .map(|key_use| match alg {
                KeyAlgorithm::Rs256 => SigningKey::generate_rsa(self.bits, *key_use),
                KeyAlgorithm::Es256 => SigningKey::generate_ec(*key_use),
            })
            .collect()
    }
}

#[derive(Clone)]
enum KeyMaterial {
    Rsa(Box<RsaPrivateKey>),
    Ec(p256::SecretKey),
}

/// One private signing key
#[derive(Clone)]
pub struct SigningKey {
    /// Key identifier (RFC 7638 thumbprint of the public key)
    kid: String,
    alg: KeyAlgorithm,
    key_use: KeyUse,
    material: KeyMaterial,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .field("use", &self.key_use)
            .field("material", &"[redacted]")
            .finish()
    }
}

impl SigningKey {
    /// Generate a new random RSA key
    pub fn generate_rsa(bits: usize, key_use: KeyUse) -> Result<Self> {
        if bits < MIN_RSA_BITS {
            return Err(FederationError::Crypto(format!(
                "RSA keys must have at least {} bits, got {}",
                MIN_RSA_BITS, bits
            )));
        }
        let key = RsaPrivateKey::new(&mut OsRng, bits)?;
        Self::from_material(KeyAlgorithm::Rs256, key_use, KeyMaterial::Rsa(Box::new(key)))
    }

    /// Generate a new random EC P-256 key
    pub fn generate_ec(key_use: KeyUse) -> Result<Self> {
        let key = p256::SecretKey::random(&mut OsRng);
        Self::from_material(KeyAlgorithm::Es256, key_use, KeyMaterial::Ec(key))
    }

    /// Rebuild a signing key from a private JWK
    pub fn from_jwk(jwk: &Jwk) -> Result<Self> {
        let alg = jwk.algorithm()?;
        let key_use = jwk.usage()?;
        let material = match alg {
            KeyAlgorithm::Rs256 => {
                let n = BigUint::from_bytes_be(&unb64(&jwk.n, "n")?);
                let e = BigUint::from_bytes_be(&unb64(&jwk.e, "e")?);
                let d = BigUint::from_bytes_be(&unb64(&jwk.d, "d")?);
                let p = BigUint::from_bytes_be(&unb64(&jwk.p, "p")?);
                let q = BigUint::from_bytes_be(&unb64(&jwk.q, "q")?);
                let mut key = RsaPrivateKey::from_components(n, e, d, vec![p, q])?;
                key.precompute()?;
                KeyMaterial::Rsa(Box::new(key))
            }
            KeyAlgorithm::Es256 => {
                let d = unb64(&jwk.d, "d")?;
                KeyMaterial::Ec(p256::SecretKey::from_slice(&d)?)
            }
        };
        let key = Self::from_material(alg, key_use, material)?;
        if let Some(kid) = &jwk.kid {
            if kid != &key.kid {
                return Err(FederationError::Crypto(format!(
                    "JWK kid '{}' does not match key thumbprint '{}'",
                    kid, key.kid
                )));
            }
        }
        Ok(key)
    }

    fn from_material(alg: KeyAlgorithm, key_use: KeyUse, material: KeyMaterial) -> Result<Self> {
        let mut key = Self {
            kid: String::new(),
            alg,
            key_use,
            material,
        };
        key.kid = key.public_jwk()?.thumbprint()?;
        Ok(key)
    }

    /// Get the key identifier
    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.alg
    }

    pub fn usage(&self) -> KeyUse {
        self.key_use
    }

    /// Public JWK for publication in a JWKS
    pub fn public_jwk(&self) -> Result<Jwk> {
        let mut jwk = Jwk {
            kty: self.alg.kty().to_string(),
            kid: (!self.kid.is_empty()).then(|| self.kid.clone()),
            alg: Some(self.alg.as_str().to_string()),
            key_use: Some(self.key_use.as_str().to_string()),
            ..Default::default()
        };
        match &self.material {
            KeyMaterial::Rsa(key) => {
                jwk.n = Some(b64(&key.n().to_bytes_be()));
                jwk.e = Some(b64(&key.e().to_bytes_be()));
            }
            KeyMaterial::Ec(key) => {
                let point = key.public_key().to_encoded_point(false);
                let x = point
                    .x()
                    .ok_or_else(|| FederationError::Crypto("EC point at infinity".into()))?;
                let y = point
                    .y()
                    .ok_or_else(|| FederationError::Crypto("EC point at infinity".into()))?;
                jwk.crv = Some("P-256".into());
                jwk.x = Some(b64(x));
                jwk.y = Some(b64(y));
            }
        }
        Ok(jwk)
    }

    /// Private JWK, used only for persisting a bundle
    pub fn private_jwk(&self) -> Result<Jwk> {
        let mut jwk = self.public_jwk()?;
        match &self.material {
            KeyMaterial::Rsa(key) => {
                let primes = key.primes();
                if primes.len() != 2 {
                    return Err(FederationError::Crypto(
                        "multi-prime RSA keys cannot be exported".into(),
                    ));
                }
                jwk.d = Some(b64(&key.d().to_bytes_be()));
                jwk.p = Some(b64(&primes[0].to_bytes_be()));
                jwk.q = Some(b64(&primes[1].to_bytes_be()));
            }
            KeyMaterial::Ec(key) => {
                jwk.d = Some(b64(&key.to_bytes()));
            }
        }
        Ok(jwk)
    }

    /// Encoding key for the JWS signer
    pub fn encoding_key(&self) -> Result<EncodingKey> {
        match &self.material {
            KeyMaterial::Rsa(key) => {
                let der = key
                    .to_pkcs1_der()
                    .map_err(|e| FederationError::Crypto(e.to_string()))?;
                Ok(EncodingKey::from_rsa_der(der.as_bytes()))
            }
            KeyMaterial::Ec(key) => {
                let der = key
                    .to_pkcs8_der()
                    .map_err(|e| FederationError::Crypto(e.to_string()))?;
                Ok(EncodingKey::from_ec_der(der.as_bytes()))
            }
        }
    }
}

/// All signing keys of one issuer
#[derive(Debug, Clone)]
pub struct KeyBundle {
    issuer: String,
    keys: Vec<SigningKey>,
    /// Token signed by the signing authority over this bundle's public JWKS
    attestation: Option<String>,
}

impl KeyBundle {
    pub fn new(issuer: impl Into<String>, keys: Vec<SigningKey>) -> Self {
        Self {
            issuer: issuer.into(),
            keys,
            attestation: None,
        }
    }

    /// Generate a fresh bundle from key definitions, without attestation
    pub fn generate(issuer: impl Into<String>, definitions: &[KeyDefinition]) -> Result<Self> {
        let mut keys = Vec::new();
        for definition in definitions {
            keys.extend(definition.generate()?);
        }
        let bundle = Self::new(issuer, keys);
        bundle.require(definitions)?;
        Ok(bundle)
    }

    /// Rebuild a bundle from private JWKs
    pub fn from_private_jwks(issuer: impl Into<String>, jwks: &Jwks) -> Result<Self> {
        let keys = jwks
            .keys
            .iter()
            .map(SigningKey::from_jwk)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(issuer, keys))
    }

    pub fn with_attestation(mut self, attestation: impl Into<String>) -> Self {
        self.attestation = Some(attestation.into());
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn keys(&self) -> &[SigningKey] {
        &self.keys
    }

    pub fn attestation(&self) -> Option<&str> {
        self.attestation.as_deref()
    }

    /// Keys matching algorithm and usage, in insertion order
    pub fn keys_by_alg_and_usage(&self, alg: KeyAlgorithm, key_use: KeyUse) -> Vec<&SigningKey> {
        self.keys
            .iter()
            .filter(|k| k.alg == alg && k.key_use == key_use)
            .collect()
    }

    /// Find a key by key ID
    pub fn get(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.iter().find(|k| k.kid == kid)
    }

    /// The key used for signing: first key of the most preferred algorithm
    pub fn signing_key(&self) -> Result<&SigningKey> {
        KeyAlgorithm::PREFERENCE
            .iter()
            .find_map(|alg| self.keys_by_alg_and_usage(*alg, KeyUse::Sig).into_iter().next())
            .ok_or_else(|| FederationError::KeyNotFound {
                issuer: self.issuer.clone(),
                detail: "no signing key".into(),
            })
    }

    /// First signing key of a specific algorithm
    pub fn signing_key_for(&self, alg: KeyAlgorithm) -> Result<&SigningKey> {
        self.keys_by_alg_and_usage(alg, KeyUse::Sig)
            .into_iter()
            .next()
            .ok_or_else(|| FederationError::KeyNotFound {
                issuer: self.issuer.clone(),
                detail: format!("no {} signing key", alg),
            })
    }

    /// Fail unless every defined (algorithm, usage) has at least one key
    pub fn require(&self, definitions: &[KeyDefinition]) -> Result<()> {
        for definition in definitions {
            let alg = definition.algorithm()?;
            for key_use in &definition.uses {
                if self.keys_by_alg_and_usage(alg, *key_use).is_empty() {
                    return Err(FederationError::KeyNotFound {
                        issuer: self.issuer.clone(),
                        detail: format!("no {} key for use '{}'", alg, key_use.as_str()),
                    });
                }
            }
        }
        Ok(())
    }

    /// Public JWKS of this bundle
    pub fn public_jwks(&self) -> Result<Jwks> {
        Ok(Jwks {
            keys: self
                .keys
                .iter()
                .map(SigningKey::public_jwk)
                .collect::<Result<Vec<_>>>()?,
        })
    }

    /// Private JWKS of this bundle
    pub fn private_jwks(&self) -> Result<Jwks> {
        Ok(Jwks {
            keys: self
                .keys
                .iter()
                .map(SigningKey::private_jwk)
                .collect::<Result<Vec<_>>>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_definition_parsing() {
        let defs: Vec<KeyDefinition> = serde_json::from_str(
            r#"[
                {"type": "RSA", "key": "", "use": ["sig"]},
                {"type": "EC", "crv": "P-256", "use": ["sig"]}
            ]"#,
        )
        .unwrap();

        assert_eq!(defs, KeyDefinition::defaults());
        assert_eq!(defs[0].algorithm().unwrap(), KeyAlgorithm::Rs256);
        assert_eq!(defs[1].algorithm().unwrap(), KeyAlgorithm::Es256);
    }

    #[test]
    fn test_unsupported_curve_rejected() {
        let def = KeyDefinition {
            crv: Some("P-384".into()),
            ..KeyDefinition::ec_p256()
        };
        assert!(def.algorithm().is_err());
    }

    #[test]
    fn test_small_rsa_keys_rejected() {
        let result = SigningKey::generate_rsa(1024, KeyUse::Sig);
        assert!(matches!(result, Err(FederationError::Crypto(_))));
    }

    #[test]
    fn test_ec_key_kid_is_thumbprint() {
        let key = SigningKey::generate_ec(KeyUse::Sig).unwrap();
        let jwk = key.public_jwk().unwrap();

        assert_eq!(jwk.kid.as_deref(), Some(key.kid()));
        assert_eq!(jwk.thumbprint().unwrap(), key.kid());
        assert_eq!(jwk.crv.as_deref(), Some("P-256"));
        assert!(!jwk.is_private());
    }

    #[test]
    fn test_ec_private_jwk_roundtrip() {
        let key = SigningKey::generate_ec(KeyUse::Sig).unwrap();
        let restored = SigningKey::from_jwk(&key.private_jwk().unwrap()).unwrap();

        assert_eq!(restored.kid(), key.kid());
        assert_eq!(restored.algorithm(), KeyAlgorithm::Es256);
    }

    #[test]
    fn test_mismatched_kid_rejected() {
        let key = SigningKey::generate_ec(KeyUse::Sig).unwrap();
        let mut jwk = key.private_jwk().unwrap();
        jwk.kid = Some("not-the-thumbprint".into());

        assert!(SigningKey::from_jwk(&jwk).is_err());
    }

    #[test]
    fn test_bundle_signing_preference() {
        let bundle = KeyBundle::generate("https://op.example.com", &KeyDefinition::defaults())
            .unwrap();

        assert_eq!(bundle.keys().len(), 2);
        assert_eq!(bundle.signing_key().unwrap().algorithm(), KeyAlgorithm::Rs256);
        assert_eq!(
            bundle.keys_by_alg_and_usage(KeyAlgorithm::Es256, KeyUse::Sig).len(),
            1
        );
    }

    #[test]
    fn test_bundle_require_reports_missing_algorithm() {
        let bundle = KeyBundle::generate("https://ec-only.example.com", &[KeyDefinition::ec_p256()])
            .unwrap();

        assert_eq!(bundle.signing_key().unwrap().algorithm(), KeyAlgorithm::Es256);
        let err = bundle.require(&KeyDefinition::defaults()).unwrap_err();
        assert!(matches!(err, FederationError::KeyNotFound { .. }));
    }
}
