//! JSON Web Key documents
//!
//! Public JWKs are what verifiers hold in a [`KeyJar`](super::KeyJar);
//! private JWKs (with `d`, `p`, `q`) are what a persisted key bundle stores.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{KeyAlgorithm, KeyUse};
use crate::error::{FederationError, Result};

/// JWKS (JSON Web Key Set)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Find a key by key ID
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }

    /// Copy of this set with all private members removed
    pub fn to_public(&self) -> Jwks {
        Jwks {
            keys: self.keys.iter().map(Jwk::to_public).collect(),
        }
    }
}

/// Individual JWK (JSON Web Key)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" or "EC")
    pub kty: String,
    /// Key ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Algorithm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Use (sig for signing)
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// RSA modulus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA public exponent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// EC curve
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// EC x coordinate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// EC y coordinate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    /// Private exponent (RSA) or private scalar (EC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    /// First RSA prime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    /// Second RSA prime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
}

impl Jwk {
    /// Whether this JWK carries private key material
    pub fn is_private(&self) -> bool {
        self.d.is_some()
    }

    /// Copy without private members
    pub fn to_public(&self) -> Jwk {
        Jwk {
            d: None,
            p: None,
            q: None,
            ..self.clone()
        }
    }

    /// Signing algorithm declared by (or implied for) this key
    pub fn algorithm(&self) -> Result<KeyAlgorithm> {
        match self.alg.as_deref() {
            Some(alg) => alg.parse(),
            None => match self.kty.as_str() {
                "RSA" => Ok(KeyAlgorithm::Rs256),
                "EC" => Ok(KeyAlgorithm::Es256),
                kty => Err(FederationError::Crypto(format!("Unsupported key type: {}", kty))),
            },
        }
    }

    /// Declared key usage; keys without `use` are treated as signing keys
    pub fn usage(&self) -> Result<KeyUse> {
        match self.key_use.as_deref() {
            Some(key_use) => key_use.parse(),
            None => Ok(KeyUse::Sig),
        }
    }

    /// RFC 7638 thumbprint: SHA-256 over the required members, base64url
    pub fn thumbprint(&self) -> Result<String> {
        let canonical = match self.kty.as_str() {
            "RSA" => serde_json::json!({
                "e": required(&self.e, "e")?,
                "kty": "RSA",
                "n": required(&self.n, "n")?,
            }),
            "EC" => serde_json::json!({
                "crv": required(&self.crv, "crv")?,
                "kty": "EC",
                "x": required(&self.x, "x")?,
                "y": required(&self.y, "y")?,
            }),
            kty => {
                return Err(FederationError::Crypto(format!("Unsupported key type: {}", kty)))
            }
        };
        // serde_json maps are sorted, so this is the canonical member order
        let digest = Sha256::digest(serde_json::to_string(&canonical)?.as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(digest))
    }

    /// Create a decoding key for signature verification
    pub fn decoding_key(&self) -> Result<DecodingKey> {
        match self.kty.as_str() {
            "RSA" => {
                let n = required(&self.n, "n")?;
                let e = required(&self.e, "e")?;
                DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| FederationError::Crypto(e.to_string()))
            }
            "EC" => {
                let x = required(&self.x, "x")?;
                let y = required(&self.y, "y")?;
                DecodingKey::from_ec_components(x, y)
                    .map_err(|e| FederationError::Crypto(e.to_string()))
            }
            kty => Err(FederationError::Crypto(format!("Unsupported key type: {}", kty))),
        }
    }
}

fn required<'a>(member: &'a Option<String>, name: &str) -> Result<&'a str> {
    member
        .as_deref()
        .ok_or_else(|| FederationError::Crypto(format!("JWK is missing member '{}'", name)))
}

pub(crate) fn b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub(crate) fn unb64(member: &Option<String>, name: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(required(member, name)?)
        .map_err(|e| FederationError::Crypto(format!("JWK member '{}': {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7638 section 3.1 example key
    fn rfc7638_key() -> Jwk {
        Jwk {
            kty: "RSA".into(),
            n: Some(
                "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw"
                    .into(),
            ),
            e: Some("AQAB".into()),
            alg: Some("RS256".into()),
            kid: Some("2011-04-29".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_thumbprint_matches_rfc7638_example() {
        assert_eq!(
            rfc7638_key().thumbprint().unwrap(),
            "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs"
        );
    }

    #[test]
    fn test_to_public_strips_private_members() {
        let mut jwk = rfc7638_key();
        jwk.d = Some("secret".into());
        jwk.p = Some("p".into());
        assert!(jwk.is_private());

        let public = jwk.to_public();
        assert!(!public.is_private());
        assert!(public.p.is_none());
        assert_eq!(public.n, jwk.n);
    }

    #[test]
    fn test_algorithm_defaults_from_key_type() {
        let jwk = Jwk {
            kty: "EC".into(),
            ..Default::default()
        };
        assert_eq!(jwk.algorithm().unwrap(), KeyAlgorithm::Es256);
        assert_eq!(jwk.usage().unwrap(), KeyUse::Sig);
    }

    #[test]
    fn test_jwks_find_by_kid() {
        let jwks = Jwks {
            keys: vec![rfc7638_key()],
        };
        assert!(jwks.find("2011-04-29").is_some());
        assert!(jwks.find("missing").is_none());
    }

    #[test]
    fn test_use_field_serialized_as_use() {
        let jwk = Jwk {
            kty: "EC".into(),
            key_use: Some("sig".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&jwk).unwrap();
        assert_eq!(json["use"], "sig");
        assert!(json.get("d").is_none());
    }
}
