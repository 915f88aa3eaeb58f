//! Operators: one issuer identity bound to its key bundle
//!
//! An operator signs claim sets with its own keys and verifies statements
//! from itself and from every issuer in its trusted [`KeyJar`].

use jsonwebtoken::{crypto, encode, Header};
use std::sync::Arc;
use tracing::debug;

use crate::chain::{ChainEvaluator, ChainResult};
use crate::error::{FederationError, Result};
use crate::keys::{Jwk, Jwks, KeyAlgorithm, KeyBundle, KeyJar, SigningKey};
use crate::token;
use crate::types::Claims;

/// Claim of an attestation carrying the attested JWKS
const SIGNING_KEYS: &str = "signing_keys";

/// Signer and verifier for one issuer
#[derive(Debug, Clone)]
pub struct Operator {
    bundle: KeyBundle,
    trusted: Arc<KeyJar>,
}

impl Operator {
    /// Create an operator that trusts only itself
    pub fn new(bundle: KeyBundle) -> Self {
        Self {
            bundle,
            trusted: Arc::new(KeyJar::new()),
        }
    }

    /// Share a jar of trusted issuer keys
    pub fn with_trusted(mut self, trusted: Arc<KeyJar>) -> Self {
        self.trusted = trusted;
        self
    }

    pub fn issuer(&self) -> &str {
        self.bundle.issuer()
    }

    pub fn bundle(&self) -> &KeyBundle {
        &self.bundle
    }

    pub fn trusted(&self) -> &Arc<KeyJar> {
        &self.trusted
    }

    /// Sign a claim set with the preferred signing key
    pub fn sign(&self, claims: &Claims) -> Result<String> {
        self.sign_using(self.bundle.signing_key()?, claims)
    }

    /// Sign with the first key of a specific algorithm
    pub fn sign_with(&self, claims: &Claims, alg: KeyAlgorithm) -> Result<String> {
        self.sign_using(self.bundle.signing_key_for(alg)?, claims)
    }

    fn sign_using(&self, key: &SigningKey, claims: &Claims) -> Result<String> {
        let mut header = Header::new(key.algorithm().jwt_algorithm());
        header.kid = Some(key.kid().to_string());

        let token = encode(&header, claims, &key.encoding_key()?)
            .map_err(|e| FederationError::Crypto(e.to_string()))?;
        debug!(issuer = %self.issuer(), kid = %key.kid(), alg = %key.algorithm(), "Signed statement");
        Ok(token)
    }

    /// Decode the claims without checking the signature ("unfurl")
    pub fn decode(&self, token: &str) -> Result<Claims> {
        token::unfurl(token)
    }

    /// Verify a token signed by `expected_issuer` and return its claims
    pub fn verify(&self, token: &str, expected_issuer: &str) -> Result<Claims> {
        let kid = token_kid(token)?;
        let jwks = self.issuer_keys(expected_issuer)?;
        let jwk = jwks.find(&kid).ok_or_else(|| {
            FederationError::SignatureVerification(format!(
                "kid '{}' is not a key of '{}'",
                kid, expected_issuer
            ))
        })?;
        let claims = verify_with_jwk(token, jwk)?;
        debug!(issuer = %expected_issuer, kid = %kid, "Verified statement");
        Ok(claims)
    }

    /// Verify a token whose signer is identified only by its key ID
    ///
    /// Returns the resolved issuer along with the verified claims.
    pub fn verify_nested(&self, token: &str) -> Result<(String, Claims)> {
        let kid = token_kid(token)?;
        let issuer = if self.bundle.get(&kid).is_some() {
            self.issuer().to_string()
        } else {
            self.trusted
                .find_kid(&kid)
                .map(|(issuer, _)| issuer)
                .ok_or_else(|| {
                    FederationError::UnknownIssuer(format!("no trusted issuer holds kid '{}'", kid))
                })?
        };
        let claims = self.verify(token, &issuer)?;
        Ok((issuer, claims))
    }

    /// Public keys of an issuer this operator can verify
    pub fn issuer_keys(&self, issuer: &str) -> Result<Jwks> {
        if issuer == self.issuer() {
            return self.bundle.public_jwks();
        }
        self.trusted
            .issuer_keys(issuer)
            .ok_or_else(|| FederationError::UnknownIssuer(issuer.to_string()))
    }

    /// Verify, reconstruct and merge every trust path under `top`
    pub fn evaluate_chain(&self, top: &Claims) -> Result<Vec<ChainResult>> {
        ChainEvaluator::new(self).evaluate(top)
    }

    /// Sign another issuer's public JWKS ("signed JWKS")
    pub fn attest(&self, bundle: &KeyBundle) -> Result<String> {
        let mut claims = Claims::new();
        claims.insert("iss".into(), self.issuer().into());
        claims.insert("sub".into(), bundle.issuer().into());
        claims.insert("iat".into(), chrono::Utc::now().timestamp().into());
        claims.insert(
            SIGNING_KEYS.into(),
            serde_json::to_value(bundle.public_jwks()?)?,
        );
        self.sign(&claims)
    }

    /// Verify an attestation issued by `authority`
    ///
    /// Returns the attested issuer and its public JWKS, ready for
    /// [`KeyJar::register`].
    pub fn verify_attestation(&self, attestation: &str, authority: &str) -> Result<(String, Jwks)> {
        let claims = self.verify(attestation, authority)?;
        let subject = claims
            .get("sub")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FederationError::MalformedToken("attestation lacks 'sub'".into()))?
            .to_string();
        let jwks: Jwks = claims
            .get(SIGNING_KEYS)
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| {
                FederationError::MalformedToken(format!("attestation lacks '{}'", SIGNING_KEYS))
            })?;
        Ok((subject, jwks))
    }
}

fn token_kid(token: &str) -> Result<String> {
    // The payload must parse before any key lookup
    token::unfurl(token)?;
    token::header(token)?
        .kid
        .ok_or_else(|| FederationError::MalformedToken("header lacks 'kid'".into()))
}

fn verify_with_jwk(token: &str, jwk: &Jwk) -> Result<Claims> {
    let header = token::header(token)?;
    let alg: KeyAlgorithm = header.alg.parse().map_err(|_| {
        FederationError::SignatureVerification(format!("unsupported algorithm '{}'", header.alg))
    })?;
    if jwk.algorithm()? != alg {
        return Err(FederationError::SignatureVerification(format!(
            "token algorithm {} does not match key algorithm",
            alg
        )));
    }

    // Signature only; claim values are never interpreted here
    let [header_segment, payload_segment, signature] = token::segments(token)?;
    let message = format!("{}{}{}", header_segment, token::DELIMITER, payload_segment);
    if !crypto::verify(
        signature,
        message.as_bytes(),
        &jwk.decoding_key()?,
        alg.jwt_algorithm(),
    )? {
        return Err(FederationError::SignatureVerification(
            "signature does not match".into(),
        ));
    }
    token::unfurl(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KeyDefinition, KeyUse};
    use serde_json::json;

    fn ec_operator(issuer: &str) -> Operator {
        Operator::new(KeyBundle::new(
            issuer,
            vec![SigningKey::generate_ec(KeyUse::Sig).unwrap()],
        ))
    }

    fn claims(value: serde_json::Value) -> Claims {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_sign_and_verify_self() {
        let op = ec_operator("https://swamid.sunet.se");
        let c = claims(json!({"federation_usage": "discovery"}));

        let token = op.sign(&c).unwrap();
        assert_eq!(op.verify(&token, "https://swamid.sunet.se").unwrap(), c);
        assert_eq!(op.decode(&token).unwrap(), c);
    }

    #[test]
    fn test_verify_unknown_issuer() {
        let op = ec_operator("https://swamid.sunet.se");
        let token = op.sign(&Claims::new()).unwrap();

        let err = op.verify(&token, "https://unknown.example.com").unwrap_err();
        assert!(matches!(err, FederationError::UnknownIssuer(_)));
    }

    #[test]
    fn test_verify_with_foreign_key_fails() {
        let signer = ec_operator("https://feide.no");
        let verifier = ec_operator("https://swamid.sunet.se");
        verifier
            .trusted()
            .register(signer.issuer(), &signer.bundle().public_jwks().unwrap());

        let token = signer.sign(&Claims::new()).unwrap();
        // Signed by feide, claimed to come from swamid
        let err = verifier.verify(&token, "https://swamid.sunet.se").unwrap_err();
        assert!(matches!(err, FederationError::SignatureVerification(_)));

        assert!(verifier.verify(&token, "https://feide.no").is_ok());
    }

    #[test]
    fn test_verify_nested_resolves_signer() {
        let signer = ec_operator("https://feide.no");
        let jar = Arc::new(KeyJar::from_bundles([signer.bundle()]).unwrap());
        let verifier = ec_operator("https://edugain.com").with_trusted(jar);

        let token = signer.sign(&claims(json!({"a": 1}))).unwrap();
        let (issuer, verified) = verifier.verify_nested(&token).unwrap();
        assert_eq!(issuer, "https://feide.no");
        assert_eq!(verified["a"], 1);

        let stranger = ec_operator("https://stranger.example.com");
        let token = stranger.sign(&Claims::new()).unwrap();
        assert!(matches!(
            verifier.verify_nested(&token),
            Err(FederationError::UnknownIssuer(_))
        ));
    }

    #[test]
    fn test_registered_claim_names_with_any_value_roundtrip() {
        let op = Operator::new(
            KeyBundle::generate("https://swamid.sunet.se", &KeyDefinition::defaults()).unwrap(),
        );
        let cases = [
            json!({"sub": {"id": "x"}}),
            json!({"sub": [1]}),
            json!({"aud": 3, "exp": "x", "iss": 1, "nbf": -5, "sub": [1]}),
        ];

        for alg in [KeyAlgorithm::Rs256, KeyAlgorithm::Es256] {
            for case in &cases {
                let c = claims(case.clone());
                let token = op.sign_with(&c, alg).unwrap();
                assert_eq!(op.verify(&token, "https://swamid.sunet.se").unwrap(), c, "{}", alg);
            }
        }
    }

    #[test]
    fn test_malformed_token() {
        let op = ec_operator("https://feide.no");
        assert!(matches!(
            op.verify("not-a-token", "https://feide.no"),
            Err(FederationError::MalformedToken(_))
        ));
        assert!(matches!(op.decode("a.b"), Err(FederationError::MalformedToken(_))));
    }

    #[test]
    fn test_sign_with_missing_algorithm() {
        let op = ec_operator("https://feide.no");
        assert!(matches!(
            op.sign_with(&Claims::new(), KeyAlgorithm::Rs256),
            Err(FederationError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn test_attestation_roundtrip() {
        let authority = ec_operator("https://test.example.com");
        let member = KeyBundle::generate("https://sunet.se", &[KeyDefinition::ec_p256()]).unwrap();

        let attestation = authority.attest(&member).unwrap();
        let (subject, jwks) = authority
            .verify_attestation(&attestation, "https://test.example.com")
            .unwrap();

        assert_eq!(subject, "https://sunet.se");
        assert_eq!(jwks, member.public_jwks().unwrap());
    }
}
