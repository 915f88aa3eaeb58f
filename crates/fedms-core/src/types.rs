//! Claim sets and trust specifications

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{FederationError, Result};

/// A metadata statement's claim payload
pub type Claims = serde_json::Map<String, serde_json::Value>;

/// Claim key holding inline nested statements (list of tokens)
pub const METADATA_STATEMENTS: &str = "metadata_statements";

/// Claim key holding nested statements by reference (signer -> URI)
pub const METADATA_STATEMENT_URIS: &str = "metadata_statement_uris";

/// Protocol claims that never count as policy
pub const RESERVED_CLAIMS: &[&str] = &[
    "iss",
    "sub",
    "iat",
    "exp",
    "nbf",
    "jti",
    "kid",
    "signing_keys",
    METADATA_STATEMENTS,
    METADATA_STATEMENT_URIS,
];

/// The policy extension carried by a claim set: everything but protocol claims
pub fn policy_of(claims: &Claims) -> Claims {
    claims
        .iter()
        .filter(|(key, _)| !RESERVED_CLAIMS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Key-wise last-write-wins merge of `top` onto `base`
pub fn override_merge(base: &mut Claims, top: &Claims) {
    for (key, value) in top {
        base.insert(key.clone(), value.clone());
    }
}

/// Nested statements of one claim set
///
/// A claim set carries nested statements either inline or by reference,
/// never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NestedStatements {
    /// Inline tokens (or JSON-encoded claim sets that were already dereferenced)
    Embedded(Vec<String>),
    /// Nested signer -> locator URI
    Referenced(BTreeMap<String, String>),
}

impl NestedStatements {
    /// Read the nested statements of a claim set, if any
    pub fn from_claims(claims: &Claims) -> Result<Option<Self>> {
        match (
            claims.get(METADATA_STATEMENTS),
            claims.get(METADATA_STATEMENT_URIS),
        ) {
            (None, None) => Ok(None),
            (Some(_), Some(_)) => Err(FederationError::MalformedToken(format!(
                "claim set holds both '{}' and '{}'",
                METADATA_STATEMENTS, METADATA_STATEMENT_URIS
            ))),
            (Some(embedded), None) => {
                let tokens: Vec<String> = serde_json::from_value(embedded.clone()).map_err(|e| {
                    FederationError::MalformedToken(format!("{}: {}", METADATA_STATEMENTS, e))
                })?;
                Ok(Some(NestedStatements::Embedded(tokens)))
            }
            (None, Some(referenced)) => {
                let uris: BTreeMap<String, String> = serde_json::from_value(referenced.clone())
                    .map_err(|e| {
                        FederationError::MalformedToken(format!(
                            "{}: {}",
                            METADATA_STATEMENT_URIS, e
                        ))
                    })?;
                Ok(Some(NestedStatements::Referenced(uris)))
            }
        }
    }

    /// Write into a claim set, replacing whichever form was there before
    pub fn insert_into(self, claims: &mut Claims) {
        claims.remove(METADATA_STATEMENTS);
        claims.remove(METADATA_STATEMENT_URIS);
        match self {
            NestedStatements::Embedded(tokens) => {
                claims.insert(METADATA_STATEMENTS.into(), tokens.into());
            }
            NestedStatements::Referenced(uris) => {
                let map: Claims = uris.into_iter().map(|(k, v)| (k, v.into())).collect();
                claims.insert(METADATA_STATEMENT_URIS.into(), map.into());
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            NestedStatements::Embedded(tokens) => tokens.len(),
            NestedStatements::Referenced(uris) => uris.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One link of a trust path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrustStep {
    /// Base claims asked to be signed
    #[serde(default)]
    pub request: Claims,

    /// Issuer asking for the signature
    pub requester: String,

    /// Issuer that signs this step
    pub signer: String,

    /// Policy extension contributed by the signer
    #[serde(default)]
    pub signer_add: Claims,
}

impl TrustStep {
    pub fn new(requester: impl Into<String>, signer: impl Into<String>) -> Self {
        Self {
            request: Claims::new(),
            requester: requester.into(),
            signer: signer.into(),
            signer_add: Claims::new(),
        }
    }

    pub fn with_request(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.request.insert(key.into(), value);
        self
    }

    pub fn with_signer_add(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.signer_add.insert(key.into(), value);
        self
    }

    /// Claims signed at this step, before any nested statement is attached
    pub fn claims(&self) -> Claims {
        let mut claims = self.request.clone();
        override_merge(&mut claims, &self.signer_add);
        claims
    }
}

/// Steps listed outermost signer first; the last step is the one closest
/// to the original requester and is signed first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrustPath {
    pub steps: Vec<TrustStep>,
}

impl TrustPath {
    pub fn new(steps: Vec<TrustStep>) -> Self {
        Self { steps }
    }

    /// Signer of the outermost statement
    pub fn outermost_signer(&self) -> Option<&str> {
        self.steps.first().map(|s| s.signer.as_str())
    }
}

impl From<Vec<TrustStep>> for TrustPath {
    fn from(steps: Vec<TrustStep>) -> Self {
        Self::new(steps)
    }
}

/// Target identifier -> trust path, iterated in target order
pub type TrustSpec = BTreeMap<String, TrustPath>;
