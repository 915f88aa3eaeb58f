//! Chain reconstruction, verification and policy merge
//!
//! Starting from an already-decoded top-level claim set, every nested
//! statement is verified and descended into. Each distinct nesting path
//! becomes one [`ChainResult`]; alternate inner statements at the same
//! level fan out into independent results and are never combined.
//!
//! The least entitlement (`le`) of a path is the innermost statement's
//! policy, override-merged with each outer statement's policy in turn,
//! the top-level claims last.

use serde::Serialize;
use tracing::debug;

use crate::error::{FederationError, Result};
use crate::operator::Operator;
use crate::store::{resolve, StatementStore};
use crate::types::{override_merge, policy_of, Claims, NestedStatements};

/// Deepest nesting accepted before giving up
pub const MAX_CHAIN_DEPTH: usize = 32;

/// One verified link of a chain
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifiedStatement {
    /// Issuer whose signature was checked; `None` for the top-level claims
    /// and for nested claim sets that arrived already decoded
    pub signer: Option<String>,
    pub claims: Claims,
}

/// A verified trust path and its aggregate policy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainResult {
    /// Innermost first, top-level claims last
    pub statements: Vec<VerifiedStatement>,
    /// Least entitlement
    pub le: Claims,
}

impl ChainResult {
    fn from_path(statements: Vec<VerifiedStatement>) -> Self {
        let mut le = Claims::new();
        for statement in &statements {
            override_merge(&mut le, &policy_of(&statement.claims));
        }
        Self { statements, le }
    }

    /// Signers along the path, innermost first
    pub fn signers(&self) -> Vec<&str> {
        self.statements
            .iter()
            .filter_map(|s| s.signer.as_deref())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Walks nested statements through an operator's trusted keys
#[derive(Debug)]
pub struct ChainEvaluator<'a> {
    operator: &'a Operator,
    store: Option<(&'a dyn StatementStore, String)>,
}

impl<'a> ChainEvaluator<'a> {
    pub fn new(operator: &'a Operator) -> Self {
        Self {
            operator,
            store: None,
        }
    }

    /// Dereference `metadata_statement_uris` through a store
    pub fn with_store(mut self, store: &'a dyn StatementStore, uri_base: impl Into<String>) -> Self {
        self.store = Some((store, uri_base.into()));
        self
    }

    /// Evaluate every trust path under `top`
    ///
    /// Aborts on the first link that fails to verify.
    pub fn evaluate(&self, top: &Claims) -> Result<Vec<ChainResult>> {
        let top = VerifiedStatement {
            signer: None,
            claims: top.clone(),
        };
        let results: Vec<ChainResult> = self
            .paths(top, 0)?
            .into_iter()
            .map(ChainResult::from_path)
            .collect();
        debug!(paths = results.len(), "Evaluated metadata statement");
        Ok(results)
    }

    fn paths(
        &self,
        statement: VerifiedStatement,
        depth: usize,
    ) -> Result<Vec<Vec<VerifiedStatement>>> {
        if depth > MAX_CHAIN_DEPTH {
            return Err(FederationError::MalformedToken(format!(
                "statements nested deeper than {}",
                MAX_CHAIN_DEPTH
            )));
        }
        let nested = match NestedStatements::from_claims(&statement.claims)? {
            Some(nested) if !nested.is_empty() => nested,
            _ => return Ok(vec![vec![statement]]),
        };

        let mut paths = Vec::new();
        for inner in self.unpack(nested)? {
            for mut path in self.paths(inner, depth + 1)? {
                path.push(statement.clone());
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn unpack(&self, nested: NestedStatements) -> Result<Vec<VerifiedStatement>> {
        match nested {
            NestedStatements::Embedded(entries) => entries
                .iter()
                .map(|entry| self.unpack_embedded(entry))
                .collect(),
            NestedStatements::Referenced(uris) => {
                let (store, uri_base) = self.store.as_ref().ok_or_else(|| {
                    FederationError::InvalidLocator(
                        "no statement store configured to dereference statement URIs".into(),
                    )
                })?;
                uris.iter()
                    .map(|(signer, uri)| {
                        let token = resolve(*store, uri_base, uri)?;
                        let claims = self.operator.verify(&token, signer)?;
                        Ok(VerifiedStatement {
                            signer: Some(signer.clone()),
                            claims,
                        })
                    })
                    .collect()
            }
        }
    }

    fn unpack_embedded(&self, entry: &str) -> Result<VerifiedStatement> {
        if entry.trim_start().starts_with('{') {
            // Dereferenced earlier by the caller and handed over as JSON
            let claims: Claims = serde_json::from_str(entry).map_err(|e| {
                FederationError::MalformedToken(format!("embedded claim set: {}", e))
            })?;
            debug!("Accepting embedded claim set without signature");
            return Ok(VerifiedStatement {
                signer: None,
                claims,
            });
        }
        let (signer, claims) = self.operator.verify_nested(entry)?;
        Ok(VerifiedStatement {
            signer: Some(signer),
            claims,
        })
    }
}
