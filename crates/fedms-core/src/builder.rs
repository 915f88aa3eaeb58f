//! Statement builder
//!
//! Turns a declarative trust specification into signed, nested metadata
//! statements. Each trust path is folded from its innermost step outward:
//! the token signed at one step becomes the nested statement of the next,
//! either inline or, with a store, by reference.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::error::{FederationError, Result};
use crate::operator::Operator;
use crate::store::{publish, StatementStore};
use crate::types::{NestedStatements, TrustPath, TrustSpec};

/// Builds signed statement chains with a table of operators
#[derive(Debug, Clone, Copy)]
pub struct StatementBuilder<'a> {
    /// issuer -> operator
    operators: &'a BTreeMap<String, Operator>,
}

impl<'a> StatementBuilder<'a> {
    pub fn new(operators: &'a BTreeMap<String, Operator>) -> Self {
        Self { operators }
    }

    fn operator(&self, issuer: &str) -> Result<&'a Operator> {
        self.operators
            .get(issuer)
            .ok_or_else(|| FederationError::UnknownIssuer(issuer.to_string()))
    }

    /// Build every path inline, keyed by outermost signer
    ///
    /// If two targets share an outermost signer, the later target wins.
    pub fn build(&self, spec: &TrustSpec) -> Result<BTreeMap<String, String>> {
        let mut statements = BTreeMap::new();
        for (target, path) in spec {
            let (signer, token) = self.build_path(target, path)?;
            if statements.insert(signer.clone(), token).is_some() {
                warn!(target = %target, signer = %signer, "Replacing statement of an earlier target");
            }
        }
        info!(statements = statements.len(), "Built metadata statements");
        Ok(statements)
    }

    /// Build one path inline; returns the outermost signer and its token
    pub fn build_path(&self, target: &str, path: &TrustPath) -> Result<(String, String)> {
        self.fold(target, path, |_, token| {
            Ok(NestedStatements::Embedded(vec![token]))
        })
    }

    /// Build every path by reference, keyed by outermost signer
    ///
    /// Every signed token, the outermost included, is written to `store`;
    /// the returned values are locator URIs of the outermost tokens.
    pub fn build_with_references(
        &self,
        spec: &TrustSpec,
        store: &dyn StatementStore,
        uri_base: &str,
    ) -> Result<BTreeMap<String, String>> {
        let mut uris = BTreeMap::new();
        for (target, path) in spec {
            let (signer, uri) = self.build_path_with_references(target, path, store, uri_base)?;
            if uris.insert(signer.clone(), uri).is_some() {
                warn!(target = %target, signer = %signer, "Replacing statement of an earlier target");
            }
        }
        info!(statements = uris.len(), uri_base = %uri_base, "Published metadata statements");
        Ok(uris)
    }

    /// Build one path by reference; returns the outermost signer and its URI
    pub fn build_path_with_references(
        &self,
        target: &str,
        path: &TrustPath,
        store: &dyn StatementStore,
        uri_base: &str,
    ) -> Result<(String, String)> {
        let (signer, token) = self.fold(target, path, |inner_signer, token| {
            let uri = publish(store, uri_base, &token)?;
            let mut uris = BTreeMap::new();
            uris.insert(inner_signer.to_string(), uri);
            Ok(NestedStatements::Referenced(uris))
        })?;
        let uri = publish(store, uri_base, &token)?;
        Ok((signer, uri))
    }

    fn fold<F>(&self, target: &str, path: &TrustPath, mut nest: F) -> Result<(String, String)>
    where
        F: FnMut(&str, String) -> Result<NestedStatements>,
    {
        if path.steps.is_empty() {
            return Err(FederationError::InvalidTrustPath {
                target: target.to_string(),
                reason: "no steps".into(),
            });
        }
        // Resolve every signer before anything is signed or published
        let operators = path
            .steps
            .iter()
            .map(|step| self.operator(&step.signer))
            .collect::<Result<Vec<_>>>()?;

        // (signer, token) of the step signed last
        let mut inner: Option<(String, String)> = None;
        for (step, operator) in path.steps.iter().zip(operators).rev() {
            let mut claims = step.claims();
            if let Some((inner_signer, token)) = inner.take() {
                nest(&inner_signer, token)?.insert_into(&mut claims);
            }
            let token = operator.sign(&claims)?;
            debug!(
                target = %target,
                signer = %step.signer,
                requester = %step.requester,
                "Signed trust step"
            );
            inner = Some((step.signer.clone(), token));
        }

        inner.ok_or_else(|| FederationError::InvalidTrustPath {
            target: target.to_string(),
            reason: "no steps".into(),
        })
    }
}
