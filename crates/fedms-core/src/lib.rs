//! # fedms core
//!
//! Issuing, publishing and verifying nested federation metadata statements.
//!
//! ## Key Concepts
//!
//! - **Operating authority (OA)**: organization whose base claims a statement is about
//! - **Federation operator (FO)**: signs a statement and adds policy on behalf of a federation
//! - **Metadata statement**: signed claim set, possibly nesting further signed statements
//! - **Least entitlement (`le`)**: policy accumulated along a verified trust path
//!
//! ## Flow
//!
//! 1. `KeyBundleFactory` builds attested key bundles per issuer
//! 2. `Operator` binds an issuer to its bundle and signs/verifies tokens
//! 3. `StatementBuilder` folds a `TrustSpec` into nested statements, inline or
//!    published to a `StatementStore` by reference
//! 4. `ChainEvaluator` walks a statement back, verifies every link and merges `le`

pub mod builder;
pub mod chain;
pub mod error;
pub mod keys;
pub mod operator;
pub mod store;
pub mod token;
pub mod types;

pub use builder::StatementBuilder;
pub use chain::{ChainEvaluator, ChainResult, VerifiedStatement};
pub use error::{FederationError, Result};
pub use keys::{
    Jwk, Jwks, KeyAlgorithm, KeyBundle, KeyBundleFactory, KeyDefinition, KeyJar, KeyUse,
    SigningKey,
};
pub use operator::Operator;
pub use store::{FsStatementStore, MemoryStatementStore, StatementStore};
pub use token::unfurl;
pub use types::{
    Claims, NestedStatements, TrustPath, TrustSpec, TrustStep, METADATA_STATEMENTS,
    METADATA_STATEMENT_URIS,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
