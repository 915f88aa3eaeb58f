//! JWS compact serialization helpers
//!
//! A signed statement is `header.payload.signature`, each segment base64url
//! without padding. Nothing here checks signatures; see `Operator::verify`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;

use crate::error::{FederationError, Result};
use crate::types::Claims;

/// Segment delimiter
pub const DELIMITER: char = '.';

/// The parts of a token header we rely on
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    #[serde(default)]
    pub kid: Option<String>,
}

/// Split a token into its three segments
pub fn segments(token: &str) -> Result<[&str; 3]> {
    let mut parts = token.split(DELIMITER);
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None) => Ok([header, payload, signature]),
        _ => Err(FederationError::MalformedToken(
            "expected three '.'-separated segments".into(),
        )),
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str, name: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| FederationError::MalformedToken(format!("{} segment: {}", name, e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| FederationError::MalformedToken(format!("{} segment: {}", name, e)))
}

/// Parse the header segment
pub fn header(token: &str) -> Result<TokenHeader> {
    let [header, _, _] = segments(token)?;
    decode_segment(header, "header")
}

/// Decode the claim payload without checking the signature.
///
/// Only for inspection; never base a trust decision on the result.
pub fn unfurl(token: &str) -> Result<Claims> {
    let [_, payload, _] = segments(token)?;
    decode_segment(payload, "payload")
}
