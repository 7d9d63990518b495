//! Recovers a caller's sticky routing key from a bearer token without
//! verifying it: the token's payload segment is base64url-decoded and
//! parsed as JSON, per the Non-goal that identity tokens are parsed but
//! never cryptographically verified (verification is an upstream concern).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("bearer token is not in a three-segment JWT-like shape")]
    MalformedToken,
    #[error("token payload is not valid base64url")]
    InvalidEncoding,
    #[error("token payload is not a JSON object")]
    InvalidPayload,
    #[error("token payload has neither an 'iss' nor a 'sub' claim")]
    MissingIssuer,
}

#[derive(Debug, Deserialize)]
struct Claims {
    iss: Option<String>,
    sub: Option<String>,
}

/// Decodes the payload segment of `token` (a `header.payload.signature`
/// bearer token) and returns its issuer identifier — the `iss` claim, or
/// `sub` if `iss` is absent. No signature check is performed.
pub fn sticky_key(token: &str) -> Result<String, IdentityError> {
    let mut segments = token.split('.');
    let _header = segments.next().ok_or(IdentityError::MalformedToken)?;
    let payload = segments.next().ok_or(IdentityError::MalformedToken)?;
    if segments.next().is_none() {
        return Err(IdentityError::MalformedToken);
    }

    let decoded = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| IdentityError::InvalidEncoding)?;
    let claims: Claims =
        serde_json::from_slice(&decoded).map_err(|_| IdentityError::InvalidPayload)?;

    claims.iss.or(claims.sub).ok_or(IdentityError::MissingIssuer)
}
