//! Session cookie codec.
//!
//! The session cookie holds the identity token exactly as the provider issued
//! it: an HS256 JWT signed with the OAuth client secret. This module only
//! verifies and reads it, it never signs one.

use std::fmt;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::TokenVerificationError;

/// Shared HS256 secret used to verify identity tokens.
#[derive(Clone)]
pub struct SessionSecret(DecodingKey);

impl SessionSecret {
    pub fn new(secret: &[u8]) -> Self {
        Self(DecodingKey::from_secret(secret))
    }
}

impl fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionSecret(..)")
    }
}

/// Signed identity assertion returned by the provider's info endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityToken(String);

impl IdentityToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityToken({} bytes)", self.0.len())
    }
}

/// Visitor identifier as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VisitorId {
    Numeric(u64),
    Text(String),
}

impl fmt::Display for VisitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

/// Claims recovered from a verified identity token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Identity {
    pub uid: VisitorId,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
}

/// Verify signature and expiry of `token` and return its identity claims.
pub fn decode(
    token: &IdentityToken,
    secret: &SessionSecret,
) -> Result<Identity, TokenVerificationError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp"]);

    let data = jsonwebtoken::decode::<Identity>(token.as_str(), &secret.0, &validation)?;
    Ok(data.claims)
}

/// Like [`decode`], but a failed verification is logged and reported as `None`.
pub fn verify(token: &IdentityToken, secret: &SessionSecret) -> Option<Identity> {
    match decode(token, secret) {
        Ok(identity) => {
            tracing::debug!(uid = %identity.uid, exp = identity.exp, "identity token verified");
            Some(identity)
        }
        Err(e) => {
            tracing::warn!(
                error.kind = e.kind(),
                error.message = %e,
                "identity token rejected"
            );
            None
        }
    }
}
