//! DataLens embed tokens.
//!
//! Every page render signs a fresh PS256 token that lets the dashboard iframe
//! load for one visitor. The token lives for [`EMBED_TOKEN_TTL_SECS`] seconds
//! and is never stored.

use std::fmt;

use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::error::EmbedTokenError;
use crate::session::VisitorId;

/// Marker DataLens expects in the `dlEmbedService` claim.
pub const EMBED_SERVICE_MARK: &str = "YC_DATALENS_EMBEDDING_SERVICE_MARK";

pub const EMBED_TOKEN_TTL_SECS: i64 = 60;

/// RSA private key registered with the embed.
pub struct EmbedSigningKey(EncodingKey);

impl EmbedSigningKey {
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self, EmbedTokenError> {
        EncodingKey::from_rsa_pem(pem)
            .map(Self)
            .map_err(EmbedTokenError::InvalidKey)
    }
}

impl fmt::Debug for EmbedSigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EmbedSigningKey(..)")
    }
}

/// Signed embed token, ready to be placed in the dashboard URL fragment.
#[derive(Clone, PartialEq, Eq)]
pub struct EmbedToken(String);

impl EmbedToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EmbedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EmbedToken({} bytes)", self.0.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedClaims {
    pub embed_id: String,
    pub dl_embed_service: String,
    pub iat: i64,
    pub exp: i64,
    pub params: EmbedParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedParams {
    pub uid: VisitorId,
}

#[derive(Debug)]
pub struct EmbedTokenIssuer {
    embed_id: String,
    key: EmbedSigningKey,
    dashboard_url: String,
}

impl EmbedTokenIssuer {
    pub fn new(embed_id: String, key: EmbedSigningKey, dashboard_url: String) -> Self {
        Self {
            embed_id,
            key,
            dashboard_url,
        }
    }

    pub fn claims_at(&self, visitor: &VisitorId, now: i64) -> EmbedClaims {
        EmbedClaims {
            embed_id: self.embed_id.clone(),
            dl_embed_service: EMBED_SERVICE_MARK.to_string(),
            iat: now,
            exp: now + EMBED_TOKEN_TTL_SECS,
            params: EmbedParams {
                uid: visitor.clone(),
            },
        }
    }

    /// Sign an embed token for `visitor`, valid from now.
    pub fn issue(&self, visitor: &VisitorId) -> Result<EmbedToken, EmbedTokenError> {
        self.issue_at(visitor, Utc::now().timestamp())
    }

    pub fn issue_at(&self, visitor: &VisitorId, now: i64) -> Result<EmbedToken, EmbedTokenError> {
        let claims = self.claims_at(visitor, now);
        let token = encode(&Header::new(Algorithm::PS256), &claims, &self.key.0)
            .map_err(EmbedTokenError::Signing)?;

        tracing::debug!(
            embed_id = %claims.embed_id,
            uid = %claims.params.uid,
            iat = %rfc3339(claims.iat),
            exp = %rfc3339(claims.exp),
            "issued embed token"
        );
        Ok(EmbedToken(token))
    }

    /// Dashboard URL carrying `token` in its fragment.
    pub fn embed_url(&self, token: &EmbedToken) -> String {
        format!("{}#dl_embed_token={}", self.dashboard_url, token.as_str())
    }
}

fn rfc3339(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}
