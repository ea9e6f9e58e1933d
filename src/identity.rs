//! Outbound calls to the OAuth identity provider.
//!
//! Both calls are made once. A failure is returned to the caller as is; there
//! is no retry.

use std::fmt;
use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use serde::Deserialize;

use crate::config::OAuthConfig;
use crate::error::IdentityProviderError;
use crate::session::IdentityToken;

const TOKEN_ENDPOINT: &str = "token endpoint";
const INFO_ENDPOINT: &str = "identity endpoint";

/// Longest slice of a provider response body copied into an error.
const MAX_DETAIL_LEN: usize = 200;

/// Provider access token; only ever sent back to the provider.
pub struct AccessToken(String);

impl AccessToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(..)")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

pub struct IdentityClient {
    http: reqwest::Client,
    token_url: String,
    info_url: String,
    info_auth_scheme: String,
    client_id: String,
    client_secret: String,
}

impl IdentityClient {
    pub fn new(oauth: &OAuthConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(oauth.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            token_url: oauth.token_url.clone(),
            info_url: oauth.info_url.clone(),
            info_auth_scheme: oauth.info_auth_scheme.clone(),
            client_id: oauth.client_id.clone(),
            client_secret: oauth.client_secret.clone(),
        })
    }

    /// Trade an authorization code for an access token.
    ///
    /// Sends `grant_type=authorization_code` with HTTP Basic client
    /// credentials. A non-2xx status or a body without `access_token` is an
    /// error.
    pub async fn exchange_code_for_access_token(
        &self,
        code: &str,
    ) -> Result<AccessToken, IdentityProviderError> {
        tracing::debug!("requesting access token");

        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "authorization_code"), ("code", code)])
            .send()
            .await
            .map_err(|source| IdentityProviderError::Transport {
                endpoint: TOKEN_ENDPOINT,
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| IdentityProviderError::Body {
                endpoint: TOKEN_ENDPOINT,
                source,
            })?;
        let parsed: Option<TokenResponse> = serde_json::from_str(&body).ok();

        if !status.is_success() {
            let detail = parsed
                .and_then(|p| match (p.error, p.error_description) {
                    (Some(error), Some(description)) => Some(format!("{error}: {description}")),
                    (error, description) => error.or(description),
                })
                .unwrap_or_else(|| truncate(&body));
            return Err(IdentityProviderError::Status {
                endpoint: TOKEN_ENDPOINT,
                status: status.as_u16(),
                detail,
            });
        }

        let token = parsed
            .and_then(|p| p.access_token)
            .filter(|t| !t.is_empty())
            .ok_or(IdentityProviderError::MissingAccessToken {
                status: status.as_u16(),
            })?;

        tracing::debug!("access token received");
        Ok(AccessToken(token))
    }

    /// Fetch the visitor's identity as a signed JWT.
    pub async fn exchange_access_token_for_identity(
        &self,
        access_token: &AccessToken,
    ) -> Result<IdentityToken, IdentityProviderError> {
        tracing::debug!("requesting identity token");

        let response = self
            .http
            .get(&self.info_url)
            .query(&[("format", "jwt")])
            .header(
                AUTHORIZATION,
                format!("{} {}", self.info_auth_scheme, access_token.as_str()),
            )
            .send()
            .await
            .map_err(|source| IdentityProviderError::Transport {
                endpoint: INFO_ENDPOINT,
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| IdentityProviderError::Body {
                endpoint: INFO_ENDPOINT,
                source,
            })?;

        if !status.is_success() {
            return Err(IdentityProviderError::Status {
                endpoint: INFO_ENDPOINT,
                status: status.as_u16(),
                detail: truncate(&body),
            });
        }

        let token = body.trim();
        if token.is_empty() {
            return Err(IdentityProviderError::EmptyIdentity);
        }

        tracing::debug!("identity token received");
        Ok(IdentityToken::new(token))
    }
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_DETAIL_LEN) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
