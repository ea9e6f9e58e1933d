//! Failure kinds surfaced by the gateway.
//!
//! Each outbound or cryptographic step returns its own error type so the
//! router can decide which page a failure leads to.

use jsonwebtoken::errors::ErrorKind;
use thiserror::Error;

/// The identity provider refused or garbled one of the two exchange calls.
#[derive(Debug, Error)]
pub enum IdentityProviderError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned HTTP {status}: {detail}")]
    Status {
        endpoint: &'static str,
        status: u16,
        detail: String,
    },

    #[error("token endpoint response has no access_token (HTTP {status})")]
    MissingAccessToken { status: u16 },

    #[error("identity endpoint returned an empty body")]
    EmptyIdentity,

    #[error("{endpoint} returned an unreadable body: {source}")]
    Body {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl IdentityProviderError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "identity_provider.transport",
            Self::Status { .. } => "identity_provider.status",
            Self::MissingAccessToken { .. } => "identity_provider.missing_access_token",
            Self::EmptyIdentity => "identity_provider.empty_identity",
            Self::Body { .. } => "identity_provider.body",
        }
    }
}

/// The session cookie could not be trusted.
#[derive(Debug, Error)]
pub enum TokenVerificationError {
    #[error("identity token has expired")]
    Expired,

    #[error("identity token signature does not match")]
    InvalidSignature,

    #[error("identity token is malformed: {0}")]
    Malformed(#[source] jsonwebtoken::errors::Error),
}

impl TokenVerificationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Expired => "token_verification.expired",
            Self::InvalidSignature => "token_verification.invalid_signature",
            Self::Malformed(_) => "token_verification.malformed",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for TokenVerificationError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            _ => Self::Malformed(err),
        }
    }
}

/// Building or signing the dashboard embed token failed.
#[derive(Debug, Error)]
pub enum EmbedTokenError {
    #[error("embed signing key is not a valid RSA PEM key: {0}")]
    InvalidKey(#[source] jsonwebtoken::errors::Error),

    #[error("failed to sign embed token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

impl EmbedTokenError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidKey(_) => "embed_token.invalid_key",
            Self::Signing(_) => "embed_token.signing",
        }
    }
}

/// Any failure of the OAuth callback: either exchange, or verifying the
/// identity token it produced.
#[derive(Debug, Error)]
pub enum SignInError {
    #[error(transparent)]
    Provider(#[from] IdentityProviderError),

    #[error(transparent)]
    Verification(#[from] TokenVerificationError),
}

impl SignInError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider(e) => e.kind(),
            Self::Verification(e) => e.kind(),
        }
    }
}

/// Startup configuration is absent or unusable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
