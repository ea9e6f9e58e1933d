use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Top-level configuration parsed from TOML.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub oauth: OAuthConfig,
    pub embed: EmbedConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-level configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally visible base URL. The OAuth callback is `<public_url>/authorise`
    /// and a successful login lands back here.
    #[serde(default)]
    pub public_url: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Identity provider credentials and endpoints.
#[derive(Debug, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub client_id: String,
    /// Also the HS256 secret the provider signs identity tokens with.
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_info_url")]
    pub info_url: String,
    /// Scheme placed before the access token when calling `info_url`.
    #[serde(default = "default_info_auth_scheme")]
    pub info_auth_scheme: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_authorize_url() -> String {
    "https://oauth.yandex.ru/authorize".to_string()
}

fn default_token_url() -> String {
    "https://oauth.yandex.ru/token".to_string()
}

fn default_info_url() -> String {
    "https://login.yandex.ru/info".to_string()
}

fn default_info_auth_scheme() -> String {
    "Bearer".to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

/// The dashboard being embedded.
#[derive(Debug, Deserialize)]
pub struct EmbedConfig {
    #[serde(default)]
    pub embed_id: String,
    /// Inline PEM-encoded RSA private key.
    #[serde(default)]
    pub private_key: Option<String>,
    /// Path to a PEM-encoded RSA private key.
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    #[serde(default = "default_dashboard_url")]
    pub dashboard_url: String,
}

fn default_dashboard_url() -> String {
    "https://datalens.yandex.cloud/embeds/dash".to_string()
}

impl EmbedConfig {
    /// Return the PEM bytes of the embed signing key, reading the key file if needed.
    pub fn private_key_pem(&self) -> Result<Vec<u8>, ConfigError> {
        match (&self.private_key, &self.private_key_path) {
            (Some(pem), None) => Ok(pem.as_bytes().to_vec()),
            (None, Some(path)) => std::fs::read(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            }),
            (Some(_), Some(_)) => Err(ConfigError::Invalid {
                field: "embed.private_key",
                reason: "set either private_key or private_key_path, not both".to_string(),
            }),
            (None, None) => Err(ConfigError::Missing("embed.private_key or embed.private_key_path")),
        }
    }
}

/// Session cookie settings.
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Only disable for plain-http local development.
    #[serde(default = "default_secure")]
    pub secure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            secure: default_secure(),
        }
    }
}

fn default_cookie_name() -> String {
    "datalensEmbedToken".to_string()
}

fn default_secure() -> bool {
    true
}

/// Output format of the process logger.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: default_log_format(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Load config from a TOML file and apply environment variable overrides.
///
/// Validation is a separate step ([`Config::validate`]) so that it can run once
/// the logger, whose settings come from this same file, is installed.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let mut config: Config = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());

    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate(self)
    }
}

/// Apply environment variable overrides.
fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("DATALENS_GATEWAY_PUBLIC_URL") {
        config.server.public_url = val;
    }
    if let Some(val) = lookup("DATALENS_GATEWAY_CLIENT_ID") {
        config.oauth.client_id = val;
    }
    if let Some(val) = lookup("DATALENS_GATEWAY_CLIENT_SECRET") {
        config.oauth.client_secret = val;
    }
    if let Some(val) = lookup("DATALENS_GATEWAY_EMBED_ID") {
        config.embed.embed_id = val;
    }
    // An inline key from the environment replaces whatever the file configured.
    if let Some(val) = lookup("DATALENS_GATEWAY_EMBED_KEY") {
        config.embed.private_key = Some(val);
        config.embed.private_key_path = None;
    }
}

/// Validate the entire configuration.
fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_server(&config.server)?;
    validate_oauth(&config.oauth)?;
    validate_embed(&config.embed)?;

    if config.session.cookie_name.is_empty() {
        return Err(ConfigError::Missing("session.cookie_name"));
    }
    if !config.session.secure {
        tracing::warn!("session.secure is disabled; the session cookie will be sent over plain http");
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.public_url.is_empty() {
        return Err(ConfigError::Missing("server.public_url"));
    }

    if server.public_url.ends_with('/') {
        return Err(ConfigError::Invalid {
            field: "server.public_url",
            reason: "must not have a trailing slash".to_string(),
        });
    }

    // Warn (but allow) http:// for local dev; require https:// otherwise
    if server.public_url.starts_with("http://") {
        tracing::warn!(
            "server.public_url uses http://; HTTPS is required for production deployments"
        );
    } else if !server.public_url.starts_with("https://") {
        return Err(ConfigError::Invalid {
            field: "server.public_url",
            reason: "must start with https:// (or http:// for local dev)".to_string(),
        });
    }

    Ok(())
}

fn validate_oauth(oauth: &OAuthConfig) -> Result<(), ConfigError> {
    if oauth.client_id.is_empty() {
        return Err(ConfigError::Missing("oauth.client_id"));
    }
    if oauth.client_secret.is_empty() {
        return Err(ConfigError::Missing("oauth.client_secret"));
    }

    for (field, url) in [
        ("oauth.authorize_url", &oauth.authorize_url),
        ("oauth.token_url", &oauth.token_url),
        ("oauth.info_url", &oauth.info_url),
    ] {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                field,
                reason: format!("'{url}' is not a valid HTTP(S) URL"),
            });
        }
    }

    if oauth.info_auth_scheme.trim().is_empty() {
        return Err(ConfigError::Missing("oauth.info_auth_scheme"));
    }
    if oauth.timeout_secs == 0 {
        return Err(ConfigError::Invalid {
            field: "oauth.timeout_secs",
            reason: "must be greater than zero".to_string(),
        });
    }

    Ok(())
}

fn validate_embed(embed: &EmbedConfig) -> Result<(), ConfigError> {
    if embed.embed_id.is_empty() {
        return Err(ConfigError::Missing("embed.embed_id"));
    }
    if embed.private_key.is_none() && embed.private_key_path.is_none() {
        return Err(ConfigError::Missing("embed.private_key or embed.private_key_path"));
    }
    if embed.private_key.is_some() && embed.private_key_path.is_some() {
        return Err(ConfigError::Invalid {
            field: "embed.private_key",
            reason: "set either private_key or private_key_path, not both".to_string(),
        });
    }
    if !embed.dashboard_url.starts_with("https://") && !embed.dashboard_url.starts_with("http://")
    {
        return Err(ConfigError::Invalid {
            field: "embed.dashboard_url",
            reason: format!("'{}' is not a valid HTTP(S) URL", embed.dashboard_url),
        });
    }

    Ok(())
}
