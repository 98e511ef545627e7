pub mod account;
pub use account::AccountCredentials;

use crate::credentials::TokenTtls;
use chrono::TimeDelta;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Complete configuration, loaded from TOML.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PdkConfig {
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Which PDK deployment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Prod,
    Beta,
}

/// How the login redirect chain hands back tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowVariant {
    /// `id_token`/`access_token` in the final redirect's URL fragment, no refresh token
    Implicit,
    /// Authorization code redeemed by a callback that sets `idToken`/`refreshToken` cookies
    Code,
}

/// Platform endpoints. Unset fields fall back to the environment preset.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlatformConfig {
    #[serde(default)]
    pub environment: Environment,
    pub accounts_url: Option<String>,
    pub api_url: Option<String>,
    pub systems_url: Option<String>,
    pub callback_url: Option<String>,
    pub client_id: Option<String>,
    pub variant: Option<FlowVariant>,
}

/// Resolved, immutable platform endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    /// Identity host (`/auth/local`, `/oauth2/auth`, `/interaction/...`)
    pub accounts_url: String,
    /// API host for refresh exchanges
    pub api_url: String,
    /// Base URL for account-scoped resource calls
    pub systems_url: String,
    /// `redirect_uri` registered for the client
    pub callback_url: String,
    pub client_id: String,
    pub variant: FlowVariant,
}

impl Platform {
    pub fn preset(environment: Environment) -> Self {
        match environment {
            Environment::Prod => Self {
                accounts_url: "https://accounts.pdk.io".to_string(),
                api_url: "https://pdk.io/api".to_string(),
                systems_url: "https://systems.pdk.io".to_string(),
                callback_url: "https://pdk.io/authCallback".to_string(),
                client_id: "544557759a01deb9874c02ee".to_string(),
                variant: FlowVariant::Implicit,
            },
            Environment::Beta => Self {
                accounts_url: "https://betaaccounts.pdk.io".to_string(),
                api_url: "https://beta.pdk.io/api".to_string(),
                systems_url: "https://beta.pdk.io/systems".to_string(),
                callback_url: "https://beta.pdk.io/api/auth/callback".to_string(),
                client_id: "66df80e41f3e3361083b2941".to_string(),
                variant: FlowVariant::Code,
            },
        }
    }

    /// Points every host at one base URL (mock servers, local proxies).
    pub fn single_host(base_url: &str, variant: FlowVariant) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            accounts_url: base.to_string(),
            api_url: format!("{}/api", base),
            systems_url: format!("{}/systems", base),
            callback_url: format!("{}/api/auth/callback", base),
            client_id: "test-client".to_string(),
            variant,
        }
    }

    /// Whether this platform issues refresh tokens at all.
    pub fn supports_refresh(&self) -> bool {
        self.variant == FlowVariant::Code
    }
}

impl PlatformConfig {
    pub fn resolve(&self) -> Platform {
        let preset = Platform::preset(self.environment);
        let trimmed = |url: &Option<String>, fallback: String| {
            url.as_deref()
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(fallback)
        };

        Platform {
            accounts_url: trimmed(&self.accounts_url, preset.accounts_url),
            api_url: trimmed(&self.api_url, preset.api_url),
            systems_url: trimmed(&self.systems_url, preset.systems_url),
            callback_url: self.callback_url.clone().unwrap_or(preset.callback_url),
            client_id: self.client_id.clone().unwrap_or(preset.client_id),
            variant: self.variant.unwrap_or(preset.variant),
        }
    }
}

/// Token lifetimes (seconds)
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_short_ttl")]
    pub id_token_ttl_seconds: i64,
    #[serde(default = "default_short_ttl")]
    pub system_token_ttl_seconds: i64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_seconds: i64,
}

fn default_short_ttl() -> i64 {
    300
}

fn default_refresh_ttl() -> i64 {
    30 * 24 * 60 * 60
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            id_token_ttl_seconds: default_short_ttl(),
            system_token_ttl_seconds: default_short_ttl(),
            refresh_token_ttl_seconds: default_refresh_ttl(),
        }
    }
}

/// Upper bound for any token lifetime (ten years)
pub const MAX_TTL_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

/// A `[tokens]` lifetime outside `1..=MAX_TTL_SECONDS`.
#[derive(Debug, Error)]
#[error("tokens.{field} must be between 1 and {max} seconds, got {value}", max = MAX_TTL_SECONDS)]
pub struct InvalidTtl {
    pub field: &'static str,
    pub value: i64,
}

impl TokenConfig {
    pub fn ttls(&self) -> Result<TokenTtls, InvalidTtl> {
        Ok(TokenTtls {
            id_token: ttl("id_token_ttl_seconds", self.id_token_ttl_seconds)?,
            system_token: ttl("system_token_ttl_seconds", self.system_token_ttl_seconds)?,
            refresh_token: ttl("refresh_token_ttl_seconds", self.refresh_token_ttl_seconds)?,
        })
    }
}

fn ttl(field: &'static str, value: i64) -> Result<TimeDelta, InvalidTtl> {
    if !(1..=MAX_TTL_SECONDS).contains(&value) {
        return Err(InvalidTtl { field, value });
    }
    TimeDelta::try_seconds(value).ok_or(InvalidTtl { field, value })
}

/// Outbound HTTP settings
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Whole-request timeout
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

/// Token database settings
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Env var holding the base64 AES-256 key; tokens are stored in plaintext when unset
    #[serde(default = "default_encryption_key_env")]
    pub encryption_key_env: String,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("token.db")
}

fn default_encryption_key_env() -> String {
    "PDK_ENCRYPTION_KEY".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            encryption_key_env: default_encryption_key_env(),
        }
    }
}

impl StorageConfig {
    pub fn encryption_key(&self) -> Option<String> {
        std::env::var(&self.encryption_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<PdkConfig> {
    use anyhow::Context;

    let contents = std::fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path))?;
    let config: PdkConfig = toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))?;
    config.tokens.ttls().with_context(|| format!("Invalid token lifetimes in {}", path))?;
    Ok(config)
}
