//! Durable token storage for PDK accounts.
//!
//! One [`CredentialSet`] row per account (the PDK system id), replaced by key on
//! every write. Expiry is never enforced by deleting rows: readers compare the
//! stored expiry timestamps against the current instant.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenStore                         │
//! │  - upsert by account id                  │
//! │  - expiry-filtered reads                 │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!     (seal, optional)    (open, optional)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Encryption Module                  │
//! │  - AES-256-GCM, unique nonce per value   │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SQLite Database (`tokens` table)   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use pdk::credentials::{CredentialSet, IssuedTokens, TokenStore, TokenTtls};
//! use chrono::Utc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let store = TokenStore::new("token.db", None)?;
//!
//! let set = CredentialSet::issue(
//!     "system-1",
//!     IssuedTokens {
//!         id_token: "id".to_string(),
//!         access_token: None,
//!         system_token: "sys".to_string(),
//!         refresh_token: None,
//!         nonce: None,
//!     },
//!     &TokenTtls::default(),
//!     Utc::now(),
//! );
//! store.put(&set)?;
//!
//! if let Some(cached) = store.get_if_system_token_valid("system-1")? {
//!     println!("system token valid until {}", cached.system_token_expiry);
//! }
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod encryption;
mod storage;

pub use storage::TokenStore;

// Re-export encryption functions for key generation/validation utilities
pub use encryption::{generate_key, validate_key};

/// Credential material for one PDK account.
///
/// The system token authorizes resource calls; the id token mints new system
/// tokens; the refresh token (cookie variant only) mints new id tokens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CredentialSet {
    /// PDK system id the tokens are scoped to (primary key)
    pub account_id: String,

    /// Identity token asserting the authenticated user
    pub id_token: String,

    /// Identity-provider access token (implicit variant only)
    pub access_token: Option<String>,

    /// Bearer token for calls against the account's resources
    pub system_token: String,

    /// Long-lived refresh token (cookie variant only)
    pub refresh_token: Option<String>,

    /// Nonce of the login attempt that produced the id token
    pub nonce: Option<String>,

    pub id_token_expiry: DateTime<Utc>,
    pub system_token_expiry: DateTime<Utc>,
    pub refresh_token_expiry: Option<DateTime<Utc>>,

    /// When this row was last written
    pub last_updated: DateTime<Utc>,
}

/// Raw tokens handed back by a login or exchange, before expiries are attached.
#[derive(Clone, Debug, Default)]
pub struct IssuedTokens {
    pub id_token: String,
    pub access_token: Option<String>,
    pub system_token: String,
    pub refresh_token: Option<String>,
    pub nonce: Option<String>,
}

/// Tokens obtained through a refresh-token exchange.
#[derive(Clone, Debug)]
pub struct RefreshedTokens {
    pub id_token: String,
    pub system_token: String,
    /// Refresh token returned by the server, if it rotated one
    pub rotated_refresh_token: Option<String>,
    /// Refresh token that was presented for the exchange
    pub presented_refresh_token: String,
}

/// Fixed token lifetimes applied at issuance time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenTtls {
    pub id_token: Duration,
    pub system_token: Duration,
    pub refresh_token: Duration,
}

impl Default for TokenTtls {
    fn default() -> Self {
        Self {
            id_token: Duration::minutes(5),
            system_token: Duration::minutes(5),
            refresh_token: Duration::days(30),
        }
    }
}

impl CredentialSet {
    /// Builds a set for freshly issued tokens, stamping every expiry from `now`.
    pub fn issue(
        account_id: impl Into<String>,
        tokens: IssuedTokens,
        ttls: &TokenTtls,
        now: DateTime<Utc>,
    ) -> Self {
        let refresh_token_expiry = tokens.refresh_token.as_ref().map(|_| now + ttls.refresh_token);

        Self {
            account_id: account_id.into(),
            id_token: tokens.id_token,
            access_token: tokens.access_token,
            system_token: tokens.system_token,
            refresh_token: tokens.refresh_token,
            nonce: tokens.nonce,
            id_token_expiry: now + ttls.id_token,
            system_token_expiry: now + ttls.system_token,
            refresh_token_expiry,
            last_updated: now,
        }
    }

    /// Replaces only the system token. Every other token keeps its original expiry.
    pub fn with_system_token(mut self, system_token: String, ttls: &TokenTtls, now: DateTime<Utc>) -> Self {
        self.system_token = system_token;
        self.system_token_expiry = now + ttls.system_token;
        self.last_updated = now;
        self
    }

    /// Builds the set produced by a refresh-token exchange.
    ///
    /// A rotated refresh token gets a fresh lifetime; an unrotated one keeps the
    /// expiry it was originally issued with.
    pub fn refreshed(
        previous: Option<&CredentialSet>,
        account_id: &str,
        tokens: RefreshedTokens,
        ttls: &TokenTtls,
        now: DateTime<Utc>,
    ) -> Self {
        let presented = tokens.presented_refresh_token;
        let (refresh_token, refresh_token_expiry) = match tokens.rotated_refresh_token {
            Some(rotated) if rotated != presented => (rotated, now + ttls.refresh_token),
            _ => {
                let kept_expiry = previous
                    .filter(|p| p.refresh_token.as_deref() == Some(presented.as_str()))
                    .and_then(|p| p.refresh_token_expiry)
                    .unwrap_or(now + ttls.refresh_token);
                (presented, kept_expiry)
            }
        };

        Self {
            account_id: account_id.to_string(),
            id_token: tokens.id_token,
            access_token: None,
            system_token: tokens.system_token,
            refresh_token: Some(refresh_token),
            nonce: None,
            id_token_expiry: now + ttls.id_token,
            system_token_expiry: now + ttls.system_token,
            refresh_token_expiry: Some(refresh_token_expiry),
            last_updated: now,
        }
    }

    pub fn system_token_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.system_token_expiry
    }

    pub fn id_token_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.id_token_expiry
    }

    pub fn refresh_token_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.refresh_token.is_some() && self.refresh_token_expiry.is_some_and(|exp| now < exp)
    }
}

/// Token store failures. Always fatal for the caller.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("token encryption failed: {0}")]
    Crypto(String),

    #[error("stored token is encrypted but no encryption key is configured")]
    MissingKey,

    #[error("invalid timestamp in column {column}: {source}")]
    Timestamp {
        column: &'static str,
        #[source]
        source: chrono::ParseError,
    },

    #[error("token store lock poisoned")]
    LockPoisoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(refresh: Option<&str>) -> IssuedTokens {
        IssuedTokens {
            id_token: "id-1".to_string(),
            access_token: Some("access-1".to_string()),
            system_token: "sys-1".to_string(),
            refresh_token: refresh.map(str::to_string),
            nonce: Some("abc".to_string()),
        }
    }

    #[test]
    fn test_issue_stamps_expiries_from_now() {
        let now = Utc::now();
        let ttls = TokenTtls::default();
        let set = CredentialSet::issue("sys", tokens(Some("r-1")), &ttls, now);

        assert_eq!(set.id_token_expiry, now + Duration::minutes(5));
        assert_eq!(set.system_token_expiry, now + Duration::minutes(5));
        assert_eq!(set.refresh_token_expiry, Some(now + Duration::days(30)));
        assert_eq!(set.last_updated, now);
    }

    #[test]
    fn test_issue_without_refresh_token_has_no_refresh_expiry() {
        let now = Utc::now();
        let set = CredentialSet::issue("sys", tokens(None), &TokenTtls::default(), now);

        assert!(set.refresh_token_expiry.is_none());
        assert!(!set.refresh_token_valid_at(now));
    }

    #[test]
    fn test_validity_boundaries() {
        let issued = Utc::now();
        let set = CredentialSet::issue("sys", tokens(None), &TokenTtls::default(), issued);

        assert!(set.system_token_valid_at(issued + Duration::seconds(299)));
        assert!(!set.system_token_valid_at(issued + Duration::seconds(300)));
        assert!(!set.id_token_valid_at(issued + Duration::seconds(301)));
    }

    #[test]
    fn test_with_system_token_does_not_slide_other_expiries() {
        let issued = Utc::now();
        let ttls = TokenTtls::default();
        let set = CredentialSet::issue("sys", tokens(Some("r-1")), &ttls, issued);

        let later = issued + Duration::minutes(3);
        let merged = set.clone().with_system_token("sys-2".to_string(), &ttls, later);

        assert_eq!(merged.system_token, "sys-2");
        assert_eq!(merged.system_token_expiry, later + Duration::minutes(5));
        assert_eq!(merged.id_token_expiry, set.id_token_expiry);
        assert_eq!(merged.refresh_token_expiry, set.refresh_token_expiry);
        assert_eq!(merged.access_token, set.access_token);
        assert_eq!(merged.nonce, set.nonce);
    }

    #[test]
    fn test_refreshed_keeps_unrotated_refresh_expiry() {
        let issued = Utc::now();
        let ttls = TokenTtls::default();
        let previous = CredentialSet::issue("sys", tokens(Some("r-1")), &ttls, issued);

        let later = issued + Duration::days(2);
        let set = CredentialSet::refreshed(
            Some(&previous),
            "sys",
            RefreshedTokens {
                id_token: "id-2".to_string(),
                system_token: "sys-2".to_string(),
                rotated_refresh_token: None,
                presented_refresh_token: "r-1".to_string(),
            },
            &ttls,
            later,
        );

        assert_eq!(set.refresh_token.as_deref(), Some("r-1"));
        assert_eq!(set.refresh_token_expiry, previous.refresh_token_expiry);
        assert_eq!(set.id_token_expiry, later + Duration::minutes(5));
        assert!(set.access_token.is_none());
        assert!(set.nonce.is_none());
    }

    #[test]
    fn test_refreshed_rotated_token_gets_new_lifetime() {
        let issued = Utc::now();
        let ttls = TokenTtls::default();
        let previous = CredentialSet::issue("sys", tokens(Some("r-1")), &ttls, issued);

        let later = issued + Duration::days(2);
        let set = CredentialSet::refreshed(
            Some(&previous),
            "sys",
            RefreshedTokens {
                id_token: "id-2".to_string(),
                system_token: "sys-2".to_string(),
                rotated_refresh_token: Some("r-2".to_string()),
                presented_refresh_token: "r-1".to_string(),
            },
            &ttls,
            later,
        );

        assert_eq!(set.refresh_token.as_deref(), Some("r-2"));
        assert_eq!(set.refresh_token_expiry, Some(later + Duration::days(30)));
    }
}
