//! Decides, per call, how to obtain usable credentials.
//!
//! Tiers are tried cheapest first and each returns an [`Outcome`]:
//!
//! | Tier | Needs                 | Action                                 |
//! |------|-----------------------|----------------------------------------|
//! | 1    | valid system token    | reuse the stored set                   |
//! | 2    | valid id token        | mint a new system token                |
//! | 3    | valid refresh token   | refresh id token, then mint            |
//! | 4    | nothing               | full login with the account password   |
//!
//! A retryable failure falls through to the next tier. Store failures and
//! tier 4 failures end the call.

use crate::auth::{AuthError, AuthFlow, Outcome, TokenExchange};
use crate::config::{AccountCredentials, PdkConfig};
use crate::credentials::{CredentialSet, TokenStore, TokenTtls};
use chrono::Utc;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Cached,
    SystemTokenExchange,
    RefreshExchange,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Cached => "cached",
            Tier::SystemTokenExchange => "system_token_exchange",
            Tier::RefreshExchange => "refresh_exchange",
        };
        f.write_str(name)
    }
}

/// Owns the token store and every way of refilling it.
pub struct TokenLifecycleManager {
    store: Arc<TokenStore>,
    flow: AuthFlow,
    exchange: TokenExchange,
    login: AccountCredentials,
    ttls: TokenTtls,
    /// One lock per account with a call in flight; serializes read-decide-write
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TokenLifecycleManager {
    pub fn new(
        store: Arc<TokenStore>,
        flow: AuthFlow,
        exchange: TokenExchange,
        login: AccountCredentials,
        ttls: TokenTtls,
    ) -> Self {
        Self {
            store,
            flow,
            exchange,
            login,
            ttls,
            locks: DashMap::new(),
        }
    }

    /// Wires a manager from configuration.
    pub fn from_config(
        config: &PdkConfig,
        store: Arc<TokenStore>,
        login: AccountCredentials,
    ) -> Result<Self, AuthError> {
        let platform = config.platform.resolve();
        let ttls = config.tokens.ttls()?;
        let flow = AuthFlow::new(platform.clone(), config.http.clone(), ttls)?;
        let exchange = TokenExchange::new(platform, &config.http)?;
        Ok(Self::new(store, flow, exchange, login, ttls))
    }

    /// Account the configured login belongs to.
    pub fn account_id(&self) -> &str {
        &self.login.system_id
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// Returns a credential set with a valid system token, refreshing or
    /// logging in as needed. Anything newly obtained is persisted first.
    pub async fn ensure_credentials(&self, account_id: &str) -> Result<CredentialSet, AuthError> {
        let lock = self.lock_for(account_id);
        let result = {
            let _guard = lock.lock().await;
            self.walk_tiers(account_id).await
        };
        self.release(account_id, lock);
        result
    }

    async fn walk_tiers(&self, account_id: &str) -> Result<CredentialSet, AuthError> {
        for tier in [Tier::Cached, Tier::SystemTokenExchange, Tier::RefreshExchange] {
            let outcome = match tier {
                Tier::Cached => self.cached(account_id),
                Tier::SystemTokenExchange => self.system_token_exchange(account_id).await,
                Tier::RefreshExchange => self.refresh_exchange(account_id).await,
            };

            match outcome {
                Outcome::Success(set) => {
                    info!(account_id = %account_id, tier = %tier, "Credentials ready");
                    return Ok(set);
                }
                Outcome::Retryable(reason) => {
                    debug!(account_id = %account_id, tier = %tier, reason = %reason, "Tier unavailable, falling through");
                }
                Outcome::Fatal(e) => return Err(e),
            }
        }

        self.full_login(account_id).await
    }

    /// Skips every cache and runs the full login.
    pub async fn force_login(&self, account_id: &str) -> Result<CredentialSet, AuthError> {
        let lock = self.lock_for(account_id);
        let result = {
            let _guard = lock.lock().await;
            self.full_login(account_id).await
        };
        self.release(account_id, lock);
        result
    }

    /// Runs only the refresh-token exchange.
    pub async fn refresh_with_refresh_token(&self, account_id: &str) -> Result<CredentialSet, AuthError> {
        let lock = self.lock_for(account_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.refresh_exchange(account_id).await
        };
        self.release(account_id, lock);

        match outcome {
            Outcome::Success(set) => Ok(set),
            Outcome::Retryable(reason) => Err(AuthError::TokenExchange(reason)),
            Outcome::Fatal(e) => Err(e),
        }
    }

    fn lock_for(&self, account_id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(account_id.to_string()).or_default().clone()
    }

    /// Drops the account's lock entry once no other caller holds or waits on it.
    fn release(&self, account_id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks.remove_if(account_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn cached(&self, account_id: &str) -> Outcome {
        match self.store.get_if_system_token_valid(account_id) {
            Ok(Some(set)) => Outcome::Success(set),
            Ok(None) => Outcome::Retryable("no valid system token".to_string()),
            Err(e) => Outcome::Fatal(e.into()),
        }
    }

    async fn system_token_exchange(&self, account_id: &str) -> Outcome {
        let id_token = match self.store.get_if_id_token_valid(account_id) {
            Ok(Some(token)) => token,
            Ok(None) => return Outcome::Retryable("no valid id token".to_string()),
            Err(e) => return Outcome::Fatal(e.into()),
        };

        let system_token = match self.exchange.system_token(&id_token, account_id).await {
            Ok(token) => token,
            Err(e) => {
                warn!(account_id = %account_id, error = %e, "System token exchange failed");
                return Outcome::Retryable(e.to_string());
            }
        };

        let previous = match self.store.get(account_id) {
            Ok(Some(set)) => set,
            Ok(None) => return Outcome::Retryable("stored credentials disappeared".to_string()),
            Err(e) => return Outcome::Fatal(e.into()),
        };

        self.persist(previous.with_system_token(system_token, &self.ttls, Utc::now()))
    }

    async fn refresh_exchange(&self, account_id: &str) -> Outcome {
        if !self.exchange.supports_refresh() {
            return Outcome::Retryable("platform does not issue refresh tokens".to_string());
        }

        let refresh_token = match self.store.get_if_refresh_token_valid(account_id) {
            Ok(Some(token)) => token,
            Ok(None) => return Outcome::Retryable("no valid refresh token".to_string()),
            Err(e) => return Outcome::Fatal(e.into()),
        };
        let current_id_token = match self.store.get_if_id_token_valid(account_id) {
            Ok(token) => token,
            Err(e) => return Outcome::Fatal(e.into()),
        };

        let tokens = match self
            .exchange
            .refresh(&refresh_token, current_id_token.as_deref(), account_id)
            .await
        {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(account_id = %account_id, error = %e, "Refresh exchange failed");
                return Outcome::Retryable(e.to_string());
            }
        };

        let previous = match self.store.get(account_id) {
            Ok(previous) => previous,
            Err(e) => return Outcome::Fatal(e.into()),
        };

        self.persist(CredentialSet::refreshed(
            previous.as_ref(),
            account_id,
            tokens,
            &self.ttls,
            Utc::now(),
        ))
    }

    async fn full_login(&self, account_id: &str) -> Result<CredentialSet, AuthError> {
        info!(account_id = %account_id, "Performing full login");
        let set = self.flow.run(&self.login, account_id).await?;
        self.store.put(&set)?;
        info!(account_id = %account_id, tier = "full_login", "Credentials ready");
        Ok(set)
    }

    fn persist(&self, set: CredentialSet) -> Outcome {
        match self.store.put(&set) {
            Ok(()) => Outcome::Success(set),
            Err(e) => Outcome::Fatal(e.into()),
        }
    }
}
