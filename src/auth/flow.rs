use super::exchange::mint_system_token;
use super::redirect::{fragment_tokens, interaction_id, location, resolve};
use super::{body_text, http_client, response_cookie, AuthError, BrowserProfile, FlowState};
use crate::config::{AccountCredentials, FlowVariant, HttpConfig, Platform};
use crate::credentials::{CredentialSet, IssuedTokens, TokenTtls};
use chrono::Utc;
use reqwest::{Client, Response, StatusCode, Url};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Token material pulled out of the final redirect.
struct IdentityTokens {
    id_token: String,
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/// Full browser-style login.
///
/// Stateless between runs: every [`AuthFlow::run`] starts a new cookie session
/// and either returns a complete [`CredentialSet`] or an error, never a partial
/// result. Persisting the set is the caller's job.
pub struct AuthFlow {
    platform: Platform,
    profile: BrowserProfile,
    http: HttpConfig,
    ttls: TokenTtls,
}

impl AuthFlow {
    pub fn new(platform: Platform, http: HttpConfig, ttls: TokenTtls) -> Result<Self, AuthError> {
        let profile = BrowserProfile::new(&platform)?;
        Ok(Self {
            platform,
            profile,
            http,
            ttls,
        })
    }

    pub async fn run(&self, login: &AccountCredentials, account_id: &str) -> Result<CredentialSet, AuthError> {
        let result = self.execute(login, account_id).await;
        if let Err(e) = &result {
            warn!(account_id = %account_id, state = %FlowState::Failed, error = %e, "Login flow failed");
        }
        result
    }

    async fn execute(&self, login: &AccountCredentials, account_id: &str) -> Result<CredentialSet, AuthError> {
        let client = http_client(&self.http, &self.profile, true)?;
        let nonce = Uuid::new_v4().simple().to_string();

        info!(account_id = %account_id, variant = ?self.platform.variant, "Starting login flow");

        if self.platform.variant == FlowVariant::Code {
            self.warm_up(&client, "/profile").await;
            self.warm_up(&client, "/auth/local").await;
        }

        self.submit_credentials(&client, login, account_id).await?;
        self.fetch_profile(&client, account_id).await?;
        let interaction = self.authorize(&client, &nonce, account_id).await?;
        self.interaction_step1(&client, &interaction, account_id).await?;
        let tokens = self.interaction_step2(&client, &interaction, account_id).await?;

        trace_state(account_id, FlowState::SystemTokenMint);
        let system_token = mint_system_token(&client, &self.platform, &self.profile, &tokens.id_token, account_id)
            .await
            .map_err(|e| AuthError::step(FlowState::SystemTokenMint, e.to_string()))?;

        let set = CredentialSet::issue(
            account_id,
            IssuedTokens {
                id_token: tokens.id_token,
                access_token: tokens.access_token,
                system_token,
                refresh_token: tokens.refresh_token,
                nonce: Some(nonce),
            },
            &self.ttls,
            Utc::now(),
        );

        info!(
            account_id = %account_id,
            state = %FlowState::Complete,
            has_refresh_token = set.refresh_token.is_some(),
            "Login flow complete"
        );
        Ok(set)
    }

    /// Pre-login page loads. Only the cookies matter, so failures are ignored.
    async fn warm_up(&self, client: &Client, path: &str) {
        let url = format!("{}{}", self.platform.accounts_url, path);
        match client.get(&url).headers(self.profile.login()).send().await {
            Ok(response) => debug!(path = %path, status = %response.status(), "Pre-login request"),
            Err(e) => debug!(path = %path, error = %e, "Pre-login request failed"),
        }
    }

    async fn submit_credentials(
        &self,
        client: &Client,
        login: &AccountCredentials,
        account_id: &str,
    ) -> Result<(), AuthError> {
        trace_state(account_id, FlowState::Init);
        let url = format!("{}/auth/local", self.platform.accounts_url);
        let response = client
            .post(&url)
            .headers(self.profile.login())
            .json(&json!({ "email": login.email, "password": login.password }))
            .send()
            .await
            .map_err(|e| AuthError::step(FlowState::Init, format!("credential submission failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = body_text(response).await;
            return Err(AuthError::RateLimited { body });
        }
        if !status.is_success() {
            let body = body_text(response).await;
            return Err(AuthError::Credential { status, body });
        }
        Ok(())
    }

    async fn fetch_profile(&self, client: &Client, account_id: &str) -> Result<(), AuthError> {
        trace_state(account_id, FlowState::ProfileFetch);
        let url = format!("{}/profile", self.platform.accounts_url);
        let response = client
            .get(&url)
            .headers(self.profile.login())
            .send()
            .await
            .map_err(|e| AuthError::step(FlowState::ProfileFetch, e.to_string()))?;
        debug!(account_id = %account_id, status = %response.status(), "Profile fetched");
        Ok(())
    }

    /// Starts the authorization request; returns the interaction id.
    async fn authorize(&self, client: &Client, nonce: &str, account_id: &str) -> Result<String, AuthError> {
        let state = FlowState::AuthorizeRedirect;
        trace_state(account_id, state);

        let url = format!("{}/oauth2/auth", self.platform.accounts_url);
        let mut params = vec![
            ("client_id", self.platform.client_id.as_str()),
            ("redirect_uri", self.platform.callback_url.as_str()),
            ("nonce", nonce),
        ];
        match self.platform.variant {
            FlowVariant::Implicit => {
                params.push(("response_type", "id_token token"));
                params.push(("scope", "openid"));
            }
            FlowVariant::Code => {
                params.push(("response_type", "code"));
                params.push(("scope", "openid offline_access"));
                params.push(("prompt", "consent"));
            }
        }

        let response = client
            .get(&url)
            .query(&params)
            .headers(self.profile.navigation())
            .send()
            .await
            .map_err(|e| AuthError::step(state, e.to_string()))?;

        let target = expect_redirect(response, state, &[StatusCode::FOUND]).await?;
        let interaction = interaction_id(&target)
            .ok_or_else(|| AuthError::step(state, format!("no interaction id in {:?}", target)))?;

        debug!(account_id = %account_id, interaction_id = %interaction, "Authorization redirected");
        Ok(interaction)
    }

    async fn interaction_step1(&self, client: &Client, interaction: &str, account_id: &str) -> Result<(), AuthError> {
        let state = FlowState::InteractionStep1;
        trace_state(account_id, state);

        let url = format!(
            "{}/interaction/{}",
            self.platform.accounts_url,
            urlencoding::encode(interaction)
        );
        let response = client
            .get(&url)
            .headers(self.profile.navigation())
            .send()
            .await
            .map_err(|e| AuthError::step(state, e.to_string()))?;

        // Only the status matters here; the Location is not followed
        expect_status(response, state, &[StatusCode::FOUND]).await?;
        Ok(())
    }

    async fn interaction_step2(
        &self,
        client: &Client,
        interaction: &str,
        account_id: &str,
    ) -> Result<IdentityTokens, AuthError> {
        let state = FlowState::InteractionStep2;
        trace_state(account_id, state);

        let url = format!(
            "{}/oauth2/auth/{}",
            self.platform.accounts_url,
            urlencoding::encode(interaction)
        );
        let response = client
            .get(&url)
            .headers(self.profile.navigation())
            .send()
            .await
            .map_err(|e| AuthError::step(state, e.to_string()))?;
        let request_url = response.url().clone();
        let target = expect_redirect(response, state, &[StatusCode::FOUND]).await?;

        match self.platform.variant {
            FlowVariant::Implicit => {
                let tokens = fragment_tokens(&target)
                    .ok_or_else(|| AuthError::step(state, "redirect carries no id_token"))?;
                Ok(IdentityTokens {
                    id_token: tokens.id_token,
                    access_token: tokens.access_token,
                    refresh_token: None,
                })
            }
            FlowVariant::Code => {
                let callback = resolve(&request_url, &target).map_err(|reason| AuthError::step(state, reason))?;
                self.callback_exchange(client, callback, account_id).await
            }
        }
    }

    /// Follows the authorization-code redirect to the callback, which answers
    /// with the identity cookies.
    async fn callback_exchange(
        &self,
        client: &Client,
        callback: Url,
        account_id: &str,
    ) -> Result<IdentityTokens, AuthError> {
        let state = FlowState::CallbackExchange;
        trace_state(account_id, state);

        let response = client
            .get(callback)
            .headers(self.profile.callback())
            .send()
            .await
            .map_err(|e| AuthError::step(state, e.to_string()))?;

        let status = response.status();
        if status != StatusCode::FOUND && status != StatusCode::TEMPORARY_REDIRECT {
            return Err(AuthError::step(state, format!("expected redirect, got {}", status)));
        }

        let id_token = response_cookie(&response, "idToken");
        let refresh_token = response_cookie(&response, "refreshToken");
        match (id_token, refresh_token) {
            (Some(id_token), Some(refresh_token)) => Ok(IdentityTokens {
                id_token,
                access_token: None,
                refresh_token: Some(refresh_token),
            }),
            _ => Err(AuthError::step(state, "callback did not set idToken and refreshToken cookies")),
        }
    }
}

fn trace_state(account_id: &str, state: FlowState) {
    info!(account_id = %account_id, state = %state, "Login flow step");
}

/// Requires one of `accepted` redirect statuses.
async fn expect_status(
    response: Response,
    state: FlowState,
    accepted: &[StatusCode],
) -> Result<Response, AuthError> {
    let status = response.status();
    if !accepted.contains(&status) {
        let body = body_text(response).await;
        return Err(AuthError::step(
            state,
            format!("expected redirect, got {}: {}", status, truncate(&body, 200)),
        ));
    }
    Ok(response)
}

/// Like [`expect_status`], also returning the `Location` header.
async fn expect_redirect(
    response: Response,
    state: FlowState,
    accepted: &[StatusCode],
) -> Result<String, AuthError> {
    let response = expect_status(response, state, accepted).await?;
    location(&response).ok_or_else(|| AuthError::step(state, "redirect without Location header"))
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

