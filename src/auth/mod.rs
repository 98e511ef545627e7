//! Login against the PDK identity host.
//!
//! [`AuthFlow`] replays the browser redirect chain (credential submission,
//! authorization redirect, two interaction hops, token extraction) and mints a
//! system token. [`TokenExchange`] covers the cheaper partial refreshes used
//! before falling back to a full login.

use crate::config::HttpConfig;
use crate::credentials::{CredentialSet, StoreError};
use reqwest::StatusCode;
use std::fmt;
use thiserror::Error;

mod browser;
mod exchange;
mod flow;
mod redirect;

pub use browser::BrowserProfile;
pub use exchange::TokenExchange;
pub use flow::AuthFlow;

/// Steps of a full login, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Init,
    ProfileFetch,
    AuthorizeRedirect,
    InteractionStep1,
    InteractionStep2,
    /// Cookie variant only: the redirect target that sets `idToken`/`refreshToken`
    CallbackExchange,
    SystemTokenMint,
    Complete,
    Failed,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowState::Init => "init",
            FlowState::ProfileFetch => "profile_fetch",
            FlowState::AuthorizeRedirect => "authorize_redirect",
            FlowState::InteractionStep1 => "interaction_step1",
            FlowState::InteractionStep2 => "interaction_step2",
            FlowState::CallbackExchange => "callback_exchange",
            FlowState::SystemTokenMint => "system_token_mint",
            FlowState::Complete => "complete",
            FlowState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Authentication failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Login rejected by the identity host
    #[error("login rejected with status {status}: {body}")]
    Credential { status: StatusCode, body: String },

    /// Login throttled. Never retried.
    #[error("login rate limited: {body}")]
    RateLimited { body: String },

    #[error("login flow failed at {state}: {reason}")]
    FlowStep { state: FlowState, reason: String },

    /// Partial refresh failed; callers fall through to the next tier
    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("token store error: {0}")]
    Persistence(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::InvalidTtl),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

impl AuthError {
    pub(crate) fn step(state: FlowState, reason: impl Into<String>) -> Self {
        AuthError::FlowStep {
            state,
            reason: reason.into(),
        }
    }
}

/// Result of a single credential tier.
#[derive(Debug)]
pub enum Outcome {
    Success(CredentialSet),
    /// Tier could not produce credentials; try the next one
    Retryable(String),
    /// Stop immediately
    Fatal(AuthError),
}

/// Builds an HTTP client that never follows redirects.
///
/// Each login gets its own client with a cookie jar so session cookies from
/// one attempt never leak into the next.
pub(crate) fn http_client(
    http: &HttpConfig,
    profile: &BrowserProfile,
    cookie_store: bool,
) -> Result<reqwest::Client, AuthError> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .cookie_store(cookie_store)
        .user_agent(http.user_agent.clone())
        .default_headers(profile.base())
        .timeout(http.timeout())
        .connect_timeout(http.connect_timeout())
        .build()?;
    Ok(client)
}

/// Reads a response body for error reporting.
pub(crate) async fn body_text(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|e| format!("<unreadable body: {}>", e))
}

/// Value of a `Set-Cookie` cookie on a single response.
pub(crate) fn response_cookie(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .cookies()
        .find(|c| c.name() == name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}
