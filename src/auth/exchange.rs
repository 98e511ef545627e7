//! Partial refreshes: minting a system token from an id token, and trading a
//! refresh token for a new id token.

use super::{body_text, http_client, response_cookie, AuthError, BrowserProfile};
use crate::config::{FlowVariant, HttpConfig, Platform};
use crate::credentials::RefreshedTokens;
use serde::Deserialize;
use tracing::{debug, warn};

/// JSON body of the implicit-variant token endpoint.
#[derive(Deserialize, Debug)]
struct SystemTokenResponse {
    #[serde(default)]
    token: Option<String>,
}

/// Token exchanges that do not need the user's password.
pub struct TokenExchange {
    platform: Platform,
    profile: BrowserProfile,
    http_client: reqwest::Client,
}

impl TokenExchange {
    pub fn new(platform: Platform, http: &HttpConfig) -> Result<Self, AuthError> {
        let profile = BrowserProfile::new(&platform)?;
        let http_client = http_client(http, &profile, false)?;
        Ok(Self {
            platform,
            profile,
            http_client,
        })
    }

    pub fn supports_refresh(&self) -> bool {
        self.platform.supports_refresh()
    }

    /// Trades an id token for a fresh system token.
    pub async fn system_token(&self, id_token: &str, account_id: &str) -> Result<String, AuthError> {
        mint_system_token(&self.http_client, &self.platform, &self.profile, id_token, account_id).await
    }

    /// Trades a refresh token for a new id token, then mints a system token with it.
    ///
    /// The current id token is sent along when it is still valid.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        current_id_token: Option<&str>,
        account_id: &str,
    ) -> Result<RefreshedTokens, AuthError> {
        if !self.supports_refresh() {
            return Err(AuthError::TokenExchange(
                "platform does not issue refresh tokens".to_string(),
            ));
        }

        let url = format!("{}/auth/refresh", self.platform.api_url);
        debug!(account_id = %account_id, "Exchanging refresh token at {}", url);

        let response = self
            .http_client
            .get(&url)
            .headers(self.profile.refresh(current_id_token, refresh_token)?)
            .send()
            .await
            .map_err(|e| AuthError::TokenExchange(format!("refresh request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = body_text(response).await;
            return Err(AuthError::TokenExchange(format!(
                "refresh returned status {}: {}",
                status, body
            )));
        }

        let id_token = response_cookie(&response, "idToken")
            .ok_or_else(|| AuthError::TokenExchange("refresh response set no idToken cookie".to_string()))?;
        let rotated_refresh_token = response_cookie(&response, "refreshToken");

        debug!(
            account_id = %account_id,
            rotated = rotated_refresh_token.is_some(),
            "Refresh exchange returned a new id token"
        );

        let system_token = self.system_token(&id_token, account_id).await?;

        Ok(RefreshedTokens {
            id_token,
            system_token,
            rotated_refresh_token,
            presented_refresh_token: refresh_token.to_string(),
        })
    }
}

/// Mints a system token for `account_id` using `id_token` as bearer.
///
/// The implicit platform answers `POST {accounts}/api/systems/{id}/token` with
/// `{"token": ...}`; the cookie platform answers `GET {api}/auth/refresh/system/{id}`
/// with a `systemToken` cookie. Either carrier is accepted from either endpoint.
pub(super) async fn mint_system_token(
    client: &reqwest::Client,
    platform: &Platform,
    profile: &BrowserProfile,
    id_token: &str,
    account_id: &str,
) -> Result<String, AuthError> {
    let account = urlencoding::encode(account_id);
    let request = match platform.variant {
        FlowVariant::Implicit => client.post(format!("{}/api/systems/{}/token", platform.accounts_url, account)),
        FlowVariant::Code => client.get(format!("{}/auth/refresh/system/{}", platform.api_url, account)),
    };

    let response = request
        .headers(profile.api(id_token)?)
        .send()
        .await
        .map_err(|e| AuthError::TokenExchange(format!("system token request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = body_text(response).await;
        warn!(account_id = %account_id, status = %status, "System token mint rejected");
        return Err(AuthError::TokenExchange(format!(
            "system token endpoint returned status {}: {}",
            status, body
        )));
    }

    if let Some(token) = response_cookie(&response, "systemToken") {
        return Ok(token);
    }

    let body = body_text(response).await;
    serde_json::from_str::<SystemTokenResponse>(&body)
        .ok()
        .and_then(|r| r.token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::TokenExchange("system token missing from response".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn exchange(server: &Server, variant: FlowVariant) -> TokenExchange {
        TokenExchange::new(Platform::single_host(&server.url(), variant), &HttpConfig::default()).unwrap()
    }

    #[test]
    fn test_system_token_response_deserialization() {
        let response: SystemTokenResponse = serde_json::from_str(r#"{"token": "SYS1", "expiresIn": 300}"#).unwrap();
        assert_eq!(response.token.as_deref(), Some("SYS1"));

        let response: SystemTokenResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(response.token, None);
    }

    #[tokio::test]
    async fn test_implicit_mint_reads_json_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/systems/SYS/token")
            .match_header("authorization", "Bearer ID1")
            .match_header("accept", "application/vnd.pdk.v2+json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token": "SYS1"}"#)
            .create_async()
            .await;

        let token = exchange(&server, FlowVariant::Implicit).system_token("ID1", "SYS").await.unwrap();

        assert_eq!(token, "SYS1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_code_mint_reads_cookie() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/auth/refresh/system/SYS")
            .match_header("authorization", "Bearer ID1")
            .with_status(200)
            .with_header("set-cookie", "systemToken=SYS2; Path=/; HttpOnly")
            .create_async()
            .await;

        let token = exchange(&server, FlowVariant::Code).system_token("ID1", "SYS").await.unwrap();

        assert_eq!(token, "SYS2");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_mint_rejected() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/systems/SYS/token")
            .with_status(401)
            .with_body("jwt expired")
            .create_async()
            .await;

        let err = exchange(&server, FlowVariant::Implicit)
            .system_token("stale", "SYS")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::TokenExchange(ref reason) if reason.contains("401")));
    }

    #[tokio::test]
    async fn test_mint_without_token_in_response() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/systems/SYS/token")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let err = exchange(&server, FlowVariant::Implicit)
            .system_token("ID1", "SYS")
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::TokenExchange(_)));
    }

    #[tokio::test]
    async fn test_refresh_rotates_tokens() {
        let mut server = Server::new_async().await;
        let refresh = server
            .mock("GET", "/api/auth/refresh")
            .match_header("cookie", Matcher::Regex("refreshToken=R1".to_string()))
            .with_status(200)
            .with_header("set-cookie", "idToken=ID2; Path=/")
            .with_header("set-cookie", "refreshToken=R2; Path=/")
            .create_async()
            .await;
        let mint = server
            .mock("GET", "/api/auth/refresh/system/SYS")
            .match_header("authorization", "Bearer ID2")
            .with_status(200)
            .with_header("set-cookie", "systemToken=SYS2; Path=/")
            .create_async()
            .await;

        let refreshed = exchange(&server, FlowVariant::Code).refresh("R1", None, "SYS").await.unwrap();

        assert_eq!(refreshed.id_token, "ID2");
        assert_eq!(refreshed.system_token, "SYS2");
        assert_eq!(refreshed.rotated_refresh_token.as_deref(), Some("R2"));
        assert_eq!(refreshed.presented_refresh_token, "R1");
        refresh.assert_async().await;
        mint.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_without_id_token_cookie_fails() {
        let mut server = Server::new_async().await;
        let _refresh = server
            .mock("GET", "/api/auth/refresh")
            .with_status(200)
            .create_async()
            .await;

        let err = exchange(&server, FlowVariant::Code).refresh("R1", None, "SYS").await.unwrap_err();
        assert!(matches!(err, AuthError::TokenExchange(_)));
    }

    #[tokio::test]
    async fn test_refresh_unsupported_on_implicit_platform() {
        let server = Server::new_async().await;
        let err = exchange(&server, FlowVariant::Implicit)
            .refresh("R1", None, "SYS")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenExchange(_)));
    }
}
