//! Bearer-authenticated calls against account-scoped PDK resources.

use crate::auth::AuthError;
use crate::config::{AccountCredentials, HttpConfig, PdkConfig};
use crate::credentials::TokenStore;
use crate::lifecycle::TokenLifecycleManager;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

/// Resource call failures.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{method} {endpoint} returned {status}: {body}")]
    Status {
        method: Method,
        endpoint: String,
        status: StatusCode,
        body: String,
    },

    #[error("{method} {endpoint} failed: {source}")]
    Transport {
        method: Method,
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to decode response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
}

/// HTTP client for `{systems_url}/{account}/...` resources.
///
/// Asks the lifecycle manager for credentials before every call. A failed
/// resource call is reported as-is; it never triggers re-authentication.
pub struct AuthenticatedClient {
    manager: Arc<TokenLifecycleManager>,
    http_client: reqwest::Client,
    systems_url: String,
}

impl AuthenticatedClient {
    pub fn new(
        manager: Arc<TokenLifecycleManager>,
        systems_url: impl Into<String>,
        http: &HttpConfig,
    ) -> Result<Self, RequestError> {
        let http_client = reqwest::Client::builder()
            .user_agent(http.user_agent.clone())
            .timeout(http.timeout())
            .connect_timeout(http.connect_timeout())
            .build()
            .map_err(AuthError::Http)?;

        Ok(Self {
            manager,
            http_client,
            systems_url: systems_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Opens the token store and wires the whole stack from configuration.
    pub fn from_config(config: &PdkConfig, login: AccountCredentials) -> Result<Self, RequestError> {
        let encryption_key = config.storage.encryption_key();
        let store = TokenStore::new(&config.storage.database_path, encryption_key.as_deref())
            .map_err(AuthError::from)?;

        let manager = TokenLifecycleManager::from_config(config, Arc::new(store), login)?;
        Self::new(Arc::new(manager), config.platform.resolve().systems_url, &config.http)
    }

    pub fn account_id(&self) -> &str {
        self.manager.account_id()
    }

    pub fn manager(&self) -> &Arc<TokenLifecycleManager> {
        &self.manager
    }

    pub async fn get(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        headers: Option<HeaderMap>,
    ) -> Result<Value, RequestError> {
        self.request(Method::GET, endpoint, params, None, headers).await
    }

    pub async fn post(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        body: Option<&Value>,
        headers: Option<HeaderMap>,
    ) -> Result<Value, RequestError> {
        self.request(Method::POST, endpoint, params, body, headers).await
    }

    pub async fn put(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        body: Option<&Value>,
        headers: Option<HeaderMap>,
    ) -> Result<Value, RequestError> {
        self.request(Method::PUT, endpoint, params, body, headers).await
    }

    pub async fn delete(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        headers: Option<HeaderMap>,
    ) -> Result<Value, RequestError> {
        self.request(Method::DELETE, endpoint, params, None, headers).await
    }

    /// GET and deserialize into `T`.
    pub async fn get_as<T: DeserializeOwned>(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<T, RequestError> {
        let value = self.get(endpoint, params, None).await?;
        serde_json::from_value(value).map_err(|source| RequestError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    /// Sends one authenticated request.
    ///
    /// `headers` are applied after the defaults and may override them. A 204 or
    /// empty success body yields `Value::Bool(true)`.
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, &str)],
        body: Option<&Value>,
        headers: Option<HeaderMap>,
    ) -> Result<Value, RequestError> {
        let account_id = self.manager.account_id();
        let credentials = self.manager.ensure_credentials(account_id).await?;

        let url = format!(
            "{}/{}/{}",
            self.systems_url,
            account_id,
            endpoint.trim_start_matches('/')
        );

        let mut request_headers = HeaderMap::new();
        request_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        request_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json;charset=UTF-8"));
        if let Some(extra) = headers {
            request_headers.extend(extra);
        }

        let mut request = self
            .http_client
            .request(method.clone(), &url)
            .bearer_auth(&credentials.system_token)
            .headers(request_headers);
        if !params.is_empty() {
            request = request.query(params);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(method = %method, endpoint = %endpoint, "Sending request");
        let response = request.send().await.map_err(|source| {
            error!(method = %method, endpoint = %endpoint, error = %source, "Request failed");
            RequestError::Transport {
                method: method.clone(),
                endpoint: endpoint.to_string(),
                source,
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|source| RequestError::Transport {
            method: method.clone(),
            endpoint: endpoint.to_string(),
            source,
        })?;

        if !status.is_success() {
            error!(method = %method, endpoint = %endpoint, status = %status, body = %text, "Request rejected");
            return Err(RequestError::Status {
                method,
                endpoint: endpoint.to_string(),
                status,
                body: text,
            });
        }

        if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
            return Ok(Value::Bool(true));
        }

        serde_json::from_str(&text).map_err(|source| RequestError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }
}
