//! Header templates that make the login look like a desktop Chrome session.

use super::AuthError;
use crate::config::Platform;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, COOKIE, ORIGIN,
    PRAGMA, REFERER, UPGRADE_INSECURE_REQUESTS,
};
use reqwest::Url;

const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7";
const PDK_API_ACCEPT: &str = "application/vnd.pdk.v2+json";
const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF-8";

/// Per-platform request header sets.
///
/// Built once from the resolved [`Platform`]; every accessor hands out an
/// owned copy the caller can extend.
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    base: HeaderMap,
    login: HeaderMap,
    navigation: HeaderMap,
    callback: HeaderMap,
    api: HeaderMap,
}

impl BrowserProfile {
    pub fn new(platform: &Platform) -> Result<Self, AuthError> {
        let login_page = HeaderValue::from_str(&format!("{}/login", platform.accounts_url))?;
        let accounts_root = HeaderValue::from_str(&format!("{}/", platform.accounts_url))?;

        let mut base = HeaderMap::new();
        base.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        base.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en"));
        base.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        base.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        base.insert(
            "sec-ch-ua",
            HeaderValue::from_static("\"Not(A:Brand\";v=\"99\", \"Google Chrome\";v=\"133\", \"Chromium\";v=\"133\""),
        );
        base.insert("sec-ch-ua-mobile", HeaderValue::from_static("?0"));
        base.insert("sec-ch-ua-platform", HeaderValue::from_static("\"macOS\""));

        let mut login = HeaderMap::new();
        login.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        login.insert(ORIGIN, HeaderValue::from_str(&origin_of(&platform.accounts_url))?);
        login.insert(REFERER, login_page.clone());

        let mut navigation = HeaderMap::new();
        navigation.insert(ACCEPT, HeaderValue::from_static(HTML_ACCEPT));
        navigation.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        navigation.insert(REFERER, login_page);
        navigation.insert("sec-fetch-dest", HeaderValue::from_static("document"));
        navigation.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
        navigation.insert("sec-fetch-site", HeaderValue::from_static("same-origin"));
        navigation.insert("sec-fetch-user", HeaderValue::from_static("?1"));
        navigation.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));

        // The callback lives on the API host, one hop away from the identity host
        let mut callback = navigation.clone();
        callback.insert(REFERER, accounts_root);
        callback.insert("sec-fetch-site", HeaderValue::from_static("same-site"));

        let mut api = HeaderMap::new();
        api.insert(ACCEPT, HeaderValue::from_static(PDK_API_ACCEPT));
        api.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        api.insert(ORIGIN, HeaderValue::from_str(&origin_of(&platform.api_url))?);
        api.insert(REFERER, HeaderValue::from_str(&format!("{}/", platform.systems_url))?);

        Ok(Self {
            base,
            login,
            navigation,
            callback,
            api,
        })
    }

    /// Headers sent with every request (installed as client defaults).
    pub fn base(&self) -> HeaderMap {
        self.base.clone()
    }

    /// Credential submission and pre-login profile requests.
    pub fn login(&self) -> HeaderMap {
        self.login.clone()
    }

    /// Top-level document navigation on the identity host.
    pub fn navigation(&self) -> HeaderMap {
        self.navigation.clone()
    }

    /// Cross-site navigation to the authorization callback.
    pub fn callback(&self) -> HeaderMap {
        self.callback.clone()
    }

    /// Token endpoint call authorized by an id token.
    pub fn api(&self, id_token: &str) -> Result<HeaderMap, AuthError> {
        let mut headers = self.api.clone();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", id_token))?);
        Ok(headers)
    }

    /// Refresh exchange: tokens travel as cookies, not as a bearer header.
    pub fn refresh(&self, id_token: Option<&str>, refresh_token: &str) -> Result<HeaderMap, AuthError> {
        let mut cookies = Vec::with_capacity(2);
        if let Some(id_token) = id_token {
            cookies.push(format!("idToken={}", id_token));
        }
        cookies.push(format!("refreshToken={}", refresh_token));

        let mut headers = self.api.clone();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.remove(CONTENT_TYPE);
        headers.insert("sec-fetch-dest", HeaderValue::from_static("empty"));
        headers.insert("sec-fetch-mode", HeaderValue::from_static("cors"));
        headers.insert("sec-fetch-site", HeaderValue::from_static("same-origin"));
        headers.insert(COOKIE, HeaderValue::from_str(&cookies.join("; "))?);
        Ok(headers)
    }
}

/// `scheme://host[:port]` of a URL, or the input unchanged if it does not parse.
fn origin_of(url: &str) -> String {
    Url::parse(url)
        .map(|u| u.origin().ascii_serialization())
        .unwrap_or_else(|_| url.to_string())
}
