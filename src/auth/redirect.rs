//! Helpers for reading the redirect chain by hand.

use reqwest::header::LOCATION;
use reqwest::{Response, Url};
use serde::Deserialize;

/// Tokens delivered in the fragment of the implicit-grant callback URL.
#[derive(Debug, Deserialize, PartialEq)]
pub(super) struct FragmentTokens {
    pub id_token: String,
    pub access_token: Option<String>,
}

/// Raw `Location` header of a redirect response.
pub(super) fn location(response: &Response) -> Option<String> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|v| !v.is_empty())
}

/// Interaction id: the last path segment of the authorization redirect.
pub(super) fn interaction_id(location: &str) -> Option<String> {
    let path = location.split(['?', '#']).next().unwrap_or_default();
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Parses `id_token` and `access_token` out of a callback URL fragment.
///
/// Returns `None` when there is no fragment or it carries no id token.
pub(super) fn fragment_tokens(location: &str) -> Option<FragmentTokens> {
    let (_, fragment) = location.split_once('#')?;
    serde_urlencoded::from_str::<FragmentTokens>(fragment)
        .ok()
        .filter(|tokens| !tokens.id_token.is_empty())
}

/// Resolves a possibly relative `Location` against the request that produced it.
pub(super) fn resolve(base: &Url, location: &str) -> Result<Url, String> {
    base.join(location).map_err(|e| format!("invalid redirect target {:?}: {}", location, e))
}
