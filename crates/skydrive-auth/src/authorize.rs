//! Authorization URL construction
//!
//! The user is sent to the authorization endpoint to sign in and approve the
//! requested scopes; Live Connect redirects back to `redirect_uri` with a
//! `code` query parameter that `token::exchange_code` consumes.

use reqwest::Url;

use crate::client::OAuthClient;
use crate::error::{Error, Result};

/// Build the sign-in URL for a browser redirect.
///
/// Uses the full-page sign-in (`display=page`, `locale=en`). `state` is an
/// opaque value echoed back on the redirect so the callback can reject
/// responses it did not ask for.
pub fn build_authorize_url(client: &OAuthClient, state: Option<&str>) -> Result<String> {
    let mut params = vec![
        ("display", "page"),
        ("locale", "en"),
        ("client_id", client.client_id.as_str()),
        ("scope", client.scope.as_str()),
        ("response_type", "code"),
        ("redirect_uri", client.redirect_uri.as_str()),
    ];
    if let Some(state) = state {
        params.push(("state", state));
    }
    encode(&client.authorize_endpoint, &params)
}

/// Build the minimal authorization-code request URL (no display hints).
pub fn build_authorization_code_url(client: &OAuthClient) -> Result<String> {
    encode(
        &client.authorize_endpoint,
        &[
            ("client_id", client.client_id.as_str()),
            ("scope", client.scope.as_str()),
            ("response_type", "code"),
            ("redirect_uri", client.redirect_uri.as_str()),
        ],
    )
}

fn encode(endpoint: &str, params: &[(&str, &str)]) -> Result<String> {
    Url::parse_with_params(endpoint, params)
        .map(String::from)
        .map_err(|e| Error::InvalidUrl(format!("{endpoint}: {e}")))
}
