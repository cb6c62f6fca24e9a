//! Token bundle, code exchange and refresh
//!
//! Both operations POST a form to the token endpoint with different grant
//! types. The response is the Live Connect token bundle; `created` is not
//! part of the wire format and is stamped locally so expiry can be computed.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::OAuthClient;
use crate::constants::{DEFAULT_EXPIRES_IN, EXPIRY_MARGIN_SECS};
use crate::error::{Error, Result};

/// The OAuth2 token bundle returned by the token endpoint.
///
/// `expires_in` is a delta in seconds from `created` (unix seconds).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default)]
    pub scope: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_token: Option<String>,
    #[serde(default)]
    pub created: u64,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

fn default_expires_in() -> u64 {
    DEFAULT_EXPIRES_IN
}

impl AccessToken {
    /// Unix timestamp (seconds) at which the token stops being usable.
    pub fn expires_at(&self) -> u64 {
        self.created.saturating_add(self.expires_in)
    }

    /// Whether the token expires within the safety margin of `now`.
    pub fn is_expired_at(&self, now: u64) -> bool {
        (self.created as i64 + (self.expires_in as i64 - EXPIRY_MARGIN_SECS)) < now as i64
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_now())
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field(
                "authentication_token",
                &self.authentication_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("created", &self.created)
            .finish()
    }
}

/// Error body from the token endpoint: `{"error":"invalid_grant","error_description":"..."}`
#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
    #[serde(default)]
    error_description: String,
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Exchange an authorization code for a token bundle.
pub async fn exchange_code(
    http: &reqwest::Client,
    client: &OAuthClient,
    code: &str,
) -> Result<AccessToken> {
    let form = [
        ("client_id", client.client_id.as_str()),
        ("redirect_uri", client.redirect_uri.as_str()),
        ("client_secret", client.client_secret.expose().as_str()),
        ("grant_type", "authorization_code"),
        ("code", code),
    ];
    let token = post_token_form(http, &client.token_endpoint, &form, "exchange").await?;
    debug!(expires_in = token.expires_in, "authorization code exchanged");
    Ok(token)
}

/// Mint a new access token from a refresh token.
///
/// Live Connect normally rotates the refresh token; when the response omits
/// it, the one that was used stays valid and is carried over.
pub async fn refresh_token(
    http: &reqwest::Client,
    client: &OAuthClient,
    refresh: &str,
) -> Result<AccessToken> {
    let form = [
        ("client_id", client.client_id.as_str()),
        ("redirect_uri", client.redirect_uri.as_str()),
        ("client_secret", client.client_secret.expose().as_str()),
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh),
    ];
    let mut token = post_token_form(http, &client.token_endpoint, &form, "refresh").await?;
    if token.refresh_token.is_none() {
        token.refresh_token = Some(refresh.to_string());
    }
    debug!(expires_in = token.expires_in, "access token refreshed");
    Ok(token)
}

async fn post_token_form(
    http: &reqwest::Client,
    endpoint: &str,
    form: &[(&str, &str)],
    grant: &str,
) -> Result<AccessToken> {
    let response = http
        .post(endpoint)
        .form(form)
        .send()
        .await
        .map_err(|e| Error::Http(format!("token {grant} request failed: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::Http(format!("reading token {grant} response: {e}")))?;

    if !status.is_success() {
        let parsed = serde_json::from_str::<TokenErrorBody>(&body).ok();
        let rejected = matches!(status.as_u16(), 401 | 403)
            || parsed
                .as_ref()
                .is_some_and(|b| b.error == "invalid_grant" || b.error == "invalid_client");
        let detail = match parsed {
            Some(b) => format!("{}: {}", b.error, b.error_description),
            None => body,
        };
        if rejected {
            return Err(Error::InvalidCredentials(format!(
                "token {grant} rejected ({status}): {detail}"
            )));
        }
        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {detail}"
        )));
    }

    let mut token: AccessToken = serde_json::from_str(&body)
        .map_err(|e| Error::TokenExchange(format!("invalid token {grant} response: {e}")))?;
    token.created = unix_now();
    Ok(token)
}
