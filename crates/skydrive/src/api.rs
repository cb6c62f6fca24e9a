//! Token holder and generic API call
//!
//! Every request carries the access token as the `access_token` query
//! parameter. Before each call the token is checked against its expiry (with
//! a 30 second margin) and refreshed when stale. A 401 from the API triggers
//! one forced refresh and one retry of the same request.

use std::sync::Arc;

use common::Secret;
use reqwest::header::CONTENT_LENGTH;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use skydrive_auth::{AccessToken, OAuthClient, TokenStore};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::request::{ApiRequest, RequestBody};

/// Live Connect error envelope: `{"error":{"code":"...","message":"..."}}`
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

pub struct SkyDriveApi {
    http: reqwest::Client,
    oauth: OAuthClient,
    api_base: String,
    token: RwLock<Option<AccessToken>>,
    /// Long-lived refresh token supplied by configuration, used when the
    /// current bundle has none (or there is no bundle yet)
    refresh_token: Option<Secret<String>>,
    store: Option<Arc<TokenStore>>,
    /// Serializes refreshes so concurrent callers don't each mint a token
    refresh_lock: Mutex<()>,
}

impl SkyDriveApi {
    pub fn new(http: reqwest::Client, oauth: OAuthClient) -> Self {
        Self {
            http,
            oauth,
            api_base: skydrive_auth::API_BASE_URL.to_string(),
            token: RwLock::new(None),
            refresh_token: None,
            store: None,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_refresh_token(mut self, refresh_token: Secret<String>) -> Self {
        self.refresh_token = Some(refresh_token);
        self
    }

    /// Persist refreshed tokens to `store` and seed from it on first use.
    pub fn with_token_store(mut self, store: Arc<TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn oauth(&self) -> &OAuthClient {
        &self.oauth
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    // --- token state ---

    /// Replace the in-memory token bundle (does not persist).
    pub async fn set_access_token(&self, token: AccessToken) {
        *self.token.write().await = Some(token);
    }

    /// The current token bundle, seeding from the token store if needed.
    pub async fn access_token(&self) -> Option<AccessToken> {
        if let Some(token) = self.token.read().await.clone() {
            return Some(token);
        }
        let stored = match &self.store {
            Some(store) => store.get().await,
            None => None,
        };
        if let Some(token) = &stored {
            *self.token.write().await = Some(token.clone());
        }
        stored
    }

    /// True when there is no token or it expires within the safety margin.
    pub async fn is_access_token_expired(&self) -> bool {
        match self.access_token().await {
            Some(token) => token.is_expired(),
            None => true,
        }
    }

    /// Whether a refresh is possible at all (bundle or configured refresh token).
    pub async fn has_refresh_token(&self) -> bool {
        self.refresh_source().await.is_some()
    }

    /// Sign-in URL for the authorization-code flow.
    pub fn authorize_url(&self, state: Option<&str>) -> Result<String> {
        Ok(skydrive_auth::build_authorize_url(&self.oauth, state)?)
    }

    /// Exchange an authorization code, then store and persist the bundle.
    pub async fn access_token_from_code(&self, code: &str) -> Result<AccessToken> {
        let token = skydrive_auth::exchange_code(&self.http, &self.oauth, code).await?;
        if let Some(store) = &self.store {
            store.set(token.clone()).await?;
        }
        *self.token.write().await = Some(token.clone());
        info!(expires_at = token.expires_at(), "access token obtained from authorization code");
        Ok(token)
    }

    /// Mint a new access token from the refresh token, unconditionally.
    pub async fn refresh_access_token(&self) -> Result<AccessToken> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<AccessToken> {
        let refresh = self.refresh_source().await.ok_or_else(|| {
            Error::NotAuthenticated(
                "no refresh token available; complete the authorization flow first".into(),
            )
        })?;

        let token = match skydrive_auth::refresh_token(&self.http, &self.oauth, &refresh).await {
            Ok(token) => {
                metrics::counter!("skydrive_token_refreshes_total", "result" => "success")
                    .increment(1);
                token
            }
            Err(e) => {
                metrics::counter!("skydrive_token_refreshes_total", "result" => "failure")
                    .increment(1);
                warn!(error = %e, "access token refresh failed");
                return Err(e.into());
            }
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.set(token.clone()).await {
                warn!(error = %e, "failed to persist refreshed token");
            }
        }
        *self.token.write().await = Some(token.clone());
        info!(expires_at = token.expires_at(), "access token refreshed");
        Ok(token)
    }

    async fn refresh_source(&self) -> Option<String> {
        self.access_token()
            .await
            .and_then(|t| t.refresh_token)
            .or_else(|| self.refresh_token.as_ref().map(|s| s.expose().clone()))
    }

    /// Return a usable access token, refreshing first if it is stale.
    async fn valid_access_token(&self) -> Result<String> {
        if let Some(token) = self.access_token().await {
            if !token.is_expired() {
                return Ok(token.access_token);
            }
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some(token) = self.token.read().await.clone() {
            if !token.is_expired() {
                return Ok(token.access_token);
            }
        }
        debug!("access token missing or expiring, refreshing");
        Ok(self.refresh_locked().await?.access_token)
    }

    // --- calls ---

    /// Perform a request and decode the JSON response.
    ///
    /// An empty response body (DELETE, 204) decodes to `Value::Null`.
    pub async fn call(&self, request: ApiRequest) -> Result<Value> {
        let response = self.send(&request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Http(format!("{}: reading response: {e}", request.endpoint)))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Decode(format!("{}: {e}", request.endpoint)))?;
        debug!(endpoint = request.endpoint, response = %value, "api response");
        Ok(value)
    }

    /// Perform a request and decode the response into `T`.
    pub async fn call_as<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let endpoint = request.endpoint;
        let value = self.call(request).await?;
        serde_json::from_value(value).map_err(|e| Error::Decode(format!("{endpoint}: {e}")))
    }

    /// Send a request, returning the successful response unread.
    ///
    /// Refreshes a stale token first; on 401 forces one refresh and retries once.
    pub(crate) async fn send(&self, request: &ApiRequest) -> Result<reqwest::Response> {
        let access = self.valid_access_token().await?;
        let response = self.send_once(request, &access).await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            let err = api_error(request.endpoint, response).await;
            if !self.has_refresh_token().await {
                return Err(err);
            }
            warn!(
                endpoint = request.endpoint,
                error = %err,
                "access token rejected, refreshing and retrying"
            );
            let refreshed = self.refresh_access_token().await?;
            let retry = self.send_once(request, &refreshed.access_token).await?;
            return check_status(request.endpoint, retry).await;
        }

        check_status(request.endpoint, response).await
    }

    async fn send_once(&self, request: &ApiRequest, access: &str) -> Result<reqwest::Response> {
        let url = request.url(&self.api_base, access)?;
        debug!(
            endpoint = request.endpoint,
            method = %request.method,
            path = %request.path(),
            "api request"
        );

        let mut builder = self.http.request(request.method.clone(), url);
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::File(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| Error::Io(format!("opening {}: {e}", path.display())))?;
                let len = file
                    .metadata()
                    .await
                    .map_err(|e| Error::Io(format!("stat {}: {e}", path.display())))?
                    .len();
                debug!(endpoint = request.endpoint, bytes = len, "streaming file body");
                builder
                    .header(CONTENT_LENGTH, len)
                    .body(reqwest::Body::from(file))
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Http(format!("{}: {e}", request.endpoint)))?;

        metrics::counter!(
            "skydrive_api_requests_total",
            "endpoint" => request.endpoint,
            "status" => response.status().as_u16().to_string()
        )
        .increment(1);

        Ok(response)
    }
}

async fn check_status(endpoint: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(api_error(endpoint, response).await)
    }
}

/// Turn a non-success response into `Error::Api`, decoding the Live error envelope.
async fn api_error(endpoint: &str, response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(parsed) => Error::Api {
            status,
            code: parsed.error.code,
            message: parsed.error.message,
        },
        Err(_) => Error::Api {
            status,
            code: String::new(),
            message: if body.is_empty() {
                format!("{endpoint} failed")
            } else {
                body
            },
        },
    }
}
