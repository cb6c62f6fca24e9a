//! SkyDrive authorization flow
//!
//! Endpoints:
//! - GET /skydrive/authorize: redirect the operator to the Live sign-in page
//! - GET /skydrive/callback: exchange the returned code and store the token
//!
//! Each authorize call issues a random `state` that the callback must echo
//! back within 10 minutes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::http::header::LOCATION;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::AppState;
use crate::error::Error;
use crate::metrics::finish;

/// Maximum age of an issued `state` before the callback rejects it.
const STATE_EXPIRY: Duration = Duration::from_secs(600); // 10 minutes

/// `state` values issued by authorize and not yet consumed by the callback.
#[derive(Clone, Default)]
pub struct PendingAuthorizations {
    states: Arc<Mutex<HashMap<String, Instant>>>,
}

impl PendingAuthorizations {
    pub async fn issue(&self) -> String {
        let state = uuid::Uuid::new_v4().simple().to_string();
        let mut states = self.states.lock().await;
        // Lazy cleanup: remove expired entries while holding the lock
        states.retain(|_, created| created.elapsed() < STATE_EXPIRY);
        states.insert(state.clone(), Instant::now());
        state
    }

    /// Consume `state`. False when it was never issued, already used, or expired.
    pub async fn take(&self, state: &str) -> bool {
        self.take_at(state, Instant::now()).await
    }

    async fn take_at(&self, state: &str, now: Instant) -> bool {
        let created = self.states.lock().await.remove(state);
        matches!(created, Some(created) if now.saturating_duration_since(created) < STATE_EXPIRY)
    }
}

/// GET /skydrive/authorize: 302 to the Live Connect sign-in page.
pub async fn authorize(State(state): State<AppState>) -> Response {
    let started = Instant::now();
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());

    let nonce = state.pending.issue().await;
    let response = match state.api.authorize_url(Some(&nonce)) {
        Ok(url) => {
            info!(request_id, "redirecting operator to SkyDrive sign-in");
            (StatusCode::FOUND, [(LOCATION, url)]).into_response()
        }
        Err(e) => Error::from(e).into_response(&request_id),
    };
    finish("skydrive_authorize", started, response)
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    /// Set by Live Connect when the user denies access
    error: Option<String>,
    error_description: Option<String>,
}

/// GET /skydrive/callback: validate `state`, exchange `code`, persist the token.
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let started = Instant::now();
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let response = match complete(&state, params).await {
        Ok(expires_at) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            serde_json::json!({
                "status": "authorized",
                "expires_at": expires_at,
            })
            .to_string(),
        )
            .into_response(),
        Err(e) => {
            warn!(request_id, error = %e, "SkyDrive authorization failed");
            e.into_response(&request_id)
        }
    };
    finish("skydrive_callback", started, response)
}

async fn complete(state: &AppState, params: CallbackParams) -> crate::error::Result<u64> {
    if let Some(error) = params.error {
        let description = params.error_description.unwrap_or_default();
        return Err(Error::Authorization(format!("{error}: {description}")));
    }

    let nonce = params
        .state
        .ok_or_else(|| Error::InvalidRequest("missing state parameter".into()))?;
    if !state.pending.take(&nonce).await {
        return Err(Error::Authorization(
            "unknown or expired state, restart at /skydrive/authorize".into(),
        ));
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::InvalidRequest("missing code parameter".into()))?;

    let token = state
        .api
        .access_token_from_code(&code)
        .await
        .map_err(|e| match e {
            skydrive::Error::Auth(e) => Error::Authorization(e.to_string()),
            other => Error::SkyDrive(other),
        })?;
    info!(expires_at = token.expires_at(), "SkyDrive authorization complete");
    Ok(token.expires_at())
}
