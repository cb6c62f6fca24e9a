//! Registered application identity

use common::Secret;

use crate::constants::{AUTHORIZE_ENDPOINT, DEFAULT_SCOPE, TOKEN_ENDPOINT};

/// The application registration used for every OAuth request.
///
/// Endpoints default to the public Live Connect URLs and can be pointed
/// elsewhere (mock servers in tests, egress proxies in deployment).
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: Secret<String>,
    /// Must belong to the domain registered for the application
    pub redirect_uri: String,
    /// Comma-separated Live Connect scopes
    pub scope: String,
    pub authorize_endpoint: String,
    pub token_endpoint: String,
}

impl OAuthClient {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: Secret<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            redirect_uri: redirect_uri.into(),
            scope: DEFAULT_SCOPE.to_string(),
            authorize_endpoint: AUTHORIZE_ENDPOINT.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_endpoints(
        mut self,
        authorize_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
    ) -> Self {
        self.authorize_endpoint = authorize_endpoint.into();
        self.token_endpoint = token_endpoint.into();
        self
    }
}
