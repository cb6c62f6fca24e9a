//! Live Connect endpoints and OAuth defaults
//!
//! REST reference: Live Connect API v5.0. The client id and secret come from
//! the application registration and are supplied through configuration.

/// Base URL for every REST call (trailing slash included)
pub const API_BASE_URL: &str = "https://apis.live.net/v5.0/";

/// Authorization endpoint the user signs in on
pub const AUTHORIZE_ENDPOINT: &str = "https://login.live.com/oauth20_authorize.srf";

/// Token endpoint for code exchange and token refresh
pub const TOKEN_ENDPOINT: &str = "https://login.live.com/oauth20_token.srf";

/// Scopes needed to sign in, stay signed in, and read/write SkyDrive files.
pub const DEFAULT_SCOPE: &str =
    "wl.signin,wl.basic,wl.offline_access,wl.contacts_skydrive,wl.skydrive_update";

/// A token expiring within this many seconds is treated as already expired.
pub const EXPIRY_MARGIN_SECS: i64 = 30;

/// Access token lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN: u64 = 3600;
