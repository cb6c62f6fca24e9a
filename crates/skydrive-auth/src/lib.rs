//! Live Connect OAuth2 support for the SkyDrive client
//!
//! Covers the authorization-code flow and refresh-token flow against
//! `login.live.com`, plus a file-backed store for the current token bundle.
//!
//! Token lifecycle:
//! 1. Operator opens `authorize::build_authorize_url()` and signs in
//! 2. The redirect carries a code; `token::exchange_code()` turns it into a bundle
//! 3. The bundle is persisted with `TokenStore::set()`
//! 4. When `AccessToken::is_expired()` reports true, `token::refresh_token()`
//!    mints a new bundle from the refresh token and it is stored again

pub mod authorize;
pub mod client;
pub mod constants;
pub mod error;
pub mod store;
pub mod token;

pub use authorize::{build_authorization_code_url, build_authorize_url};
pub use client::OAuthClient;
pub use constants::*;
pub use error::{Error, Result};
pub use store::TokenStore;
pub use token::{AccessToken, exchange_code, refresh_token, unix_now};
