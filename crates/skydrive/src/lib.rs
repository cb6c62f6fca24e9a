//! SkyDrive (Live Connect v5.0) REST client
//!
//! `SkyDriveApi` holds the OAuth token bundle and exposes one generic
//! [`SkyDriveApi::call`] plus thin wrappers for the endpoints the photo
//! backend needs. Every wrapper is a single HTTP request; the only state the
//! client keeps is the token, refreshed transparently when it is about to
//! expire or when the API answers 401.

pub mod api;
pub mod classify;
pub mod endpoints;
pub mod error;
pub mod request;
pub mod types;

pub use api::SkyDriveApi;
pub use classify::{ErrorClassification, classify_status};
pub use error::{Error, Result};
pub use request::{ApiRequest, RequestBody};
pub use types::{Download, DriveObject, Listing, Quota, UserProfile};
