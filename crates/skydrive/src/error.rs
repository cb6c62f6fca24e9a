//! Error types for SkyDrive API calls

use crate::classify::{ErrorClassification, classify_status};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    #[error(transparent)]
    Auth(#[from] skydrive_auth::Error),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("SkyDrive API returned {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    pub fn classification(&self) -> ErrorClassification {
        match self {
            Error::Api { status, code, .. } => classify_status(*status, code),
            Error::NotAuthenticated(_) => ErrorClassification::Unauthorized,
            Error::Auth(skydrive_auth::Error::InvalidCredentials(_)) => {
                ErrorClassification::Unauthorized
            }
            Error::Decode(_) | Error::InvalidUrl(_) => ErrorClassification::Permanent,
            _ => ErrorClassification::Transient,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.classification() == ErrorClassification::NotFound
    }
}

pub type Result<T> = std::result::Result<T, Error>;
