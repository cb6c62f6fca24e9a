//! Classification of SkyDrive API failures
//!
//! Live Connect reports errors as `{"error":{"code":"...","message":"..."}}`
//! alongside the HTTP status. The code is more specific than the status (an
//! expired token and a revoked one both come back as 401), so both feed the
//! classification.

/// How a caller should react to a failed API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Worth retrying later (timeouts, throttling, 5xx)
    Transient,
    /// Token expired or rejected; refresh and retry once
    Unauthorized,
    /// The object does not exist
    NotFound,
    /// The request itself is wrong; retrying will not help
    Permanent,
}

/// Error codes that mean the access token must be replaced.
const TOKEN_CODES: &[&str] = &["request_token_expired", "request_token_invalid"];

/// Error codes that mean the addressed object is gone.
const NOT_FOUND_CODES: &[&str] = &["resource_not_found", "request_url_invalid"];

/// Classify an API failure by HTTP status and Live Connect error code.
pub fn classify_status(status: u16, code: &str) -> ErrorClassification {
    if TOKEN_CODES.contains(&code) {
        return ErrorClassification::Unauthorized;
    }
    if NOT_FOUND_CODES.contains(&code) {
        return ErrorClassification::NotFound;
    }
    match status {
        401 => ErrorClassification::Unauthorized,
        404 => ErrorClassification::NotFound,
        408 | 429 => ErrorClassification::Transient,
        500..=599 => ErrorClassification::Transient,
        400..=499 => ErrorClassification::Permanent,
        _ => ErrorClassification::Transient,
    }
}
