//! Error types for the LicenseGate SDK

use thiserror::Error;

use crate::types::LicenseStatus;

/// Error codes for SDK errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// License key has the wrong shape
    InvalidKey,
    /// License key not known to the server
    LicenseNotFound,
    /// License expiry date has passed
    LicenseExpired,
    /// License has been revoked
    LicenseRevoked,
    /// Cannot activate more machines
    MachineLimitExceeded,
    /// Hardware does not match any activation
    HardwareMismatch,
    /// Record signature did not verify
    InvalidSignature,
    /// Request was throttled by the server
    RateLimited,
    /// Network request failed or timed out
    NetworkError,
    /// Server answered with a 5xx
    ServerError,
    /// Invalid request parameters
    ValidationError,
    /// Bad SDK configuration (public key, base url)
    ConfigError,
    /// Local license file could not be written
    StorageError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "INVALID_KEY"),
            Self::LicenseNotFound => write!(f, "LICENSE_NOT_FOUND"),
            Self::LicenseExpired => write!(f, "LICENSE_EXPIRED"),
            Self::LicenseRevoked => write!(f, "LICENSE_REVOKED"),
            Self::MachineLimitExceeded => write!(f, "MACHINE_LIMIT_EXCEEDED"),
            Self::HardwareMismatch => write!(f, "HARDWARE_MISMATCH"),
            Self::InvalidSignature => write!(f, "INVALID_SIGNATURE"),
            Self::RateLimited => write!(f, "RATE_LIMITED"),
            Self::NetworkError => write!(f, "NETWORK_ERROR"),
            Self::ServerError => write!(f, "SERVER_ERROR"),
            Self::ValidationError => write!(f, "VALIDATION_ERROR"),
            Self::ConfigError => write!(f, "CONFIG_ERROR"),
            Self::StorageError => write!(f, "STORAGE_ERROR"),
        }
    }
}

/// LicenseGate SDK error
#[derive(Debug, Error)]
#[error("{message} (code: {code})")]
pub struct SdkError {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// HTTP status code (for API errors)
    pub status_code: Option<u16>,
}

impl SdkError {
    /// Create a new error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status_code: None,
        }
    }

    /// Create a new error with status code
    pub fn with_status(code: ErrorCode, message: impl Into<String>, status_code: u16) -> Self {
        Self {
            code,
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StorageError, message)
    }

    /// Worth retrying, and eligible for the offline grace period once
    /// retries are exhausted.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::NetworkError | ErrorCode::ServerError | ErrorCode::RateLimited
        )
    }

    /// License status this error reports to the application.
    pub fn as_status(&self) -> LicenseStatus {
        match self.code {
            ErrorCode::InvalidKey | ErrorCode::ValidationError => LicenseStatus::InvalidKey,
            ErrorCode::LicenseNotFound => LicenseStatus::NotFound,
            ErrorCode::LicenseExpired => LicenseStatus::Expired,
            ErrorCode::LicenseRevoked => LicenseStatus::Revoked,
            ErrorCode::MachineLimitExceeded => LicenseStatus::MachineLimitExceeded,
            ErrorCode::HardwareMismatch => LicenseStatus::HardwareMismatch,
            ErrorCode::InvalidSignature => LicenseStatus::InvalidSignature,
            ErrorCode::RateLimited
            | ErrorCode::NetworkError
            | ErrorCode::ServerError
            | ErrorCode::ConfigError
            | ErrorCode::StorageError => LicenseStatus::ServerUnreachable,
        }
    }
}

impl From<reqwest::Error> for SdkError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("Request timed out: {}", err)
        } else {
            format!("Request failed: {}", err)
        };
        Self::network(message)
    }
}

/// Result type for SDK operations
pub type Result<T> = std::result::Result<T, SdkError>;

/// Map HTTP status code to error code
pub(crate) fn map_status_to_error_code(status: u16, message: &str) -> ErrorCode {
    let lower_message = message.to_lowercase();

    if status == 429 {
        return ErrorCode::RateLimited;
    }

    if status >= 500 {
        return ErrorCode::ServerError;
    }

    if status == 401 || status == 403 {
        if lower_message.contains("revoked") {
            return ErrorCode::LicenseRevoked;
        }
        if lower_message.contains("expired") {
            return ErrorCode::LicenseExpired;
        }
        if lower_message.contains("machine limit") {
            return ErrorCode::MachineLimitExceeded;
        }
        return ErrorCode::LicenseNotFound;
    }

    if status == 404 {
        return ErrorCode::LicenseNotFound;
    }

    if status == 400 || status == 422 {
        return ErrorCode::ValidationError;
    }

    ErrorCode::NetworkError
}

/// Map an entitlement status returned in a 200 body to an error code.
pub(crate) fn status_to_error_code(status: LicenseStatus) -> ErrorCode {
    match status {
        LicenseStatus::Expired => ErrorCode::LicenseExpired,
        LicenseStatus::Revoked => ErrorCode::LicenseRevoked,
        LicenseStatus::MachineLimitExceeded => ErrorCode::MachineLimitExceeded,
        LicenseStatus::HardwareMismatch => ErrorCode::HardwareMismatch,
        LicenseStatus::InvalidSignature | LicenseStatus::Tampered => ErrorCode::InvalidSignature,
        LicenseStatus::InvalidKey => ErrorCode::InvalidKey,
        LicenseStatus::ServerUnreachable => ErrorCode::ServerError,
        LicenseStatus::NotFound | LicenseStatus::Valid | LicenseStatus::GracePeriod => {
            ErrorCode::LicenseNotFound
        }
    }
}
