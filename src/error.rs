//! Error taxonomy shared by every component
//!
//! Numeric codes follow the key tool's C ABI: success is 0, failures are negative.

/// TEE-related errors
#[derive(Debug, thiserror::Error)]
pub enum TeeError {
    /// The requested backend could not be initialized. Non-recoverable:
    /// no usable component is handed out after this.
    #[error("TEE backend not available: {0}")]
    BackendUnavailable(String),

    #[error("TDX report error: {0}")]
    TdxReport(String),

    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl TeeError {
    /// Stable numeric code for this error class
    pub fn code(&self) -> i32 {
        match self {
            TeeError::BackendUnavailable(_) | TeeError::TdxReport(_) => -1,
            TeeError::KeyDerivation(_) => -2,
            TeeError::InvalidParam(_) => -3,
            TeeError::Crypto(_) => -4,
        }
    }
}

pub type Result<T> = std::result::Result<T, TeeError>;
