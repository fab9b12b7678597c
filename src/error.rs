//! Error types for lark

use thiserror::Error;

/// Result type alias for lark operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in lark
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Input failed validation
    #[error("validation error: {0}")]
    Validation(String),

    /// Audio error
    #[error("audio error: {0}")]
    Audio(String),

    /// Wake word detection error
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Completion (LLM) error
    #[error("completion error: {0}")]
    Completion(String),

    /// Authentication/authorization error
    #[error("auth error: {0}")]
    Auth(String),

    /// User not found
    #[error("user not found")]
    UserNotFound,

    /// User already exists (duplicate email for a provider)
    #[error("user already exists")]
    UserAlreadyExists,

    /// Device not found
    #[error("device not found")]
    DeviceNotFound,

    /// Opaque enrollment failure. Deliberately carries no detail so a caller
    /// cannot distinguish a missing device from a wrong OTP.
    #[error("enrollment failed")]
    EnrollmentFailed,

    /// The CA rejected or failed a signing request
    #[error("CA signing failed with status {status}: {body}")]
    CaSign { status: u16, body: String },

    /// Certificate / CSR handling error
    #[error("certificate error: {0}")]
    Certificate(String),

    /// Tool registry error
    #[error("tool error: {0}")]
    Tool(String),

    /// The backend rejected or failed a device request
    #[error("backend error: {0}")]
    Backend(String),

    /// Operation cancelled
    #[error("cancelled")]
    Cancelled,

    /// Unexpected internal failure
    #[error("internal error: {0}")]
    Internal(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
