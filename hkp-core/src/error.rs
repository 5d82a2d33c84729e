//! Error types and failure codes for the HKP loop.

use thiserror::Error;

/// Wire-level failure classification carried in round responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    /// Integrity tag did not match the bundle fields.
    IntegrityError,
    /// A candidate or request failed structural validation.
    ValidationError,
    /// Request could not be processed in the current session state.
    MalformedRequest,
    /// Request timestamp outside the replay window.
    ReplayDetected,
    /// Request signature missing or invalid.
    SignatureInvalid,
    /// Anything else (transport, serialization).
    Internal,
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IntegrityError => write!(f, "integrity_error"),
            Self::ValidationError => write!(f, "validation_error"),
            Self::MalformedRequest => write!(f, "malformed_request"),
            Self::ReplayDetected => write!(f, "replay_detected"),
            Self::SignatureInvalid => write!(f, "signature_invalid"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// HKP errors.
#[derive(Debug, Error)]
pub enum HkpError {
    /// Integrity tag mismatch. The only hard failure inside a round.
    #[error("integrity error: expected tag {expected}, bundle carries {found}")]
    Integrity { expected: String, found: String },

    /// Structurally invalid candidate or request.
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid state transition or out-of-order message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Signature encoding problems.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Transport error (connection, I/O).
    #[error("transport error: {0}")]
    Transport(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Request was refused by the round service.
    #[error("refused: {code} - {reason}")]
    Refused { code: FailureCode, reason: String },

    /// Replay attack detected.
    #[error("replay attack detected: message timestamp {timestamp} outside acceptable window")]
    ReplayDetected { timestamp: String },

    /// Signature verification failed.
    #[error("signature verification failed")]
    SignatureInvalid,
}

impl HkpError {
    /// Failure code reported on the wire for this error.
    pub fn code(&self) -> FailureCode {
        match self {
            Self::Integrity { .. } => FailureCode::IntegrityError,
            Self::Validation(_) => FailureCode::ValidationError,
            Self::Protocol(_) => FailureCode::MalformedRequest,
            Self::ReplayDetected { .. } => FailureCode::ReplayDetected,
            Self::SignatureInvalid | Self::Crypto(_) => FailureCode::SignatureInvalid,
            Self::Refused { code, .. } => *code,
            Self::Transport(_) | Self::Serialization(_) => FailureCode::Internal,
        }
    }
}

/// Result type alias for HKP operations.
pub type HkpResult<T> = Result<T, HkpError>;
