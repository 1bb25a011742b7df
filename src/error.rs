#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use thiserror::Error;

/// Error code constants for type-safe error handling
pub mod code {
    pub const CANCELLED: &str = "CANCELLED";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const NOTFOUND: &str = "NOTFOUND";
    pub const INVALID: &str = "INVALID";
    pub const CONFLICT: &str = "CONFLICT";
    pub const DEPENDENCY: &str = "DEPENDENCY";
    pub const INTERNAL: &str = "INTERNAL";
    pub const USER_REJECTED: &str = "USER_REJECTED";
}

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Turn cancelled")]
    Cancelled,

    #[error("Turn timed out")]
    TimedOut,

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("No billing account for conversation: {0}")]
    BillingAccountMissing(String),

    #[error("Pending tool call not found: {0}")]
    PendingCallNotFound(String),

    #[error("Invalid lifecycle state: {0}")]
    InvalidLifecycleState(String),

    #[error("Model error: {0}")]
    ModelError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SwarmError {
    /// Returns the protocol error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Cancelled => code::CANCELLED,
            Self::TimedOut => code::TIMEOUT,
            Self::ConversationNotFound(_) | Self::PendingCallNotFound(_) => code::NOTFOUND,
            Self::BillingAccountMissing(_) | Self::ConfigError(_) | Self::SerializationError(_) => {
                code::INVALID
            }
            Self::InvalidLifecycleState(_) => code::CONFLICT,
            Self::ModelError(_) | Self::IoError(_) => code::DEPENDENCY,
            Self::StoreError(_) | Self::Internal(_) => code::INTERNAL,
        }
    }

    /// Returns the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigError(_) => 2,
            Self::ConversationNotFound(_) | Self::PendingCallNotFound(_) => 3,
            Self::BillingAccountMissing(_) => 4,
            Self::InvalidLifecycleState(_) => 5,
            Self::ModelError(_) => 6,
            Self::IoError(_) => 7,
            Self::SerializationError(_) => 8,
            Self::StoreError(_) => 9,
            Self::Internal(_) => 10,
            Self::Cancelled => 11,
            Self::TimedOut => 12,
        }
    }
}

pub type Result<T> = std::result::Result<T, SwarmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn when_error_is_timeout_then_code_differs_from_cancelled() {
        assert_eq!(SwarmError::TimedOut.code(), code::TIMEOUT);
        assert_eq!(SwarmError::Cancelled.code(), code::CANCELLED);
        assert_ne!(SwarmError::TimedOut.code(), SwarmError::Cancelled.code());
    }

    #[test]
    fn when_billing_account_is_missing_then_error_is_invalid() {
        let err = SwarmError::BillingAccountMissing("conv-1".to_string());
        assert_eq!(err.code(), code::INVALID);
        assert_eq!(err.exit_code(), 4);
    }
}
