//! Error types for WalletLink core.

use thiserror::Error;
use wlk_proto::validation::ValidationError;
use wlk_proto::{DecodeError, MessageType, TransactionError};

// ============================================================================
// Channel errors
// ============================================================================

/// Failure to open the wallet's child context.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OpenError {
    /// The environment refused to open it. Recoverable by an explicit user
    /// action, see [`crate::client::RpcClient::retry_operation`].
    #[error("child context blocked")]
    Blocked,

    #[error("failed to open child context: {0}")]
    Failed(String),
}

/// Failure to post on a channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,

    #[error("channel error: {0}")]
    Other(String),
}

// ============================================================================
// Client errors
// ============================================================================

/// Reasons a caller's request future is rejected, and contract violations
/// reported by the client's control methods.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("wallet is busy")]
    Busy,

    #[error(transparent)]
    Open(#[from] OpenError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("request timed out")]
    Timeout,

    /// The wallet answered with a failure; carries its error text verbatim.
    #[error("{0}")]
    Rejected(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("invalid response: {0}")]
    Invalid(#[from] ValidationError),

    #[error("invalid transaction: {0}")]
    Transaction(#[from] TransactionError),

    #[error("response type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: MessageType,
        actual: MessageType,
    },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("no pending retry operation")]
    NoPendingRetry,

    #[error("no pending message")]
    NoPendingMessage,

    #[error("no handler")]
    NoHandler,

    #[error("client dropped before the request settled")]
    Dropped,
}

// ============================================================================
// Wallet action errors
// ============================================================================

/// Error returned by a [`crate::responder::WalletAccount`] action. Its
/// display text becomes the `error` field of the failure response.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("no active account")]
    NoAccount,

    #[error("user not authenticated")]
    Unauthenticated,

    /// The user refused.
    #[error("{0}")]
    Declined(String),

    #[error("{0}")]
    Failed(String),
}

// ============================================================================
// Responder errors
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResponderError {
    #[error("undecodable envelope: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

// ============================================================================
// Relay errors
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session already consumed: {0}")]
    SessionConsumed(String),

    #[error("session store error: {0}")]
    Store(String),

    #[error("relay payload: {0}")]
    Decode(#[from] DecodeError),

    #[error("timed out waiting for authentication")]
    NotAuthenticated,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(String),
    #[error("config parse error: {0}")]
    ParseError(String),
    #[error("config validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_texts_match_wire_conventions() {
        assert_eq!(ClientError::Busy.to_string(), "wallet is busy");
        assert_eq!(ClientError::Cancelled.to_string(), "operation cancelled");
        assert_eq!(ClientError::Rejected("declined".into()).to_string(), "declined");
        assert_eq!(ClientError::NoPendingRetry.to_string(), "no pending retry operation");
        assert_eq!(ClientError::from(OpenError::Blocked).to_string(), "child context blocked");
        assert_eq!(ActionError::Declined("declined".into()).to_string(), "declined");
        assert_eq!(ActionError::NoAccount.to_string(), "no active account");
    }
}
