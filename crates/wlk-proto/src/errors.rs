use thiserror::Error;

use crate::transaction::TransactionError;

/// Failure to decode a wire frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    Json(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid base64 in field '{field}'")]
    Base64 { field: &'static str },

    #[error("field '{field}' is not valid utf-8")]
    Utf8 { field: &'static str },

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("invalid transaction: {0}")]
    Transaction(#[from] TransactionError),
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Json(err.to_string())
    }
}
