//! Validation helpers for decoded payloads and configured origins.

use crate::payload::SignTransactionPayload;
use crate::transaction::Transaction;

/// Validation error types for payload fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Field has invalid size (expected, actual)
    InvalidSize { field: &'static str, expected: usize, actual: usize },
    /// Required field is empty
    EmptyField { field: &'static str },
    /// Field contains invalid data
    InvalidData { field: &'static str, reason: &'static str },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSize { field, expected, actual } => {
                write!(f, "field '{}' has invalid size: expected {}, got {}", field, expected, actual)
            }
            Self::EmptyField { field } => {
                write!(f, "required field '{}' is empty", field)
            }
            Self::InvalidData { field, reason } => {
                write!(f, "field '{}' contains invalid data: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult<T> = Result<T, ValidationError>;

pub mod sizes {
    /// Size of Ed25519 public keys.
    pub const ED25519_PUB_SIZE: usize = 32;
    /// Size of Ed25519 signatures.
    pub const ED25519_SIG_SIZE: usize = 64;
}

fn fixed<const N: usize>(field: &'static str, bytes: &[u8]) -> ValidationResult<[u8; N]> {
    if bytes.is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    bytes.try_into().map_err(|_| ValidationError::InvalidSize {
        field,
        expected: N,
        actual: bytes.len(),
    })
}

pub fn validate_public_key(bytes: &[u8]) -> ValidationResult<[u8; sizes::ED25519_PUB_SIZE]> {
    fixed("pubkey", bytes)
}

pub fn validate_signature(bytes: &[u8]) -> ValidationResult<[u8; sizes::ED25519_SIG_SIZE]> {
    fixed("signature", bytes)
}

/// A signed transaction payload's `signatures`, when present, must list one
/// entry per signer slot of the transaction it carries, in slot order.
pub fn validate_signature_list(payload: &SignTransactionPayload, tx: &Transaction) -> ValidationResult<()> {
    let Some(list) = &payload.signatures else {
        return Ok(());
    };
    if list.len() != tx.signatures().len() {
        return Err(ValidationError::InvalidSize {
            field: "signatures",
            expected: tx.signatures().len(),
            actual: list.len(),
        });
    }
    for (listed, slot) in list.iter().zip(tx.signatures()) {
        if listed.as_slice() != slot.as_slice() {
            return Err(ValidationError::InvalidData {
                field: "signatures",
                reason: "does not match transaction signature slot",
            });
        }
    }
    Ok(())
}

/// Origins are compared as plain strings, so they must be in the
/// `scheme://host[:port]` form with no path or trailing slash.
pub fn validate_origin(field: &'static str, origin: &str) -> ValidationResult<()> {
    if origin.is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    let Some((scheme, rest)) = origin.split_once("://") else {
        return Err(ValidationError::InvalidData { field, reason: "missing scheme" });
    };
    if scheme.is_empty() || rest.is_empty() {
        return Err(ValidationError::InvalidData { field, reason: "missing scheme or host" });
    }
    if rest.contains('/') {
        return Err(ValidationError::InvalidData { field, reason: "origin must not contain a path" });
    }
    Ok(())
}
