//! Wire format for the WalletLink cross-context RPC.
//!
//! Everything on the wire is UTF-8 JSON. Request envelopes carry their
//! operation payload as an encoded JSON string (see [`payload`]), byte
//! fields are standard base64, and the direct channel is preceded by the
//! [`handshake`] tokens.

pub mod errors;
pub mod handshake;
pub mod message;
pub mod payload;
pub mod relay;
pub mod transaction;
pub mod validation;

#[cfg(test)]
mod proptests;

pub use errors::DecodeError;
pub use message::{Message, MessageResponse, MessageType, ResponseFrame, ResponseOutcome};
pub use payload::{Payload, SignMessagePayload, SignTransactionPayload, TrustSitePayload};
pub use transaction::{Transaction, TransactionError};
