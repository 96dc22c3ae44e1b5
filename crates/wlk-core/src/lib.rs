//! WalletLink core - cross-context wallet RPC.
//!
//! This crate implements:
//! - The caller-side RPC client state machine (handshake, correlation, retry)
//! - The wallet-side responder and its account capability trait
//! - The relay bridge and an HTTP client for the session store
//! - A local ed25519 wallet account

#![forbid(unsafe_code)]

// State machines
pub mod client;
pub mod responder;
pub mod relay;

// Channel seam
pub mod channel;

// Supporting modules
pub mod config;
pub mod errors;
pub mod types;
pub mod wallet;
pub mod harness;

// Optional transport implementations
#[cfg(feature = "http-relay")]
pub mod http_session;

pub use channel::{ChannelEvent, ContextOpener, MessagePort};
pub use client::{ClientState, Delivery, DropReason, RpcClient};
pub use config::{ClientConfig, RelayConfig};
pub use errors::{ActionError, ClientError, OpenError, RelayError};
pub use relay::{RelayBridge, SessionStore};
pub use responder::{Responder, WalletAccount};
pub use types::{PublicKey, RequestKind};
