//! Cross-context messaging seam.
//!
//! The client never holds a reference to the wallet surface itself, only a
//! [`MessagePort`] that posts text to it with a target origin. Inbound
//! traffic arrives as [`ChannelEvent`]s tagged with the sender's origin by
//! the environment; that origin is the only authentication there is.

use std::sync::Arc;

use crate::errors::{ChannelError, OpenError};

/// One inbound message with the origin the environment attributed it to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    pub origin: String,
    pub data: String,
}

impl ChannelEvent {
    pub fn new(origin: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            data: data.into(),
        }
    }
}

/// Handle for posting to another context.
///
/// `target_origin` is the origin the receiving context must have for the
/// message to be delivered; implementations drop messages otherwise.
/// Implementations must not call back into the sender synchronously.
pub trait MessagePort: Send + Sync {
    fn post_message(&self, data: &str, target_origin: &str) -> Result<(), ChannelError>;
}

/// Opens the wallet's child context.
pub trait ContextOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<Arc<dyn MessagePort>, OpenError>;
}
