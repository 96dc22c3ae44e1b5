//! Readiness tokens exchanged on the direct channel before the JSON frames.

/// Posted by the caller until the wallet surface answers.
pub const IS_READY: &str = "IS_READY";

/// Posted by the wallet surface once it can accept an envelope.
pub const WALLET_READY: &str = "WALLET_READY";

/// Classification of a raw channel frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelFrame<'a> {
    IsReady,
    WalletReady,
    Envelope(&'a str),
}

impl<'a> ChannelFrame<'a> {
    pub fn classify(data: &'a str) -> Self {
        match data {
            IS_READY => ChannelFrame::IsReady,
            WALLET_READY => ChannelFrame::WalletReady,
            other => ChannelFrame::Envelope(other),
        }
    }
}
