//! Callee side of the cross-context RPC.
//!
//! The responder decodes an envelope, dispatches it by operation type to the
//! wallet's [`WalletAccount`] capability and produces exactly one response
//! envelope, addressed to the origin the request declared.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use wlk_proto::handshake::{ChannelFrame, WALLET_READY};
use wlk_proto::{
    Message, MessageResponse, MessageType, Payload, SignMessagePayload, SignTransactionPayload,
    Transaction, TrustSitePayload,
};

use crate::channel::{ChannelEvent, MessagePort};
use crate::errors::{ActionError, ResponderError};
use crate::types::PublicKey;

// ============================================================================
// Wallet capability
// ============================================================================

/// The wallet's signing and identity capability.
///
/// The responder holds this behind an `Arc` and queries it on every
/// dispatch, so account switches and logins are visible immediately.
#[async_trait]
pub trait WalletAccount: Send + Sync {
    /// Key of the active account, `None` when logged out.
    fn public_key(&self) -> Option<PublicKey>;

    fn is_authenticated(&self) -> bool {
        self.public_key().is_some()
    }

    /// Ask the user whether `domain` may see the account key.
    async fn confirm_trust(&self, app: &str, domain: &str) -> Result<bool, ActionError>;

    async fn sign_message(&self, message: &[u8]) -> Result<[u8; 64], ActionError>;

    /// Fill the account's signature slot(s) and return the transaction.
    async fn sign_transaction(&self, transaction: Transaction) -> Result<Transaction, ActionError>;
}

// ============================================================================
// Outcomes and statistics
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponderOutcome {
    /// `WALLET_READY` sent back.
    HandshakeAcked,
    /// Not authenticated yet; the caller keeps polling.
    HandshakeDeferred,
    Responded { id: String, success: bool },
    /// Envelope's declared origin differs from the channel origin.
    OriginMismatch,
    /// `WALLET_READY` received by the wallet.
    UnexpectedToken,
}

#[derive(Debug, Default)]
pub struct ResponderStats {
    /// Channel messages or envelopes received
    pub received: AtomicU64,
    /// Successful responses produced
    pub succeeded: AtomicU64,
    /// Failure responses produced
    pub failed: AtomicU64,
    /// Handshakes answered with WALLET_READY
    pub handshakes_acked: AtomicU64,
    /// Handshakes left unanswered while logged out
    pub handshakes_deferred: AtomicU64,
    /// Messages dropped (origin mismatch, unexpected token)
    pub dropped: AtomicU64,
    /// Envelopes that failed to decode
    pub malformed: AtomicU64,
}

impl ResponderStats {
    pub fn snapshot(&self) -> ResponderStatsSnapshot {
        ResponderStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            handshakes_acked: self.handshakes_acked.load(Ordering::Relaxed),
            handshakes_deferred: self.handshakes_deferred.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }

    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponderStatsSnapshot {
    pub received: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub handshakes_acked: u64,
    pub handshakes_deferred: u64,
    pub dropped: u64,
    pub malformed: u64,
}

// ============================================================================
// Responder
// ============================================================================

pub struct Responder {
    account: Arc<dyn WalletAccount>,
    stats: Arc<ResponderStats>,
}

impl Responder {
    pub fn new(account: Arc<dyn WalletAccount>) -> Self {
        Self {
            account,
            stats: Arc::new(ResponderStats::default()),
        }
    }

    pub fn account(&self) -> &Arc<dyn WalletAccount> {
        &self.account
    }

    pub fn stats(&self) -> Arc<ResponderStats> {
        Arc::clone(&self.stats)
    }

    /// Dispatch one envelope. Never fails: every problem becomes a failure
    /// response carrying the request's id and type.
    pub async fn respond(&self, message: &Message) -> MessageResponse {
        ResponderStats::inc(&self.stats.received);
        let response = match &message.payload {
            Payload::TrustSite(p) => self.trust_site(&message.id, &message.origin, p).await,
            Payload::SignMessage(p) => self.sign_message(&message.id, p).await,
            Payload::SignTransaction(p) => self.sign_transaction(&message.id, p).await,
        };
        match response.error() {
            None => {
                ResponderStats::inc(&self.stats.succeeded);
                info!(id = %message.id, kind = %message.message_type(), origin = %message.origin, "request approved");
            }
            Some(error) => {
                ResponderStats::inc(&self.stats.failed);
                info!(id = %message.id, kind = %message.message_type(), %error, "request failed");
            }
        }
        response
    }

    /// Handle one message from the direct channel. `reply` posts back to the
    /// window the event came from.
    pub async fn handle_event(
        &self,
        event: &ChannelEvent,
        reply: &dyn MessagePort,
    ) -> Result<ResponderOutcome, ResponderError> {
        match ChannelFrame::classify(&event.data) {
            ChannelFrame::IsReady => {
                if self.account.is_authenticated() {
                    reply.post_message(WALLET_READY, &event.origin)?;
                    ResponderStats::inc(&self.stats.handshakes_acked);
                    Ok(ResponderOutcome::HandshakeAcked)
                } else {
                    ResponderStats::inc(&self.stats.handshakes_deferred);
                    debug!(origin = %event.origin, "handshake deferred until login");
                    Ok(ResponderOutcome::HandshakeDeferred)
                }
            }
            ChannelFrame::WalletReady => {
                ResponderStats::inc(&self.stats.dropped);
                Ok(ResponderOutcome::UnexpectedToken)
            }
            ChannelFrame::Envelope(text) => {
                let message = Message::deserialize(text).map_err(|err| {
                    ResponderStats::inc(&self.stats.malformed);
                    warn!(origin = %event.origin, error = %err, "undecodable envelope");
                    err
                })?;
                if message.origin != event.origin {
                    ResponderStats::inc(&self.stats.dropped);
                    debug!(
                        declared = %message.origin,
                        actual = %event.origin,
                        "dropping envelope with mismatched origin"
                    );
                    return Ok(ResponderOutcome::OriginMismatch);
                }
                let response = self.respond(&message).await;
                reply.post_message(&response.serialize(), &message.origin)?;
                Ok(ResponderOutcome::Responded {
                    id: response.id.clone(),
                    success: response.is_success(),
                })
            }
        }
    }

    /// Trust is always decided for the envelope's origin; a payload naming
    /// another domain is refused.
    async fn trust_site(&self, id: &str, origin: &str, request: &TrustSitePayload) -> MessageResponse {
        if request.domain != origin {
            warn!(%id, %origin, domain = %request.domain, "trust request names a foreign domain");
            return MessageResponse::failure(id, MessageType::TrustSite, "domain does not match origin");
        }
        let Some(key) = self.account.public_key() else {
            return MessageResponse::failure(id, MessageType::TrustSite, ActionError::NoAccount.to_string());
        };
        match self.account.confirm_trust(&request.app, origin).await {
            Ok(true) => MessageResponse::success(id, Payload::TrustSite(request.accepted(key.to_vec()))),
            Ok(false) => MessageResponse::failure(id, MessageType::TrustSite, "site not trusted"),
            Err(err) => MessageResponse::failure(id, MessageType::TrustSite, err.to_string()),
        }
    }

    async fn sign_message(&self, id: &str, request: &SignMessagePayload) -> MessageResponse {
        match self.account.sign_message(&request.message).await {
            Ok(signature) => MessageResponse::success(
                id,
                Payload::SignMessage(SignMessagePayload {
                    message: request.message.clone(),
                    signature: Some(signature.to_vec()),
                }),
            ),
            Err(err) => MessageResponse::failure(id, MessageType::SignMessage, err.to_string()),
        }
    }

    async fn sign_transaction(&self, id: &str, request: &SignTransactionPayload) -> MessageResponse {
        let transaction = match Transaction::from_bytes(&request.transaction, request.versioned) {
            Ok(tx) => tx,
            Err(err) => {
                return MessageResponse::failure(
                    id,
                    MessageType::SignTransaction,
                    format!("invalid transaction: {err}"),
                )
            }
        };
        match self.account.sign_transaction(transaction).await {
            Ok(signed) => MessageResponse::success(
                id,
                Payload::SignTransaction(SignTransactionPayload {
                    transaction: signed.to_bytes(),
                    versioned: signed.is_versioned(),
                    signatures: Some(signed.signatures().iter().map(|s| s.to_vec()).collect()),
                }),
            ),
            Err(err) => MessageResponse::failure(id, MessageType::SignTransaction, err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use wlk_proto::handshake::IS_READY;
    use wlk_proto::transaction::{compile_message, MessageHeader};

    use super::*;
    use crate::harness::{DecliningWallet, RecordingPort};
    use crate::wallet::LocalWallet;

    const APP: &str = "https://dapp.example";

    fn wallet() -> Arc<LocalWallet> {
        Arc::new(LocalWallet::from_seed([3u8; 32]).with_trust_all())
    }

    fn trust_request() -> Message {
        Message::new("t1", APP, Payload::TrustSite(TrustSitePayload::request("Swap", APP, None)))
    }

    #[tokio::test]
    async fn trust_site_returns_current_key() {
        let wallet = wallet();
        wallet.set_authenticated(true);
        let responder = Responder::new(wallet.clone());

        let response = responder.respond(&trust_request()).await;
        let Some(Payload::TrustSite(p)) = response.payload() else {
            panic!("expected trust site payload, got {response:?}");
        };
        assert_eq!(p.accept, Some(true));
        assert_eq!(p.pubkey.as_deref(), Some(wallet.key().as_bytes().as_slice()));
    }

    #[tokio::test]
    async fn trust_site_without_account_fails() {
        let responder = Responder::new(wallet());
        let response = responder.respond(&trust_request()).await;
        assert_eq!(response.error(), Some("no active account"));
        assert_eq!(response.id, "t1");
        assert_eq!(response.message_type, MessageType::TrustSite);
    }

    #[tokio::test]
    async fn untrusted_domain_fails() {
        let wallet = Arc::new(LocalWallet::from_seed([4u8; 32]));
        wallet.set_authenticated(true);
        wallet.trust_domain("https://other.example");
        let responder = Responder::new(wallet);
        let response = responder.respond(&trust_request()).await;
        assert_eq!(response.error(), Some("site not trusted"));
    }

    #[tokio::test]
    async fn trust_request_for_foreign_domain_is_refused() {
        let wallet = Arc::new(LocalWallet::from_seed([5u8; 32]));
        wallet.set_authenticated(true);
        wallet.trust_domain("https://good.example");
        let responder = Responder::new(wallet);
        let reply = RecordingPort::new();

        let spoofed = Message::new(
            "x",
            "https://evil.example",
            Payload::TrustSite(TrustSitePayload::request("Good", "https://good.example", None)),
        );
        let event = ChannelEvent::new("https://evil.example", spoofed.serialize());
        let outcome = responder.handle_event(&event, reply.as_ref()).await.unwrap();
        assert_eq!(outcome, ResponderOutcome::Responded { id: "x".into(), success: false });

        let posted = reply.posted();
        assert_eq!(posted.len(), 1);
        let response = MessageResponse::deserialize(&posted[0].0).unwrap();
        assert_eq!(response.error(), Some("domain does not match origin"));
        assert!(response.payload().is_none());
    }

    #[tokio::test]
    async fn declined_signature_carries_text() {
        let responder = Responder::new(Arc::new(DecliningWallet::new([1u8; 32])));
        let msg = Message::new("m1", APP, Payload::SignMessage(SignMessagePayload::request(b"x".to_vec())));
        let response = responder.respond(&msg).await;
        assert_eq!(response.error(), Some("declined"));
        assert_eq!(responder.stats().snapshot().failed, 1);
    }

    #[tokio::test]
    async fn undecodable_transaction_is_a_failure_response() {
        let wallet = wallet();
        wallet.set_authenticated(true);
        let responder = Responder::new(wallet);
        let msg = Message::new(
            "x1",
            APP,
            Payload::SignTransaction(SignTransactionPayload {
                transaction: vec![1, 2, 3],
                versioned: false,
                signatures: None,
            }),
        );
        let response = responder.respond(&msg).await;
        assert!(response.error().unwrap().starts_with("invalid transaction"));
    }

    #[tokio::test]
    async fn signs_transaction_slot() {
        let wallet = wallet();
        wallet.set_authenticated(true);
        let header = MessageHeader {
            num_required_signatures: 1,
            num_readonly_signed: 0,
            num_readonly_unsigned: 0,
        };
        let message = compile_message(true, header, &[*wallet.key().as_bytes()], [0u8; 32]);
        let tx = Transaction::new_unsigned(message, true).unwrap();

        let responder = Responder::new(wallet);
        let msg = Message::new(
            "x2",
            APP,
            Payload::SignTransaction(SignTransactionPayload {
                transaction: tx.to_bytes(),
                versioned: true,
                signatures: None,
            }),
        );
        let response = responder.respond(&msg).await;
        let Some(Payload::SignTransaction(p)) = response.payload() else {
            panic!("expected transaction payload, got {response:?}");
        };
        let signed = Transaction::from_bytes(&p.transaction, true).unwrap();
        assert!(signed.is_fully_signed());
        assert_eq!(p.signatures.as_ref().unwrap()[0], signed.signatures()[0].to_vec());
    }

    #[tokio::test]
    async fn handshake_only_when_authenticated() {
        let wallet = wallet();
        let responder = Responder::new(wallet.clone());
        let reply = RecordingPort::new();
        let event = ChannelEvent::new(APP, IS_READY);

        assert_eq!(
            responder.handle_event(&event, reply.as_ref()).await.unwrap(),
            ResponderOutcome::HandshakeDeferred
        );
        assert!(reply.posted().is_empty());

        wallet.set_authenticated(true);
        assert_eq!(
            responder.handle_event(&event, reply.as_ref()).await.unwrap(),
            ResponderOutcome::HandshakeAcked
        );
        assert_eq!(reply.posted(), vec![(WALLET_READY.to_string(), APP.to_string())]);
    }

    #[tokio::test]
    async fn envelope_with_mismatched_origin_is_dropped() {
        let wallet = wallet();
        wallet.set_authenticated(true);
        let responder = Responder::new(wallet);
        let reply = RecordingPort::new();

        let event = ChannelEvent::new("https://evil.example", trust_request().serialize());
        assert_eq!(
            responder.handle_event(&event, reply.as_ref()).await.unwrap(),
            ResponderOutcome::OriginMismatch
        );
        assert!(reply.posted().is_empty());
    }

    #[tokio::test]
    async fn response_goes_to_declared_origin() {
        let wallet = wallet();
        wallet.set_authenticated(true);
        let responder = Responder::new(wallet);
        let reply = RecordingPort::new();

        let event = ChannelEvent::new(APP, trust_request().serialize());
        let outcome = responder.handle_event(&event, reply.as_ref()).await.unwrap();
        assert_eq!(outcome, ResponderOutcome::Responded { id: "t1".into(), success: true });

        let posted = reply.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].1, APP);
        let response = MessageResponse::deserialize(&posted[0].0).unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn garbage_envelope_is_an_error() {
        let responder = Responder::new(wallet());
        let reply = RecordingPort::new();
        let err = responder
            .handle_event(&ChannelEvent::new(APP, "{]"), reply.as_ref())
            .await
            .unwrap_err();
        assert!(matches!(err, ResponderError::Decode(_)));
        assert_eq!(responder.stats().snapshot().malformed, 1);
    }
}
