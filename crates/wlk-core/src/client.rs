//! Caller side of the cross-context RPC.
//!
//! The client owns at most one outstanding request. A request opens the
//! wallet's child context, repeats the `IS_READY` handshake until the wallet
//! answers `WALLET_READY`, posts the envelope once and settles the caller's
//! future with the correlated response.
//!
//! ```text
//!            open ok                  WALLET_READY              response
//!   Idle ──────────────▶ Dispatching ─────────────▶ Awaiting ─────────────▶ Idle
//!     │                      ▲                        Response
//!     │ open blocked         │ retry_operation()
//!     └──────────────▶ RetryPending ── cancel_operation() ──▶ Idle
//! ```
//!
//! Every check-then-register and every settlement happens under a single
//! lock, so a response racing a new registration can never be applied to
//! the wrong request.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use wlk_proto::handshake::{ChannelFrame, IS_READY};
use wlk_proto::validation::{validate_signature, validate_signature_list};
use wlk_proto::{
    Message, Payload, ResponseFrame, ResponseOutcome, SignMessagePayload, SignTransactionPayload,
    Transaction, TrustSitePayload,
};

use crate::channel::{ChannelEvent, ContextOpener, MessagePort};
use crate::config::ClientConfig;
use crate::errors::{ChannelError, ClientError, OpenError};
use crate::types::{new_request_id, PublicKey, RequestKind};

// ============================================================================
// Public state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    /// Child context open, handshake in progress.
    Dispatching,
    /// Envelope posted, waiting for the correlated response.
    AwaitingResponse,
    /// The environment blocked the child context; waiting for an explicit
    /// retry or cancel.
    RetryPending(RequestKind),
}

/// What [`RpcClient::handle_message`] did with an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// `WALLET_READY` accepted and the envelope posted.
    HandshakeComplete,
    /// A pending request was settled (resolved or rejected).
    Settled { id: String },
    Dropped(DropReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Sender origin is not the configured wallet origin.
    ForeignOrigin,
    /// `IS_READY` echoed back at the caller.
    UnexpectedToken,
    /// No request is registered under this id.
    UnmatchedId(String),
    /// Valid message for a state the client is not in.
    UnexpectedState,
}

/// Diagnostics hook for silently dropped messages.
pub trait DropObserver: Send + Sync {
    fn on_drop(&self, origin: &str, reason: &DropReason);
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
pub struct ClientStats {
    /// Inbound channel messages seen
    pub received: AtomicU64,
    /// Handshakes completed
    pub handshakes: AtomicU64,
    /// Requests resolved with a value
    pub resolved: AtomicU64,
    /// Requests rejected (wallet failure, timeout, cancel, open failure)
    pub rejected: AtomicU64,
    /// Messages dropped for any reason
    pub dropped: AtomicU64,
    /// Messages dropped because of their origin
    pub foreign_origin: AtomicU64,
    /// Responses dropped because their id matched nothing
    pub unmatched: AtomicU64,
    /// Frames that could not be parsed
    pub malformed: AtomicU64,
}

impl ClientStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ClientStatsSnapshot {
        ClientStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            handshakes: self.handshakes.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            foreign_origin: self.foreign_origin.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.received.store(0, Ordering::Relaxed);
        self.handshakes.store(0, Ordering::Relaxed);
        self.resolved.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.foreign_origin.store(0, Ordering::Relaxed);
        self.unmatched.store(0, Ordering::Relaxed);
        self.malformed.store(0, Ordering::Relaxed);
    }

    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_dropped(&self, reason: &DropReason) {
        Self::inc(&self.dropped);
        match reason {
            DropReason::ForeignOrigin => Self::inc(&self.foreign_origin),
            DropReason::UnmatchedId(_) => Self::inc(&self.unmatched),
            DropReason::UnexpectedToken | DropReason::UnexpectedState => {}
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStatsSnapshot {
    pub received: u64,
    pub handshakes: u64,
    pub resolved: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub foreign_origin: u64,
    pub unmatched: u64,
    pub malformed: u64,
}

// ============================================================================
// Response future
// ============================================================================

#[derive(Debug)]
enum Reply {
    PublicKey(PublicKey),
    Signature([u8; 64]),
    Transaction(Transaction),
}

type Settlement = Result<Reply, ClientError>;

/// Settles exactly once with the wallet's answer or a rejection.
///
/// Registration happens when the request method is called, not when this
/// future is first polled.
pub struct ResponseFuture<T> {
    rx: oneshot::Receiver<Settlement>,
    extract: fn(Reply) -> Option<T>,
}

impl<T> Future for ResponseFuture<T> {
    type Output = Result<T, ClientError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Ok(reply))) => {
                // resolve() only produces the reply kind matching the request
                Poll::Ready((this.extract)(reply).ok_or(ClientError::NoHandler))
            }
            Poll::Ready(Ok(Err(err))) => Poll::Ready(Err(err)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ClientError::Dropped)),
        }
    }
}

// ============================================================================
// Internal state
// ============================================================================

struct PendingCall {
    kind: RequestKind,
    tx: oneshot::Sender<Settlement>,
}

struct ClientInner {
    state: ClientState,
    /// Envelope not yet posted. Cleared on handshake, the handler stays.
    outgoing: Option<Message>,
    handlers: HashMap<String, PendingCall>,
    port: Option<Arc<dyn MessagePort>>,
    ticker: Option<JoinHandle<()>>,
    deadline: Option<JoinHandle<()>>,
}

impl ClientInner {
    fn new() -> Self {
        Self {
            state: ClientState::Idle,
            outgoing: None,
            handlers: HashMap::new(),
            port: None,
            ticker: None,
            deadline: None,
        }
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    fn stop_deadline(&mut self) {
        if let Some(deadline) = self.deadline.take() {
            deadline.abort();
        }
    }

    /// Back to Idle. Callers remove the settled handler themselves.
    fn reset(&mut self) {
        self.stop_ticker();
        self.stop_deadline();
        self.state = ClientState::Idle;
        self.outgoing = None;
        self.port = None;
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.stop_ticker();
        self.stop_deadline();
    }
}

// ============================================================================
// Client
// ============================================================================

/// Caller side of the RPC. Must be used from within a tokio runtime.
pub struct RpcClient {
    config: ClientConfig,
    opener: Arc<dyn ContextOpener>,
    inner: Arc<Mutex<ClientInner>>,
    stats: Arc<ClientStats>,
    observer: Option<Arc<dyn DropObserver>>,
}

impl RpcClient {
    pub fn new(config: ClientConfig, opener: Arc<dyn ContextOpener>) -> Self {
        Self {
            config,
            opener,
            inner: Arc::new(Mutex::new(ClientInner::new())),
            stats: Arc::new(ClientStats::new()),
            observer: None,
        }
    }

    pub fn with_drop_observer(mut self, observer: Arc<dyn DropObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<ClientStats> {
        Arc::clone(&self.stats)
    }

    pub fn state(&self) -> ClientState {
        self.inner.lock().state
    }

    /// Kind of the request waiting in RetryPending, if any.
    pub fn retry_kind(&self) -> Option<RequestKind> {
        match self.inner.lock().state {
            ClientState::RetryPending(kind) => Some(kind),
            _ => None,
        }
    }

    /// Id of the request currently registered, if any.
    pub fn pending_request_id(&self) -> Option<String> {
        self.inner.lock().handlers.keys().next().cloned()
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    pub fn request_public_key(&self) -> ResponseFuture<PublicKey> {
        let payload = TrustSitePayload::request(
            self.config.app_name.clone(),
            self.config.app_origin.clone(),
            self.config.app_icon.clone(),
        );
        self.submit(Payload::TrustSite(payload), |reply| match reply {
            Reply::PublicKey(key) => Some(key),
            _ => None,
        })
    }

    pub fn request_sign_message(&self, message: impl Into<Vec<u8>>) -> ResponseFuture<[u8; 64]> {
        let payload = SignMessagePayload::request(message.into());
        self.submit(Payload::SignMessage(payload), |reply| match reply {
            Reply::Signature(sig) => Some(sig),
            _ => None,
        })
    }

    pub fn request_sign_transaction(&self, transaction: &Transaction) -> ResponseFuture<Transaction> {
        let payload = SignTransactionPayload {
            transaction: transaction.to_bytes(),
            versioned: transaction.is_versioned(),
            signatures: None,
        };
        self.submit(Payload::SignTransaction(payload), |reply| match reply {
            Reply::Transaction(tx) => Some(tx),
            _ => None,
        })
    }

    fn submit<T>(&self, payload: Payload, extract: fn(Reply) -> Option<T>) -> ResponseFuture<T> {
        let (tx, rx) = oneshot::channel();
        let future = ResponseFuture { rx, extract };

        let mut inner = self.inner.lock();
        if inner.state != ClientState::Idle {
            debug!(state = ?inner.state, "request rejected, another is pending");
            let _ = tx.send(Err(ClientError::Busy));
            return future;
        }

        let message = Message::new(new_request_id(), self.config.app_origin.clone(), payload);
        let kind = RequestKind::from(message.message_type());
        let id = message.id.clone();
        inner.handlers.insert(id.clone(), PendingCall { kind, tx });
        inner.outgoing = Some(message);

        match self.open_context(&mut inner, &id) {
            Ok(()) => debug!(%id, %kind, "child context opened"),
            Err(OpenError::Blocked) => {
                info!(%id, %kind, "child context blocked, waiting for retry");
                inner.state = ClientState::RetryPending(kind);
            }
            Err(err) => {
                warn!(%id, %kind, error = %err, "failed to open child context");
                self.fail_locked(&mut inner, &id, err.into());
            }
        }
        future
    }

    // ------------------------------------------------------------------------
    // Retry
    // ------------------------------------------------------------------------

    /// Re-open the child context for the request waiting in RetryPending.
    /// An open failure rejects that request; it does not make this call fail.
    pub fn retry_operation(&self) -> Result<(), ClientError> {
        let mut inner = self.inner.lock();
        let ClientState::RetryPending(kind) = inner.state else {
            return Err(ClientError::NoPendingRetry);
        };
        let id = inner
            .outgoing
            .as_ref()
            .map(|m| m.id.clone())
            .ok_or(ClientError::NoPendingMessage)?;
        if !inner.handlers.contains_key(&id) {
            return Err(ClientError::NoHandler);
        }

        match self.open_context(&mut inner, &id) {
            Ok(()) => info!(%id, %kind, "retry opened child context"),
            Err(err) => {
                warn!(%id, %kind, error = %err, "retry failed to open child context");
                self.fail_locked(&mut inner, &id, err.into());
            }
        }
        Ok(())
    }

    /// Reject the request waiting in RetryPending with `Cancelled`.
    pub fn cancel_operation(&self) -> Result<(), ClientError> {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, ClientState::RetryPending(_)) {
            return Err(ClientError::NoPendingRetry);
        }
        let id = inner
            .outgoing
            .as_ref()
            .map(|m| m.id.clone())
            .ok_or(ClientError::NoPendingMessage)?;
        info!(%id, "operation cancelled");
        self.fail_locked(&mut inner, &id, ClientError::Cancelled);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    /// Process one inbound channel message. Foreign-origin and unmatched
    /// messages are dropped without touching state; an unparseable frame
    /// from the wallet origin is returned as an error, also without
    /// touching state.
    pub fn handle_message(&self, event: &ChannelEvent) -> Result<Delivery, ClientError> {
        ClientStats::inc(&self.stats.received);
        if event.origin != self.config.wallet_origin {
            return Ok(self.dropped(event, DropReason::ForeignOrigin));
        }
        match ChannelFrame::classify(&event.data) {
            ChannelFrame::WalletReady => self.on_wallet_ready(event),
            ChannelFrame::IsReady => Ok(self.dropped(event, DropReason::UnexpectedToken)),
            ChannelFrame::Envelope(text) => self.on_response(event, text),
        }
    }

    fn on_wallet_ready(&self, event: &ChannelEvent) -> Result<Delivery, ClientError> {
        let (id, port, text) = {
            let mut inner = self.inner.lock();
            if inner.state != ClientState::Dispatching {
                drop(inner);
                return Ok(self.dropped(event, DropReason::UnexpectedState));
            }
            let Some(message) = inner.outgoing.as_ref() else {
                return Err(ClientError::NoPendingMessage);
            };
            if !inner.handlers.contains_key(&message.id) {
                return Err(ClientError::NoHandler);
            }
            let port = inner.port.clone().ok_or(ClientError::Channel(ChannelError::Closed))?;
            let id = message.id.clone();
            let text = message.serialize();

            inner.outgoing = None;
            inner.stop_ticker();
            inner.state = ClientState::AwaitingResponse;
            (id, port, text)
        };

        ClientStats::inc(&self.stats.handshakes);
        debug!(%id, "handshake complete, posting envelope");

        if let Err(err) = port.post_message(&text, &self.config.wallet_origin) {
            warn!(%id, error = %err, "failed to post envelope");
            let mut inner = self.inner.lock();
            self.fail_locked(&mut inner, &id, err.clone().into());
            return Err(err.into());
        }
        Ok(Delivery::HandshakeComplete)
    }

    fn on_response(&self, event: &ChannelEvent, text: &str) -> Result<Delivery, ClientError> {
        let frame = match ResponseFrame::parse(text) {
            Ok(frame) => frame,
            Err(err) => {
                ClientStats::inc(&self.stats.malformed);
                warn!(error = %err, "malformed response frame");
                return Err(err.into());
            }
        };

        let call = {
            let mut inner = self.inner.lock();
            if !inner.handlers.contains_key(&frame.id) {
                drop(inner);
                return Ok(self.dropped(event, DropReason::UnmatchedId(frame.id)));
            }
            if inner.state != ClientState::AwaitingResponse {
                drop(inner);
                return Ok(self.dropped(event, DropReason::UnexpectedState));
            }
            let Some(call) = inner.handlers.remove(&frame.id) else {
                return Err(ClientError::NoHandler);
            };
            inner.reset();
            call
        };

        let id = frame.id.clone();
        let result = resolve(call.kind, frame);
        match &result {
            Ok(_) => {
                ClientStats::inc(&self.stats.resolved);
                info!(%id, kind = %call.kind, "request resolved");
            }
            Err(err) => {
                ClientStats::inc(&self.stats.rejected);
                info!(%id, kind = %call.kind, error = %err, "request rejected");
            }
        }
        let _ = call.tx.send(result);
        Ok(Delivery::Settled { id })
    }

    fn dropped(&self, event: &ChannelEvent, reason: DropReason) -> Delivery {
        debug!(origin = %event.origin, ?reason, "dropping channel message");
        self.stats.inc_dropped(&reason);
        if let Some(observer) = &self.observer {
            observer.on_drop(&event.origin, &reason);
        }
        Delivery::Dropped(reason)
    }

    // ------------------------------------------------------------------------
    // Helpers (called with the lock held)
    // ------------------------------------------------------------------------

    fn open_context(&self, inner: &mut ClientInner, id: &str) -> Result<(), OpenError> {
        let port = self.opener.open(self.config.wallet_url())?;
        inner.port = Some(Arc::clone(&port));
        inner.state = ClientState::Dispatching;
        inner.stop_ticker();
        inner.ticker = Some(spawn_handshake(
            port,
            self.config.wallet_origin.clone(),
            self.config.handshake_interval(),
            Arc::downgrade(&self.inner),
        ));
        inner.stop_deadline();
        if let Some(timeout) = self.config.response_timeout() {
            inner.deadline = Some(spawn_deadline(
                Arc::downgrade(&self.inner),
                Arc::clone(&self.stats),
                id.to_string(),
                timeout,
            ));
        }
        Ok(())
    }

    fn fail_locked(&self, inner: &mut ClientInner, id: &str, err: ClientError) {
        if let Some(call) = inner.handlers.remove(id) {
            ClientStats::inc(&self.stats.rejected);
            let _ = call.tx.send(Err(err));
        }
        inner.reset();
    }
}

/// Posts `IS_READY` every `period` while the client is Dispatching.
fn spawn_handshake(
    port: Arc<dyn MessagePort>,
    target_origin: String,
    period: Duration,
    inner: Weak<Mutex<ClientInner>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else { break };
            if inner.lock().state != ClientState::Dispatching {
                break;
            }
            drop(inner);
            if let Err(err) = port.post_message(IS_READY, &target_origin) {
                debug!(error = %err, "handshake post failed");
            }
        }
    })
}

/// Rejects request `id` with `Timeout` if it is still registered after
/// `timeout`.
fn spawn_deadline(
    inner: Weak<Mutex<ClientInner>>,
    stats: Arc<ClientStats>,
    id: String,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let Some(shared) = inner.upgrade() else { return };
        let mut inner = shared.lock();
        if let Some(call) = inner.handlers.remove(&id) {
            warn!(%id, "request timed out");
            // this task; nothing left to abort
            inner.deadline = None;
            inner.reset();
            ClientStats::inc(&stats.rejected);
            let _ = call.tx.send(Err(ClientError::Timeout));
        }
    })
}

/// Turn a correlated response frame into the caller's value.
fn resolve(kind: RequestKind, frame: ResponseFrame) -> Settlement {
    if frame.message_type != kind.message_type() {
        return Err(ClientError::TypeMismatch {
            expected: kind.message_type(),
            actual: frame.message_type,
        });
    }
    let response = frame.decode()?;
    match response.outcome {
        ResponseOutcome::Failure(error) => Err(ClientError::Rejected(error)),
        ResponseOutcome::Success(Payload::TrustSite(p)) => {
            if p.accept == Some(false) {
                return Err(ClientError::Rejected("site not trusted".to_string()));
            }
            let key = p.pubkey.ok_or(ClientError::MissingField("pubkey"))?;
            Ok(Reply::PublicKey(PublicKey::from_slice(&key)?))
        }
        ResponseOutcome::Success(Payload::SignMessage(p)) => {
            let sig = p.signature.ok_or(ClientError::MissingField("signature"))?;
            Ok(Reply::Signature(validate_signature(&sig)?))
        }
        ResponseOutcome::Success(Payload::SignTransaction(p)) => {
            if p.transaction.is_empty() {
                return Err(ClientError::MissingField("transaction"));
            }
            let tx = Transaction::from_bytes(&p.transaction, p.versioned)?;
            validate_signature_list(&p, &tx)?;
            Ok(Reply::Transaction(tx))
        }
    }
}
