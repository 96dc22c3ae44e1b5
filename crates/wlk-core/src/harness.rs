//! Test harness for WalletLink core.
//!
//! In-memory stand-ins for the environment: recording ports, a scripted
//! context opener, a linked pair of windows driven by a [`Responder`], and a
//! session store for the relay bridge.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use wlk_proto::handshake::ChannelFrame;
use wlk_proto::relay::{AckRequest, SessionData};
use wlk_proto::{Message, MessageResponse, Transaction};

use crate::channel::{ChannelEvent, ContextOpener, MessagePort};
use crate::client::{DropObserver, DropReason, RpcClient};
use crate::config::ClientConfig;
use crate::errors::{ActionError, ChannelError, ClientError, OpenError, RelayError};
use crate::relay::SessionStore;
use crate::responder::{Responder, WalletAccount};
use crate::types::PublicKey;

pub const TEST_APP_ORIGIN: &str = "https://dapp.example";
pub const TEST_WALLET_ORIGIN: &str = "https://wallet.example";

// ============================================================================
// Ports and openers
// ============================================================================

/// Port that records every post as `(data, target_origin)`.
#[derive(Default)]
pub struct RecordingPort {
    posted: Mutex<Vec<(String, String)>>,
    closed: AtomicBool,
}

impl RecordingPort {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn posted(&self) -> Vec<(String, String)> {
        self.posted.lock().clone()
    }

    /// Number of posts whose data equals `data`.
    pub fn count(&self, data: &str) -> usize {
        self.posted.lock().iter().filter(|(d, _)| d == data).count()
    }

    /// Posted request envelopes, skipping handshake tokens.
    pub fn envelopes(&self) -> Vec<Message> {
        self.posted
            .lock()
            .iter()
            .filter_map(|(d, _)| match ChannelFrame::classify(d) {
                ChannelFrame::Envelope(text) => Message::deserialize(text).ok(),
                _ => None,
            })
            .collect()
    }

    /// Subsequent posts fail with [`ChannelError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl MessagePort for RecordingPort {
    fn post_message(&self, data: &str, target_origin: &str) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        self.posted.lock().push((data.to_string(), target_origin.to_string()));
        Ok(())
    }
}

/// Opener that returns a fixed port, after failing with any queued errors.
pub struct ScriptedOpener {
    port: Arc<dyn MessagePort>,
    failures: Mutex<VecDeque<OpenError>>,
    opens: AtomicUsize,
}

impl ScriptedOpener {
    pub fn new(port: Arc<dyn MessagePort>) -> Self {
        Self {
            port,
            failures: Mutex::new(VecDeque::new()),
            opens: AtomicUsize::new(0),
        }
    }

    /// Queue a failure for the next open attempt.
    pub fn fail_next(&self, err: OpenError) {
        self.failures.lock().push_back(err);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl ContextOpener for ScriptedOpener {
    fn open(&self, _url: &str) -> Result<Arc<dyn MessagePort>, OpenError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(Arc::clone(&self.port)),
        }
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    drops: Mutex<Vec<(String, DropReason)>>,
}

impl RecordingObserver {
    pub fn reasons(&self) -> Vec<DropReason> {
        self.drops.lock().iter().map(|(_, r)| r.clone()).collect()
    }
}

impl DropObserver for RecordingObserver {
    fn on_drop(&self, origin: &str, reason: &DropReason) {
        self.drops.lock().push((origin.to_string(), reason.clone()));
    }
}

// ============================================================================
// Linked windows
// ============================================================================

/// Delivers posts to the receiving window only when the target origin
/// matches it, tagging them with the sender's origin.
struct WindowPort {
    deliver: mpsc::UnboundedSender<ChannelEvent>,
    receiver_origin: String,
    sender_origin: String,
}

impl MessagePort for WindowPort {
    fn post_message(&self, data: &str, target_origin: &str) -> Result<(), ChannelError> {
        if target_origin != self.receiver_origin && target_origin != "*" {
            debug!(target_origin, receiver = %self.receiver_origin, "post not delivered");
            return Ok(());
        }
        self.deliver
            .send(ChannelEvent::new(self.sender_origin.clone(), data))
            .map_err(|_| ChannelError::Closed)
    }
}

/// Opener that hands out the port into a linked wallet window.
pub struct LinkedOpener {
    port: Arc<WindowPort>,
    opens: AtomicUsize,
    failures: Mutex<VecDeque<OpenError>>,
}

impl LinkedOpener {
    pub fn fail_next(&self, err: OpenError) {
        self.failures.lock().push_back(err);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl ContextOpener for LinkedOpener {
    fn open(&self, _url: &str) -> Result<Arc<dyn MessagePort>, OpenError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        Ok(self.port.clone())
    }
}

/// Link a dApp window at `app_origin` with a wallet window at
/// `wallet_origin` served by `responder`.
///
/// Returns the opener for the dApp's client and the stream of events the
/// dApp window receives. Feed those to the client with [`pump_client`].
pub fn link_windows(
    app_origin: &str,
    wallet_origin: &str,
    responder: Arc<Responder>,
) -> (Arc<LinkedOpener>, mpsc::UnboundedReceiver<ChannelEvent>) {
    let (wallet_tx, mut wallet_rx) = mpsc::unbounded_channel();
    let (app_tx, app_rx) = mpsc::unbounded_channel();

    let into_wallet = Arc::new(WindowPort {
        deliver: wallet_tx,
        receiver_origin: wallet_origin.to_string(),
        sender_origin: app_origin.to_string(),
    });
    let into_app = WindowPort {
        deliver: app_tx,
        receiver_origin: app_origin.to_string(),
        sender_origin: wallet_origin.to_string(),
    };

    tokio::spawn(async move {
        while let Some(event) = wallet_rx.recv().await {
            if let Err(err) = responder.handle_event(&event, &into_app).await {
                debug!(error = %err, "wallet window failed to handle event");
            }
        }
    });

    let opener = Arc::new(LinkedOpener {
        port: into_wallet,
        opens: AtomicUsize::new(0),
        failures: Mutex::new(VecDeque::new()),
    });
    (opener, app_rx)
}

/// Feed every event the dApp window receives to `client`.
pub fn pump_client(client: Arc<RpcClient>, mut inbox: mpsc::UnboundedReceiver<ChannelEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = inbox.recv().await {
            if let Err(err) = client.handle_message(&event) {
                debug!(error = %err, "client rejected inbound message");
            }
        }
    })
}

/// Run a public key request from a fresh client against a linked wallet
/// window served by `account`.
pub async fn run_public_key_flow(account: Arc<dyn WalletAccount>) -> Result<PublicKey, ClientError> {
    let responder = Arc::new(Responder::new(account));
    let (opener, inbox) = link_windows(TEST_APP_ORIGIN, TEST_WALLET_ORIGIN, responder);
    let client = Arc::new(RpcClient::new(
        ClientConfig::new(TEST_WALLET_ORIGIN, TEST_APP_ORIGIN),
        opener,
    ));
    let pump = pump_client(client.clone(), inbox);
    let result = client.request_public_key().await;
    pump.abort();
    result
}

// ============================================================================
// Wallets
// ============================================================================

/// Logged-in wallet that refuses everything with `"declined"`.
pub struct DecliningWallet {
    key: PublicKey,
}

impl DecliningWallet {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key: PublicKey(key) }
    }
}

#[async_trait]
impl WalletAccount for DecliningWallet {
    fn public_key(&self) -> Option<PublicKey> {
        Some(self.key)
    }

    async fn confirm_trust(&self, _app: &str, _domain: &str) -> Result<bool, ActionError> {
        Err(ActionError::Declined("declined".into()))
    }

    async fn sign_message(&self, _message: &[u8]) -> Result<[u8; 64], ActionError> {
        Err(ActionError::Declined("declined".into()))
    }

    async fn sign_transaction(&self, _transaction: Transaction) -> Result<Transaction, ActionError> {
        Err(ActionError::Declined("declined".into()))
    }
}

// ============================================================================
// Session store
// ============================================================================

#[derive(Default)]
struct MemorySession {
    request: Option<SessionData>,
    fetches: usize,
    response: Option<AckRequest>,
}

/// Session store with the same take-once semantics as `wlk-rendezvous`.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, MemorySession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: &str, message: &Message) {
        self.sessions.lock().insert(
            session.to_string(),
            MemorySession {
                request: Some(SessionData::from_message(message)),
                ..MemorySession::default()
            },
        );
    }

    /// Successful fetches of `session`.
    pub fn fetch_count(&self, session: &str) -> usize {
        self.sessions.lock().get(session).map_or(0, |s| s.fetches)
    }

    pub fn response(&self, session: &str) -> Option<MessageResponse> {
        let sessions = self.sessions.lock();
        sessions.get(session)?.response.as_ref()?.to_response().ok()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn fetch(&self, session: &str) -> Result<SessionData, RelayError> {
        let mut sessions = self.sessions.lock();
        let entry = sessions
            .get_mut(session)
            .ok_or_else(|| RelayError::SessionNotFound(session.to_string()))?;
        let data = entry
            .request
            .take()
            .ok_or_else(|| RelayError::SessionConsumed(session.to_string()))?;
        entry.fetches += 1;
        Ok(data)
    }

    async fn ack(&self, session: &str, ack: &AckRequest) -> Result<String, RelayError> {
        let mut sessions = self.sessions.lock();
        let entry = sessions
            .get_mut(session)
            .ok_or_else(|| RelayError::SessionNotFound(session.to_string()))?;
        if entry.response.is_some() {
            return Err(RelayError::Store("session already acknowledged".into()));
        }
        entry.response = Some(ack.clone());
        Ok("ok".to_string())
    }
}
