//! Take-once relay sessions.
//!
//! A session carries one request envelope from the dApp to the wallet and
//! one response back. The request can be fetched once, the response can be
//! acknowledged once, and the whole session is dropped when the initiator
//! collects the response or the TTL elapses.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use dashmap::{mapref::entry::Entry, DashMap};
use ed25519_dalek::{Signer, SigningKey};
use std::{sync::Arc, time::Duration};
use tokio::{sync::Notify, time::Instant};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SessionStoreError {
    #[error("session already exists")]
    AlreadyExists,
    #[error("session not found")]
    NotFound,
    #[error("session already consumed")]
    Consumed,
    #[error("session already acknowledged")]
    AlreadyAcked,
    #[error("payload too large")]
    TooLarge,
    #[error("data is not valid base64")]
    InvalidData,
}

pub struct Session {
    request: Option<String>,
    response: Option<String>,
    acked: bool,
    created: Instant,
    notify: Arc<Notify>,
}

impl Session {
    fn new(request: String) -> Self {
        Self {
            request: Some(request),
            response: None,
            acked: false,
            created: Instant::now(),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_fetched(&self) -> bool {
        self.request.is_none()
    }

    pub fn is_acked(&self) -> bool {
        self.acked
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }
}

pub struct SessionStore {
    sessions: DashMap<String, Session>,
    key: SigningKey,
    max_payload_size: usize,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(key: SigningKey, max_payload_size: usize, ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            key,
            max_payload_size,
            ttl,
        }
    }

    fn check_payload(&self, data: &str) -> Result<Vec<u8>, SessionStoreError> {
        let bytes = B64.decode(data).map_err(|_| SessionStoreError::InvalidData)?;
        if bytes.len() > self.max_payload_size {
            return Err(SessionStoreError::TooLarge);
        }
        Ok(bytes)
    }

    /// Store a request; the session id is the hex signature of its bytes.
    pub fn create(&self, data: &str) -> Result<String, SessionStoreError> {
        let bytes = self.check_payload(data)?;
        let id = hex::encode(self.key.sign(&bytes).to_bytes());

        match self.sessions.entry(id.clone()) {
            Entry::Occupied(_) => Err(SessionStoreError::AlreadyExists),
            Entry::Vacant(v) => {
                v.insert(Session::new(data.to_string()));
                Ok(id)
            }
        }
    }

    pub fn fetch(&self, id: &str) -> Result<String, SessionStoreError> {
        let mut session = self.sessions.get_mut(id).ok_or(SessionStoreError::NotFound)?;
        session.request.take().ok_or(SessionStoreError::Consumed)
    }

    pub fn ack(&self, id: &str, data: &str) -> Result<(), SessionStoreError> {
        self.check_payload(data)?;
        let mut session = self.sessions.get_mut(id).ok_or(SessionStoreError::NotFound)?;
        if session.acked {
            return Err(SessionStoreError::AlreadyAcked);
        }
        session.acked = true;
        session.response = Some(data.to_string());
        // Stores a permit if the initiator is not waiting yet
        session.notify.notify_one();
        Ok(())
    }

    /// Take the acknowledged response, removing the session.
    pub fn take_response(&self, id: &str) -> Result<Option<String>, SessionStoreError> {
        let response = {
            let mut session = self.sessions.get_mut(id).ok_or(SessionStoreError::NotFound)?;
            session.response.take()
        };
        if response.is_some() {
            self.sessions.remove(id);
        }
        Ok(response)
    }

    /// Wait up to `wait` for the response. `Ok(None)` when none arrived.
    pub async fn await_response(&self, id: &str, wait: Duration) -> Result<Option<String>, SessionStoreError> {
        let deadline = Instant::now() + wait;
        loop {
            let notify = {
                let session = self.sessions.get(id).ok_or(SessionStoreError::NotFound)?;
                Arc::clone(&session.notify)
            };
            // Register before checking so an eviction in between still wakes us
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(response) = self.take_response(id)? {
                return Ok(Some(response));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    /// Drop sessions older than the TTL. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let mut expired = Vec::new();
        self.sessions.retain(|_, session| {
            if session.age() >= self.ttl {
                expired.push(Arc::clone(&session.notify));
                false
            } else {
                true
            }
        });
        // Wake long-polls so they observe the removal
        for notify in &expired {
            notify.notify_waiters();
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
