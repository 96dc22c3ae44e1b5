//! Relay bridge: the wallet side of the poll-based transport.
//!
//! Used when the wallet surface was reached through a link rather than
//! opened by the dApp, so there is no window to post to. The bridge waits
//! for the user to log in, fetches the session's single envelope, answers it
//! through the [`Responder`] and acknowledges the response to the store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use wlk_proto::relay::{AckRequest, SessionData};

use crate::config::RelayConfig;
use crate::errors::RelayError;
use crate::responder::Responder;

/// Session store as seen by the wallet.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Take the session's envelope. Succeeds at most once per session.
    async fn fetch(&self, session: &str) -> Result<SessionData, RelayError>;

    /// Store the response; returns the store's acknowledgement text.
    async fn ack(&self, session: &str, ack: &AckRequest) -> Result<String, RelayError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReceipt {
    pub request_id: String,
    pub success: bool,
    pub ack: String,
}

pub struct RelayBridge {
    store: Arc<dyn SessionStore>,
    responder: Arc<Responder>,
    poll_interval: Duration,
    auth_timeout: Option<Duration>,
}

impl RelayBridge {
    pub fn new(store: Arc<dyn SessionStore>, responder: Arc<Responder>) -> Self {
        Self::from_config(store, responder, &RelayConfig::default())
    }

    pub fn from_config(store: Arc<dyn SessionStore>, responder: Arc<Responder>, config: &RelayConfig) -> Self {
        Self {
            store,
            responder,
            poll_interval: config.poll_interval(),
            auth_timeout: config.auth_timeout(),
        }
    }

    /// Serve one session end to end.
    pub async fn run(&self, session: &str) -> Result<RelayReceipt, RelayError> {
        match self.auth_timeout {
            Some(limit) => tokio::time::timeout(limit, self.wait_for_login())
                .await
                .map_err(|_| RelayError::NotAuthenticated)?,
            None => self.wait_for_login().await,
        }

        let data = self.store.fetch(session).await?;
        let message = data.to_message()?;
        debug!(%session, id = %message.id, kind = %message.message_type(), "relay envelope fetched");

        let response = self.responder.respond(&message).await;
        let ack = self.store.ack(session, &AckRequest::from_response(&response)).await?;
        info!(%session, id = %message.id, success = response.is_success(), "relay session answered");

        Ok(RelayReceipt {
            request_id: message.id,
            success: response.is_success(),
            ack,
        })
    }

    async fn wait_for_login(&self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.responder.account().is_authenticated() {
                return;
            }
        }
    }
}
