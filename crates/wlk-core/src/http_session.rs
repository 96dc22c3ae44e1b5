#![cfg(feature = "http-relay")]

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;
use wlk_proto::relay::{AckRequest, CreatedSession, SessionData};
use wlk_proto::{DecodeError, Message, MessageResponse};

use crate::config::RelayConfig;
use crate::errors::RelayError;
use crate::relay::SessionStore;

/// Client for the `wlk-rendezvous` session store, usable from both ends of
/// the relay: the dApp creates sessions and awaits responses, the wallet
/// fetches and acknowledges them.
#[derive(Clone)]
pub struct HttpSessionClient {
    base_url: String,
    client: reqwest::Client,
    long_poll_wait: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum HttpSessionError {
    #[error("http error: {0}")]
    Http(String),
    #[error("bad response: {0}")]
    BadResponse(String),
    #[error("session not found")]
    NotFound,
    #[error("session already consumed")]
    Gone,
    #[error("session already exists")]
    Conflict,
    #[error("timed out waiting for response")]
    Timeout,
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl HttpSessionClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, HttpSessionError> {
        Self::from_config(&RelayConfig::new(base_url))
    }

    pub fn from_config(config: &RelayConfig) -> Result<Self, HttpSessionError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|e| HttpSessionError::Http(e.to_string()))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            long_poll_wait: Duration::from_millis(config.long_poll_wait_ms),
        })
    }

    fn session_url(&self, session: &str) -> String {
        format!("{}/sessions/{}", self.base_url, session)
    }

    async fn bad_response(resp: reqwest::Response) -> HttpSessionError {
        match resp.status() {
            StatusCode::NOT_FOUND => HttpSessionError::NotFound,
            StatusCode::GONE => HttpSessionError::Gone,
            StatusCode::CONFLICT => HttpSessionError::Conflict,
            status => HttpSessionError::BadResponse(format!(
                "status={} body={:?}",
                status,
                resp.text().await.ok()
            )),
        }
    }

    async fn json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, HttpSessionError> {
        let body = resp.bytes().await.map_err(|e| HttpSessionError::Http(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| HttpSessionError::BadResponse(e.to_string()))
    }

    /// POST a request envelope; returns the new session id.
    pub async fn create_session(&self, message: &Message) -> Result<String, HttpSessionError> {
        let body = serde_json::to_vec(&SessionData::from_message(message))
            .map_err(|e| HttpSessionError::BadResponse(e.to_string()))?;
        let resp = self
            .client
            .post(format!("{}/sessions", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| HttpSessionError::Http(e.to_string()))?;

        if resp.status() != StatusCode::OK {
            return Err(Self::bad_response(resp).await);
        }
        let created: CreatedSession = Self::json(resp).await?;
        debug!(session = %created.session, id = %message.id, "relay session created");
        Ok(created.session)
    }

    /// GET the session's envelope. The store hands it out only once.
    pub async fn fetch_session(&self, session: &str) -> Result<SessionData, HttpSessionError> {
        let resp = self
            .client
            .get(self.session_url(session))
            .send()
            .await
            .map_err(|e| HttpSessionError::Http(e.to_string()))?;
        match resp.status() {
            StatusCode::OK => Self::json(resp).await,
            _ => Err(Self::bad_response(resp).await),
        }
    }

    pub async fn ack_session(&self, session: &str, ack: &AckRequest) -> Result<String, HttpSessionError> {
        let body = serde_json::to_vec(ack).map_err(|e| HttpSessionError::BadResponse(e.to_string()))?;
        let resp = self
            .client
            .post(format!("{}/ack", self.session_url(session)))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| HttpSessionError::Http(e.to_string()))?;
        match resp.status() {
            StatusCode::OK => resp.text().await.map_err(|e| HttpSessionError::Http(e.to_string())),
            _ => Err(Self::bad_response(resp).await),
        }
    }

    /// Long-poll once for the acknowledged response. `None` on 204.
    pub async fn poll_response(
        &self,
        session: &str,
        wait_ms: u64,
    ) -> Result<Option<MessageResponse>, HttpSessionError> {
        let url = format!("{}/response?wait_ms={}", self.session_url(session), wait_ms);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HttpSessionError::Http(e.to_string()))?;
        match resp.status() {
            StatusCode::OK => {
                let ack: AckRequest = Self::json(resp).await?;
                Ok(Some(ack.to_response()?))
            }
            StatusCode::NO_CONTENT => Ok(None),
            _ => Err(Self::bad_response(resp).await),
        }
    }

    /// Long-poll until the wallet acknowledges or `timeout` elapses.
    pub async fn await_response(
        &self,
        session: &str,
        timeout: Duration,
    ) -> Result<MessageResponse, HttpSessionError> {
        let started = Instant::now();
        loop {
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(HttpSessionError::Timeout);
            }
            let wait = remaining.min(self.long_poll_wait);
            if let Some(response) = self.poll_response(session, wait.as_millis() as u64).await? {
                return Ok(response);
            }
        }
    }

    pub async fn health(&self) -> bool {
        match self.client.get(format!("{}/health", self.base_url)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

impl From<HttpSessionError> for RelayError {
    fn from(err: HttpSessionError) -> Self {
        match err {
            HttpSessionError::Decode(e) => RelayError::Decode(e),
            other => RelayError::Store(other.to_string()),
        }
    }
}

#[async_trait]
impl SessionStore for HttpSessionClient {
    async fn fetch(&self, session: &str) -> Result<SessionData, RelayError> {
        self.fetch_session(session).await.map_err(|e| match e {
            HttpSessionError::NotFound => RelayError::SessionNotFound(session.to_string()),
            HttpSessionError::Gone => RelayError::SessionConsumed(session.to_string()),
            other => other.into(),
        })
    }

    async fn ack(&self, session: &str, ack: &AckRequest) -> Result<String, RelayError> {
        self.ack_session(session, ack).await.map_err(|e| match e {
            HttpSessionError::NotFound => RelayError::SessionNotFound(session.to_string()),
            other => other.into(),
        })
    }
}
