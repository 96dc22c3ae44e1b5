use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::api::{self, AppState};
use crate::config::ServerConfig;
use crate::metrics::SessionMetrics;
use crate::session::SessionStore;

pub struct RendezvousServer {
    config: ServerConfig,
    store: Arc<SessionStore>,
    metrics: Arc<SessionMetrics>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

/// Routes of the session store, relative to the server root.
pub fn router(state: AppState) -> Router {
    let sessions = Router::new()
        .route("/sessions", post(api::create_session))
        .route("/sessions/:session", get(api::get_session))
        .route("/sessions/:session/ack", post(api::ack_session))
        .route("/sessions/:session/response", get(api::get_response))
        .route("/health", get(api::get_health));

    Router::new()
        .nest("/wallet/v1", sessions)
        .route("/health", get(api::get_health))
        .route("/metrics", get(api::get_metrics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl RendezvousServer {
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let store = Arc::new(SessionStore::new(
            config.signing_key()?,
            config.max_payload_size,
            config.session_ttl(),
        ));
        let metrics = Arc::new(SessionMetrics::new()?);
        let (shutdown_tx, _) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        Ok(Self {
            config,
            store,
            metrics,
            shutdown_tx,
        })
    }

    pub fn state(&self) -> AppState {
        AppState {
            store: Arc::clone(&self.store),
            metrics: Arc::clone(&self.metrics),
            shutdown: self.shutdown_tx.subscribe(),
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        // Start eviction task
        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(Self::eviction_task(
            store,
            self.config.clone(),
            metrics,
            shutdown_rx,
        ));

        let app = router(self.state());

        let shutdown_rx = self.shutdown_tx.subscribe();
        let shutdown_tx = Arc::clone(&self.shutdown_tx);
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        info!("wlk-rendezvous listening on {} (HTTP)", self.config.bind_addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                Self::shutdown_signal(shutdown_rx).await;
                // Release pending long-polls so connections can drain
                shutdown_tx.send_replace(true);
            })
            .await?;

        Ok(())
    }

    async fn eviction_task(
        store: Arc<SessionStore>,
        config: ServerConfig,
        metrics: Arc<SessionMetrics>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(config.eviction_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let evicted = store.evict_expired();
                    if evicted > 0 {
                        metrics.sessions_expired.inc_by(evicted as f64);
                        info!("Evicted {} expired sessions", evicted);
                    }
                    metrics.active_sessions.set(store.len() as f64);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn shutdown_signal(mut shutdown: watch::Receiver<bool>) {
        #[cfg(unix)]
        let mut sigterm = {
            use tokio::signal::unix::{signal, SignalKind};
            signal(SignalKind::terminate()).ok()
        };

        tokio::select! {
            _ = async {
                #[cfg(unix)]
                {
                    match sigterm {
                        Some(ref mut sigterm) => { sigterm.recv().await; }
                        None => std::future::pending::<()>().await,
                    }
                }
                #[cfg(not(unix))]
                {
                    std::future::pending::<()>().await;
                }
            } => {
                info!("Received SIGTERM, starting graceful shutdown");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, starting graceful shutdown");
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Shutdown requested");
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
    };
    use tower::ServiceExt;
    use wlk_proto::relay::{encode_blob, AckRequest, CreatedSession, SessionData};

    fn server() -> RendezvousServer {
        RendezvousServer::new(ServerConfig {
            max_payload_size: 256,
            session_key_hex: Some("01".repeat(32)),
            ..ServerConfig::default()
        })
        .unwrap()
    }

    fn post_json(uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(resp: Response) -> T {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn create(app: &Router, text: &str) -> Response {
        let body = serde_json::to_string(&SessionData { data: encode_blob(text) }).unwrap();
        app.clone()
            .oneshot(post_json("/wallet/v1/sessions", body))
            .await
            .unwrap()
    }

    async fn ack(app: &Router, session: &str, text: &str) -> Response {
        let body = serde_json::to_string(&AckRequest { data: encode_blob(text) }).unwrap();
        app.clone()
            .oneshot(post_json(&format!("/wallet/v1/sessions/{session}/ack"), body))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn session_round_trip() {
        let server = server();
        let app = router(server.state());

        let resp = create(&app, r#"{"id":"1"}"#).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let CreatedSession { session } = body_json(resp).await;

        let resp = app
            .clone()
            .oneshot(get(&format!("/wallet/v1/sessions/{session}")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let data: SessionData = body_json(resp).await;
        assert_eq!(data.data, encode_blob(r#"{"id":"1"}"#));

        let resp = app
            .clone()
            .oneshot(get(&format!("/wallet/v1/sessions/{session}")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::GONE);

        let resp = ack(&app, &session, r#"{"id":"1","success":true}"#).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let text = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&text[..], b"ok");

        let resp = app
            .clone()
            .oneshot(get(&format!("/wallet/v1/sessions/{session}/response?wait_ms=0")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let ack: AckRequest = body_json(resp).await;
        assert_eq!(ack.data, encode_blob(r#"{"id":"1","success":true}"#));
        assert!(server.store().is_empty());
    }

    #[tokio::test]
    async fn duplicate_session_conflicts() {
        let app = router(server().state());
        assert_eq!(create(&app, "same").await.status(), StatusCode::OK);
        assert_eq!(create(&app, "same").await.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let app = router(server().state());
        let resp = app.clone().oneshot(get("/wallet/v1/sessions/abcd")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(ack(&app, "abcd", "late").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn second_ack_is_not_found() {
        let app = router(server().state());
        let CreatedSession { session } = body_json(create(&app, "req").await).await;
        assert_eq!(ack(&app, &session, "one").await.status(), StatusCode::OK);
        assert_eq!(ack(&app, &session, "two").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn oversize_payload_is_rejected() {
        let app = router(server().state());
        let resp = create(&app, &"x".repeat(300)).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let app = router(server().state());
        let resp = app
            .clone()
            .oneshot(post_json("/wallet/v1/sessions", "{\"nope\":1}".into()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_returns_no_content_then_response() {
        let server = server();
        let app = router(server.state());
        let CreatedSession { session } = body_json(create(&app, "req").await).await;

        let resp = app
            .clone()
            .oneshot(get(&format!("/wallet/v1/sessions/{session}/response?wait_ms=100")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let poll = {
            let app = app.clone();
            let uri = format!("/wallet/v1/sessions/{session}/response?wait_ms=600000");
            tokio::spawn(async move { app.oneshot(get(&uri)).await.unwrap() })
        };
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert_eq!(ack(&app, &session, "answer").await.status(), StatusCode::OK);

        let resp = poll.await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let ack: AckRequest = body_json(resp).await;
        assert_eq!(ack.data, encode_blob("answer"));
    }

    #[tokio::test]
    async fn shutdown_rejects_long_poll() {
        let server = server();
        let app = router(server.state());
        let CreatedSession { session } = body_json(create(&app, "req").await).await;
        server.shutdown();

        let resp = app
            .oneshot(get(&format!("/wallet/v1/sessions/{session}/response")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_and_metrics() {
        let server = server();
        let app = router(server.state());
        create(&app, "req").await;

        let resp = app.clone().oneshot(get("/wallet/v1/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let health: serde_json::Value = body_json(resp).await;
        assert_eq!(health["sessions"], 1);

        let resp = app.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let text = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(text.to_vec()).unwrap();
        assert!(text.contains("wlk_rendezvous_sessions_created_total 1"));
    }
}
