use prometheus::{
    register_counter_with_registry, register_gauge_with_registry, register_histogram_with_registry,
    Counter, Gauge, Histogram, Registry,
};
use std::sync::Arc;

pub struct SessionMetrics {
    pub active_sessions: Gauge,
    pub sessions_created: Counter,
    pub sessions_fetched: Counter,
    pub sessions_acked: Counter,
    pub sessions_expired: Counter,
    pub request_latency: Histogram,
    pub error_counts: Counter,
    pub registry: Arc<Registry>,
}

impl SessionMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Arc::new(Registry::new());

        let active_sessions = register_gauge_with_registry!(
            "wlk_rendezvous_active_sessions",
            "Number of sessions held by the store",
            registry
        )?;

        let sessions_created = register_counter_with_registry!(
            "wlk_rendezvous_sessions_created_total",
            "Total number of sessions created",
            registry
        )?;

        let sessions_fetched = register_counter_with_registry!(
            "wlk_rendezvous_sessions_fetched_total",
            "Total number of session requests handed to a wallet",
            registry
        )?;

        let sessions_acked = register_counter_with_registry!(
            "wlk_rendezvous_sessions_acked_total",
            "Total number of sessions acknowledged",
            registry
        )?;

        let sessions_expired = register_counter_with_registry!(
            "wlk_rendezvous_sessions_expired_total",
            "Total number of sessions evicted after their TTL",
            registry
        )?;

        let request_latency = register_histogram_with_registry!(
            "wlk_rendezvous_request_latency_seconds",
            "Request latency in seconds",
            registry
        )?;

        let error_counts = register_counter_with_registry!(
            "wlk_rendezvous_errors_total",
            "Total number of errors",
            registry
        )?;

        Ok(Self {
            active_sessions,
            sessions_created,
            sessions_fetched,
            sessions_acked,
            sessions_expired,
            request_latency,
            error_counts,
            registry,
        })
    }

    pub fn export_prometheus(&self) -> anyhow::Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
