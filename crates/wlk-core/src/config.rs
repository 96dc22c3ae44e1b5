//! Client and relay configuration.
//!
//! Both structs load from TOML files or `WLK_*` environment variables and
//! fall back to defaults for anything not given.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wlk_proto::validation::validate_origin;

use crate::errors::ConfigError;

// ============================================================================
// Client configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Origin the wallet surface is served from. Every inbound message must
    /// come from exactly this origin.
    pub wallet_origin: String,
    /// Address opened as the child context. Defaults to `wallet_origin`.
    pub wallet_url: Option<String>,
    /// Origin of the calling application, declared in every envelope.
    pub app_origin: String,
    pub app_name: String,
    pub app_icon: Option<String>,
    pub handshake_interval_ms: u64,
    /// `None` waits forever.
    pub response_timeout_secs: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            wallet_origin: "https://wallet.example".to_string(),
            wallet_url: None,
            app_origin: "http://localhost:4200".to_string(),
            app_name: "WalletLink dApp".to_string(),
            app_icon: None,
            handshake_interval_ms: 1000,
            response_timeout_secs: Some(300),
        }
    }
}

impl ClientConfig {
    pub fn new(wallet_origin: impl Into<String>, app_origin: impl Into<String>) -> Self {
        Self {
            wallet_origin: wallet_origin.into(),
            app_origin: app_origin.into(),
            ..Self::default()
        }
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileNotFound(e.to_string()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(origin) = lookup("WLK_WALLET_ORIGIN") {
            config.wallet_origin = origin;
        }
        if let Some(url) = lookup("WLK_WALLET_URL") {
            config.wallet_url = Some(url);
        }
        if let Some(origin) = lookup("WLK_APP_ORIGIN") {
            config.app_origin = origin;
        }
        if let Some(name) = lookup("WLK_APP_NAME") {
            config.app_name = name;
        }
        if let Some(icon) = lookup("WLK_APP_ICON") {
            config.app_icon = Some(icon);
        }
        if let Some(ms) = lookup("WLK_HANDSHAKE_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            config.handshake_interval_ms = ms;
        }
        if let Some(secs) = lookup("WLK_RESPONSE_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok()) {
            // 0 disables the timeout
            config.response_timeout_secs = (secs > 0).then_some(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_origin("wallet_origin", &self.wallet_origin)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        validate_origin("app_origin", &self.app_origin)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        if self.app_name.is_empty() {
            return Err(ConfigError::ValidationError("app_name must not be empty".to_string()));
        }
        if self.handshake_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "handshake_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.response_timeout_secs == Some(0) {
            return Err(ConfigError::ValidationError(
                "response_timeout_secs must be at least 1 (omit it to disable)".to_string(),
            ));
        }
        Ok(())
    }

    pub fn wallet_url(&self) -> &str {
        self.wallet_url.as_deref().unwrap_or(&self.wallet_origin)
    }

    /// Never zero, even for a config that skipped `validate()`.
    pub fn handshake_interval(&self) -> Duration {
        Duration::from_millis(self.handshake_interval_ms.max(1))
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_secs.map(Duration::from_secs)
    }
}

// ============================================================================
// Relay configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Session store base URL, e.g. `http://localhost:8080/wallet/v1`.
    pub base_url: String,
    pub poll_interval_ms: u64,
    /// Give up waiting for the user to authenticate after this long.
    pub auth_timeout_secs: Option<u64>,
    pub request_timeout_secs: u64,
    /// Server-side wait per long-poll request when awaiting a response.
    pub long_poll_wait_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/wallet/v1".to_string(),
            poll_interval_ms: 1000,
            auth_timeout_secs: None,
            request_timeout_secs: 10,
            long_poll_wait_ms: 25_000,
        }
    }
}

impl RelayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileNotFound(e.to_string()))?;
        let config: RelayConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup("WLK_RELAY_URL") {
            config.base_url = url;
        }
        if let Some(ms) = lookup("WLK_RELAY_POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            config.poll_interval_ms = ms;
        }
        if let Some(secs) = lookup("WLK_RELAY_AUTH_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.auth_timeout_secs = Some(secs);
        }
        if let Some(secs) = lookup("WLK_RELAY_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.request_timeout_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(
                "base_url must be an http(s) URL".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Never zero, even for a config that skipped `validate()`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn auth_timeout(&self) -> Option<Duration> {
        self.auth_timeout_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        ClientConfig::default().validate().unwrap();
        RelayConfig::default().validate().unwrap();
        let c = ClientConfig::default();
        assert_eq!(c.handshake_interval(), Duration::from_secs(1));
        assert_eq!(c.response_timeout(), Some(Duration::from_secs(300)));
        assert_eq!(c.wallet_url(), "https://wallet.example");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = ClientConfig::from_toml(
            r#"
            wallet_origin = "https://w.example"
            app_origin = "https://dapp.example"
            app_name = "Swap"
            "#,
        )
        .unwrap();
        assert_eq!(c.wallet_origin, "https://w.example");
        assert_eq!(c.handshake_interval_ms, 1000);
        assert_eq!(c.response_timeout_secs, Some(300));
    }

    #[test]
    fn origin_with_path_is_rejected() {
        let err = ClientConfig::from_toml(r#"wallet_origin = "https://w.example/app""#).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("WLK_WALLET_ORIGIN", "https://w.example"),
            ("WLK_HANDSHAKE_INTERVAL_MS", "250"),
            ("WLK_RESPONSE_TIMEOUT_SECS", "0"),
            ("WLK_RELAY_URL", "http://relay:9000/wallet/v1"),
            ("WLK_RELAY_POLL_INTERVAL_MS", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let lookup = |k: &str| vars.get(k).map(|v| v.to_string());

        let c = ClientConfig::from_lookup(lookup).unwrap();
        assert_eq!(c.wallet_origin, "https://w.example");
        assert_eq!(c.handshake_interval_ms, 250);
        assert_eq!(c.response_timeout(), None);

        let r = RelayConfig::from_lookup(lookup).unwrap();
        assert_eq!(r.base_url, "http://relay:9000/wallet/v1");
        assert_eq!(r.poll_interval_ms, 1000);
    }

    #[test]
    fn env_with_zero_interval_is_rejected() {
        let client = ClientConfig::from_lookup(|k| (k == "WLK_HANDSHAKE_INTERVAL_MS").then(|| "0".to_string()));
        assert!(matches!(client, Err(ConfigError::ValidationError(_))));

        let relay = RelayConfig::from_lookup(|k| (k == "WLK_RELAY_POLL_INTERVAL_MS").then(|| "0".to_string()));
        assert!(matches!(relay, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn zero_intervals_are_clamped_when_unvalidated() {
        let client = ClientConfig {
            handshake_interval_ms: 0,
            ..ClientConfig::default()
        };
        assert_eq!(client.handshake_interval(), Duration::from_millis(1));

        let relay = RelayConfig {
            poll_interval_ms: 0,
            ..RelayConfig::default()
        };
        assert_eq!(relay.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn relay_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "base_url = \"https://relay.example/wallet/v1\"").unwrap();
        writeln!(file, "auth_timeout_secs = 30").unwrap();
        let r = RelayConfig::load_from_file(file.path()).unwrap();
        assert_eq!(r.auth_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(r.poll_interval(), Duration::from_secs(1));

        assert!(matches!(
            RelayConfig::load_from_file("/nonexistent/wlk.toml"),
            Err(ConfigError::FileNotFound(_))
        ));
    }
}
