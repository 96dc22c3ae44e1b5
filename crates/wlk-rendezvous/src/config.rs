use ed25519_dalek::SigningKey;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,

    // Session settings
    pub max_payload_size: usize,
    pub session_ttl_secs: u64,
    pub eviction_interval_secs: u64,

    /// Hex ed25519 seed used to derive session ids. A random key is
    /// generated at startup when unset.
    pub session_key_hex: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
            max_payload_size: 64 * 1024, // 64KB
            session_ttl_secs: 120,
            eviction_interval_secs: 10,
            session_key_hex: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = lookup("WLK_BIND_ADDR") {
            config.bind_addr = addr.parse()?;
        }

        if let Some(size) = lookup("WLK_MAX_PAYLOAD_SIZE") {
            config.max_payload_size = size.parse()?;
        }

        if let Some(ttl) = lookup("WLK_SESSION_TTL_SECS") {
            config.session_ttl_secs = ttl.parse()?;
        }

        if let Some(interval) = lookup("WLK_EVICTION_INTERVAL_SECS") {
            config.eviction_interval_secs = interval.parse()?;
        }

        if let Some(key) = lookup("WLK_SESSION_KEY") {
            config.session_key_hex = Some(key);
        }

        Ok(config)
    }

    pub fn from_toml(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_payload_size == 0 {
            anyhow::bail!("max_payload_size must be > 0");
        }

        if self.session_ttl_secs == 0 {
            anyhow::bail!("session_ttl_secs must be > 0");
        }

        if self.eviction_interval_secs == 0 {
            anyhow::bail!("eviction_interval_secs must be > 0");
        }

        if self.session_key_hex.is_some() {
            self.signing_key()?;
        }

        Ok(())
    }

    pub fn signing_key(&self) -> anyhow::Result<SigningKey> {
        let Some(hex_seed) = &self.session_key_hex else {
            return Ok(SigningKey::generate(&mut OsRng));
        };
        let seed: [u8; 32] = hex::decode(hex_seed.trim())?
            .try_into()
            .map_err(|_| anyhow::anyhow!("session_key_hex must be 32 bytes"))?;
        Ok(SigningKey::from_bytes(&seed))
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.session_ttl(), Duration::from_secs(120));
    }

    #[test]
    fn env_overrides_defaults() {
        let config = ServerConfig::from_lookup(env(&[
            ("WLK_BIND_ADDR", "127.0.0.1:9000"),
            ("WLK_MAX_PAYLOAD_SIZE", "1024"),
            ("WLK_SESSION_TTL_SECS", "30"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.max_payload_size, 1024);
        assert_eq!(config.session_ttl_secs, 30);
        assert_eq!(config.eviction_interval_secs, 10);
    }

    #[test]
    fn bad_env_value_is_an_error() {
        assert!(ServerConfig::from_lookup(env(&[("WLK_SESSION_TTL_SECS", "soon")])).is_err());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: ServerConfig = toml::from_str("session_ttl_secs = 5").unwrap();
        assert_eq!(config.session_ttl_secs, 5);
        assert_eq!(config.max_payload_size, 64 * 1024);
    }

    #[test]
    fn session_key_from_seed_is_stable() {
        let config = ServerConfig {
            session_key_hex: Some("07".repeat(32)),
            ..ServerConfig::default()
        };
        config.validate().unwrap();
        assert_eq!(
            config.signing_key().unwrap().to_bytes(),
            SigningKey::from_bytes(&[7u8; 32]).to_bytes()
        );
    }

    #[test]
    fn short_session_key_is_rejected() {
        let config = ServerConfig {
            session_key_hex: Some("abcd".into()),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let config = ServerConfig {
            session_ttl_secs: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
