use std::fmt;

use wlk_proto::validation::{sizes, validate_public_key, ValidationResult};
use wlk_proto::MessageType;

/// Ed25519 public key of a wallet account.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; sizes::ED25519_PUB_SIZE]);

impl PublicKey {
    pub fn from_slice(bytes: &[u8]) -> ValidationResult<Self> {
        validate_public_key(bytes).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; sizes::ED25519_PUB_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0[..8]))
    }
}

/// Kind of operation a request performs. Exposed while a request waits for
/// a retry so a UI can describe what is being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    TrustSite,
    SignMessage,
    SignTransaction,
}

impl RequestKind {
    pub fn message_type(&self) -> MessageType {
        match self {
            RequestKind::TrustSite => MessageType::TrustSite,
            RequestKind::SignMessage => MessageType::SignMessage,
            RequestKind::SignTransaction => MessageType::SignTransaction,
        }
    }
}

impl From<MessageType> for RequestKind {
    fn from(t: MessageType) -> Self {
        match t {
            MessageType::TrustSite => RequestKind::TrustSite,
            MessageType::SignMessage => RequestKind::SignMessage,
            MessageType::SignTransaction => RequestKind::SignTransaction,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequestKind::TrustSite => "Trust Site",
            RequestKind::SignMessage => "Sign Message",
            RequestKind::SignTransaction => "Sign Transaction",
        })
    }
}

/// Fresh correlation id for a request envelope.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique_uuids() {
        let a = new_request_id();
        let b = new_request_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn public_key_display_is_hex() {
        let pk = PublicKey([0xab; 32]);
        assert_eq!(pk.to_string(), "ab".repeat(32));
        assert!(PublicKey::from_slice(&[1u8; 31]).is_err());
    }
}
