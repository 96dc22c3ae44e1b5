//! Operation payloads and their text encoding.
//!
//! A payload travels inside an envelope as a JSON *string*, so it is encoded
//! on its own first. Byte fields are standard base64 with padding.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::errors::DecodeError;
use crate::message::MessageType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustSitePayload {
    pub app: String,
    pub domain: String,
    pub icon: Option<String>,
    pub accept: Option<bool>,
    pub pubkey: Option<Vec<u8>>,
}

impl TrustSitePayload {
    /// The request form sent by a dApp: no decision and no key yet.
    pub fn request(app: impl Into<String>, domain: impl Into<String>, icon: Option<String>) -> Self {
        Self {
            app: app.into(),
            domain: domain.into(),
            icon,
            accept: None,
            pubkey: None,
        }
    }

    /// The accepted form returned by a wallet.
    pub fn accepted(&self, pubkey: Vec<u8>) -> Self {
        Self {
            accept: Some(true),
            pubkey: Some(pubkey),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignMessagePayload {
    pub message: Vec<u8>,
    pub signature: Option<Vec<u8>>,
}

impl SignMessagePayload {
    pub fn request(message: Vec<u8>) -> Self {
        Self {
            message,
            signature: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignTransactionPayload {
    pub transaction: Vec<u8>,
    pub versioned: bool,
    pub signatures: Option<Vec<Vec<u8>>>,
}

/// Closed set of operation payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    TrustSite(TrustSitePayload),
    SignMessage(SignMessagePayload),
    SignTransaction(SignTransactionPayload),
}

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Deserialize)]
struct TrustSiteWire {
    #[serde(default)]
    app: Option<String>,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    accept: Option<bool>,
    #[serde(default)]
    pubkey: Option<String>,
}

#[derive(Deserialize)]
struct SignMessageWire {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    signature: Option<String>,
}

#[derive(Deserialize)]
struct SignTransactionWire {
    #[serde(default)]
    transaction: Option<String>,
    #[serde(default)]
    versioned: Option<bool>,
    #[serde(default)]
    signatures: Option<Vec<String>>,
}

pub(crate) fn encode_bytes(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

pub(crate) fn decode_bytes(text: &str, field: &'static str) -> Result<Vec<u8>, DecodeError> {
    B64.decode(text).map_err(|_| DecodeError::Base64 { field })
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, DecodeError> {
    value.ok_or(DecodeError::MissingField(field))
}

// ============================================================================
// Codec
// ============================================================================

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::TrustSite(_) => MessageType::TrustSite,
            Payload::SignMessage(_) => MessageType::SignMessage,
            Payload::SignTransaction(_) => MessageType::SignTransaction,
        }
    }

    /// Encode to the JSON text carried in an envelope's `payload` field.
    /// Absent optional fields are omitted.
    pub fn encode(&self) -> String {
        let mut obj = Map::new();
        match self {
            Payload::TrustSite(p) => {
                obj.insert("app".into(), Value::from(p.app.as_str()));
                obj.insert("domain".into(), Value::from(p.domain.as_str()));
                if let Some(icon) = &p.icon {
                    obj.insert("icon".into(), Value::from(icon.as_str()));
                }
                if let Some(accept) = p.accept {
                    obj.insert("accept".into(), Value::from(accept));
                }
                if let Some(pubkey) = &p.pubkey {
                    obj.insert("pubkey".into(), Value::from(encode_bytes(pubkey)));
                }
            }
            Payload::SignMessage(p) => {
                obj.insert("message".into(), Value::from(encode_bytes(&p.message)));
                if let Some(sig) = &p.signature {
                    obj.insert("signature".into(), Value::from(encode_bytes(sig)));
                }
            }
            Payload::SignTransaction(p) => {
                obj.insert("transaction".into(), Value::from(encode_bytes(&p.transaction)));
                obj.insert("versioned".into(), Value::from(p.versioned));
                if let Some(sigs) = &p.signatures {
                    let list = sigs.iter().map(|s| Value::from(encode_bytes(s))).collect();
                    obj.insert("signatures".into(), Value::Array(list));
                }
            }
        }
        Value::Object(obj).to_string()
    }

    /// Decode payload text for the given operation type.
    pub fn decode(text: &str, message_type: MessageType) -> Result<Self, DecodeError> {
        match message_type {
            MessageType::TrustSite => {
                let wire: TrustSiteWire = serde_json::from_str(text)?;
                let pubkey = match wire.pubkey {
                    Some(k) => Some(decode_bytes(&k, "pubkey")?),
                    None => None,
                };
                Ok(Payload::TrustSite(TrustSitePayload {
                    app: required(wire.app, "app")?,
                    domain: required(wire.domain, "domain")?,
                    icon: wire.icon,
                    accept: wire.accept,
                    pubkey,
                }))
            }
            MessageType::SignMessage => {
                let wire: SignMessageWire = serde_json::from_str(text)?;
                let message = decode_bytes(&required(wire.message, "message")?, "message")?;
                let signature = match wire.signature {
                    Some(s) => Some(decode_bytes(&s, "signature")?),
                    None => None,
                };
                Ok(Payload::SignMessage(SignMessagePayload { message, signature }))
            }
            MessageType::SignTransaction => {
                let wire: SignTransactionWire = serde_json::from_str(text)?;
                let transaction =
                    decode_bytes(&required(wire.transaction, "transaction")?, "transaction")?;
                let signatures = match wire.signatures {
                    Some(list) => Some(
                        list.iter()
                            .map(|s| decode_bytes(s, "signatures"))
                            .collect::<Result<Vec<_>, _>>()?,
                    ),
                    None => None,
                };
                Ok(Payload::SignTransaction(SignTransactionPayload {
                    transaction,
                    versioned: required(wire.versioned, "versioned")?,
                    signatures,
                }))
            }
        }
    }
}
