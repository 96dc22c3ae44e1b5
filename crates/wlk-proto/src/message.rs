//! Request and response envelopes.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::errors::DecodeError;
use crate::payload::Payload;

/// Operation carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    TrustSite,
    SignTransaction,
    SignMessage,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::TrustSite => "TRUST_SITE",
            MessageType::SignTransaction => "SIGN_TRANSACTION",
            MessageType::SignMessage => "SIGN_MESSAGE",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRUST_SITE" => Ok(MessageType::TrustSite),
            "SIGN_TRANSACTION" => Ok(MessageType::SignTransaction),
            "SIGN_MESSAGE" => Ok(MessageType::SignMessage),
            other => Err(DecodeError::UnknownMessageType(other.to_string())),
        }
    }
}

// ============================================================================
// Request envelope
// ============================================================================

/// A request envelope. The operation type is carried by the payload variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub origin: String,
    pub payload: Payload,
}

#[derive(Deserialize)]
struct EnvelopeWire {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    payload: Option<String>,
}

impl Message {
    pub fn new(id: impl Into<String>, origin: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            origin: origin.into(),
            payload,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    /// Flat JSON object; `payload` is the encoded payload string.
    pub fn serialize(&self) -> String {
        let mut obj = Map::new();
        obj.insert("id".into(), Value::from(self.id.as_str()));
        obj.insert("type".into(), Value::from(self.message_type().as_str()));
        obj.insert("origin".into(), Value::from(self.origin.as_str()));
        obj.insert("payload".into(), Value::from(self.payload.encode()));
        Value::Object(obj).to_string()
    }

    pub fn deserialize(text: &str) -> Result<Self, DecodeError> {
        let wire: EnvelopeWire = serde_json::from_str(text)?;
        let id = wire.id.ok_or(DecodeError::MissingField("id"))?;
        let kind: MessageType = wire.kind.ok_or(DecodeError::MissingField("type"))?.parse()?;
        let origin = wire.origin.ok_or(DecodeError::MissingField("origin"))?;
        let payload = wire.payload.ok_or(DecodeError::MissingField("payload"))?;
        Ok(Self {
            id,
            origin,
            payload: Payload::decode(&payload, kind)?,
        })
    }
}

// ============================================================================
// Response envelope
// ============================================================================

/// `payload` and `error` are mutually exclusive on the wire; here that is
/// a closed choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    Success(Payload),
    Failure(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageResponse {
    pub id: String,
    pub message_type: MessageType,
    pub outcome: ResponseOutcome,
}

impl MessageResponse {
    pub fn success(id: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            message_type: payload.message_type(),
            outcome: ResponseOutcome::Success(payload),
        }
    }

    pub fn failure(id: impl Into<String>, message_type: MessageType, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message_type,
            outcome: ResponseOutcome::Failure(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ResponseOutcome::Success(_))
    }

    pub fn payload(&self) -> Option<&Payload> {
        match &self.outcome {
            ResponseOutcome::Success(p) => Some(p),
            ResponseOutcome::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            ResponseOutcome::Success(_) => None,
            ResponseOutcome::Failure(e) => Some(e),
        }
    }

    pub fn serialize(&self) -> String {
        let mut obj = Map::new();
        obj.insert("id".into(), Value::from(self.id.as_str()));
        obj.insert("type".into(), Value::from(self.message_type.as_str()));
        obj.insert("success".into(), Value::from(self.is_success()));
        match &self.outcome {
            ResponseOutcome::Success(p) => {
                obj.insert("payload".into(), Value::from(p.encode()));
            }
            ResponseOutcome::Failure(e) => {
                obj.insert("error".into(), Value::from(e.as_str()));
            }
        }
        Value::Object(obj).to_string()
    }

    pub fn deserialize(text: &str) -> Result<Self, DecodeError> {
        ResponseFrame::parse(text)?.decode()
    }
}

/// A response whose correlation fields are parsed but whose payload is
/// still encoded. Lets a receiver find the pending request for a response
/// that later fails to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub id: String,
    pub message_type: MessageType,
    pub success: bool,
    pub error: Option<String>,
    pub payload: Option<String>,
}

#[derive(Deserialize)]
struct ResponseWire {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    payload: Option<String>,
}

impl ResponseFrame {
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let wire: ResponseWire = serde_json::from_str(text)?;
        Ok(Self {
            id: wire.id.ok_or(DecodeError::MissingField("id"))?,
            message_type: wire.kind.ok_or(DecodeError::MissingField("type"))?.parse()?,
            success: wire.success.ok_or(DecodeError::MissingField("success"))?,
            error: wire.error,
            payload: wire.payload,
        })
    }

    pub fn decode(self) -> Result<MessageResponse, DecodeError> {
        let outcome = if self.success {
            let text = self.payload.ok_or(DecodeError::MissingField("payload"))?;
            ResponseOutcome::Success(Payload::decode(&text, self.message_type)?)
        } else {
            ResponseOutcome::Failure(self.error.ok_or(DecodeError::MissingField("error"))?)
        };
        Ok(MessageResponse {
            id: self.id,
            message_type: self.message_type,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{SignMessagePayload, TrustSitePayload};

    #[test]
    fn envelope_is_flat_with_string_payload() {
        let msg = Message::new(
            "id-1",
            "https://dapp.example",
            Payload::SignMessage(SignMessagePayload::request(b"hi".to_vec())),
        );
        let v: Value = serde_json::from_str(&msg.serialize()).unwrap();
        assert_eq!(v["id"], "id-1");
        assert_eq!(v["type"], "SIGN_MESSAGE");
        assert_eq!(v["origin"], "https://dapp.example");
        assert!(v["payload"].is_string());
        assert_eq!(v["payload"].as_str().unwrap(), r#"{"message":"aGk="}"#);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let text = r#"{"id":"1","type":"SIGN_ALL","origin":"o","payload":"{}"}"#;
        assert_eq!(
            Message::deserialize(text),
            Err(DecodeError::UnknownMessageType("SIGN_ALL".into()))
        );
    }

    #[test]
    fn payload_errors_propagate() {
        let text = r#"{"id":"1","type":"SIGN_MESSAGE","origin":"o","payload":"{\"message\":\"@@\"}"}"#;
        assert_eq!(
            Message::deserialize(text),
            Err(DecodeError::Base64 { field: "message" })
        );
    }

    #[test]
    fn failure_response_carries_error_only() {
        let resp = MessageResponse::failure("9", MessageType::SignMessage, "declined");
        let v: Value = serde_json::from_str(&resp.serialize()).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"], "declined");
        assert!(v.get("payload").is_none());
        assert_eq!(MessageResponse::deserialize(&resp.serialize()).unwrap(), resp);
    }

    #[test]
    fn success_response_round_trips() {
        let payload = Payload::TrustSite(
            TrustSitePayload::request("App", "https://dapp.example", None).accepted(vec![1; 32]),
        );
        let resp = MessageResponse::success("abc", payload.clone());
        let back = MessageResponse::deserialize(&resp.serialize()).unwrap();
        assert_eq!(back.payload(), Some(&payload));
        assert_eq!(back.error(), None);
    }

    #[test]
    fn frame_keeps_id_when_payload_is_bad() {
        let text = r#"{"id":"r1","type":"SIGN_MESSAGE","success":true,"payload":"{\"message\":\"??\"}"}"#;
        let frame = ResponseFrame::parse(text).unwrap();
        assert_eq!(frame.id, "r1");
        assert_eq!(frame.decode(), Err(DecodeError::Base64 { field: "message" }));
    }

    #[test]
    fn failure_without_error_text_does_not_decode() {
        let text = r#"{"id":"r1","type":"TRUST_SITE","success":false}"#;
        assert_eq!(
            MessageResponse::deserialize(text),
            Err(DecodeError::MissingField("error"))
        );
    }

    #[test]
    fn type_names_round_trip() {
        for t in [MessageType::TrustSite, MessageType::SignMessage, MessageType::SignTransaction] {
            assert_eq!(t.as_str().parse::<MessageType>().unwrap(), t);
        }
    }
}
