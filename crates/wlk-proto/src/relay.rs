//! Request and response bodies of the relay session store.
//!
//! Envelopes cross the relay as base64 of their JSON text, wrapped in a
//! `{"data": ...}` object.

use serde::{Deserialize, Serialize};

use crate::errors::DecodeError;
use crate::message::{Message, MessageResponse};
use crate::payload::{decode_bytes, encode_bytes};

/// `POST /sessions` body and `GET /sessions/:session` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub data: String,
}

/// `POST /sessions/:session/ack` body and long-poll response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckRequest {
    pub data: String,
}

/// `POST /sessions` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedSession {
    pub session: String,
}

pub fn encode_blob(text: &str) -> String {
    encode_bytes(text.as_bytes())
}

pub fn decode_blob(blob: &str) -> Result<String, DecodeError> {
    let bytes = decode_bytes(blob, "data")?;
    String::from_utf8(bytes).map_err(|_| DecodeError::Utf8 { field: "data" })
}

impl SessionData {
    pub fn from_message(message: &Message) -> Self {
        Self {
            data: encode_blob(&message.serialize()),
        }
    }

    pub fn to_message(&self) -> Result<Message, DecodeError> {
        Message::deserialize(&decode_blob(&self.data)?)
    }
}

impl AckRequest {
    pub fn from_response(response: &MessageResponse) -> Self {
        Self {
            data: encode_blob(&response.serialize()),
        }
    }

    pub fn to_response(&self) -> Result<MessageResponse, DecodeError> {
        MessageResponse::deserialize(&decode_blob(&self.data)?)
    }
}
