//! Compact transaction wire format.
//!
//! A serialized transaction is a short-vec count of 64-byte signatures,
//! the signatures, then the message. The message starts with an optional
//! `0x80 | version` prefix (versioned messages only) and a three byte header
//! whose first byte is the number of required signer slots. The account key
//! table follows; the first `num_required_signatures` keys are the signers.

use thiserror::Error;

pub const SIGNATURE_LEN: usize = 64;
pub const PUBKEY_LEN: usize = 32;
pub const BLOCKHASH_LEN: usize = 32;

const VERSION_PREFIX_MASK: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("short-vec length is malformed")]
    ShortVec,

    #[error("versioned flag is {expected} but message prefix disagrees")]
    VersionMismatch { expected: bool },

    #[error("unsupported message version {0}")]
    UnsupportedVersion(u8),

    #[error("header requires {required} signers but only {keys} account keys are present")]
    InvalidHeader { required: usize, keys: usize },

    #[error("expected {expected} signatures, found {actual}")]
    SignatureCount { expected: usize, actual: usize },

    #[error("signer index {0} out of range")]
    SignerIndex(usize),
}

/// Message header. Only the signer count matters to this crate, the other
/// two counts are carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub num_required_signatures: u8,
    pub num_readonly_signed: u8,
    pub num_readonly_unsigned: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    signatures: Vec<[u8; SIGNATURE_LEN]>,
    message: Vec<u8>,
    versioned: bool,
}

// ============================================================================
// Short-vec
// ============================================================================

/// Returns the decoded length and the number of bytes consumed.
fn decode_short_vec(bytes: &[u8]) -> Result<(usize, usize), TransactionError> {
    let mut value: usize = 0;
    for i in 0..3 {
        let byte = *bytes.get(i).ok_or(TransactionError::Truncated("length prefix"))?;
        value |= ((byte & 0x7f) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            // Trailing zero byte means the value had a shorter encoding.
            if i > 0 && byte == 0 {
                return Err(TransactionError::ShortVec);
            }
            if value > u16::MAX as usize {
                return Err(TransactionError::ShortVec);
            }
            return Ok((value, i + 1));
        }
    }
    Err(TransactionError::ShortVec)
}

fn encode_short_vec(mut len: usize, out: &mut Vec<u8>) {
    loop {
        let mut byte = (len & 0x7f) as u8;
        len >>= 7;
        if len == 0 {
            out.push(byte);
            return;
        }
        byte |= 0x80;
        out.push(byte);
    }
}

// ============================================================================
// Message parsing
// ============================================================================

struct ParsedMessage {
    header: MessageHeader,
    keys_offset: usize,
    key_count: usize,
}

fn parse_message(message: &[u8], versioned: bool) -> Result<ParsedMessage, TransactionError> {
    let first = *message.first().ok_or(TransactionError::Truncated("message"))?;
    let prefixed = first & VERSION_PREFIX_MASK != 0;
    if prefixed != versioned {
        return Err(TransactionError::VersionMismatch { expected: versioned });
    }
    let mut offset = 0;
    if versioned {
        let version = first & !VERSION_PREFIX_MASK;
        if version != 0 {
            return Err(TransactionError::UnsupportedVersion(version));
        }
        offset = 1;
    }

    let header = message
        .get(offset..offset + 3)
        .ok_or(TransactionError::Truncated("message header"))?;
    let header = MessageHeader {
        num_required_signatures: header[0],
        num_readonly_signed: header[1],
        num_readonly_unsigned: header[2],
    };
    offset += 3;

    let (key_count, used) = decode_short_vec(&message[offset..])?;
    offset += used;
    if message.len() < offset + key_count * PUBKEY_LEN {
        return Err(TransactionError::Truncated("account keys"));
    }
    let required = header.num_required_signatures as usize;
    if required > key_count {
        return Err(TransactionError::InvalidHeader {
            required,
            keys: key_count,
        });
    }

    Ok(ParsedMessage {
        header,
        keys_offset: offset,
        key_count,
    })
}

/// Build a message with the given header, account keys and blockhash and no
/// instructions.
pub fn compile_message(
    versioned: bool,
    header: MessageHeader,
    account_keys: &[[u8; PUBKEY_LEN]],
    recent_blockhash: [u8; BLOCKHASH_LEN],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 3 + account_keys.len() * PUBKEY_LEN + BLOCKHASH_LEN + 2);
    if versioned {
        out.push(VERSION_PREFIX_MASK);
    }
    out.extend_from_slice(&[
        header.num_required_signatures,
        header.num_readonly_signed,
        header.num_readonly_unsigned,
    ]);
    encode_short_vec(account_keys.len(), &mut out);
    for key in account_keys {
        out.extend_from_slice(key);
    }
    out.extend_from_slice(&recent_blockhash);
    encode_short_vec(0, &mut out);
    if versioned {
        // address table lookups
        encode_short_vec(0, &mut out);
    }
    out
}

// ============================================================================
// Transaction
// ============================================================================

impl Transaction {
    /// Wrap a message with one zeroed signature slot per required signer.
    pub fn new_unsigned(message: Vec<u8>, versioned: bool) -> Result<Self, TransactionError> {
        let parsed = parse_message(&message, versioned)?;
        let slots = parsed.header.num_required_signatures as usize;
        Ok(Self {
            signatures: vec![[0u8; SIGNATURE_LEN]; slots],
            message,
            versioned,
        })
    }

    pub fn from_bytes(bytes: &[u8], versioned: bool) -> Result<Self, TransactionError> {
        let (count, mut offset) = decode_short_vec(bytes)?;
        let sig_end = offset + count * SIGNATURE_LEN;
        if bytes.len() < sig_end {
            return Err(TransactionError::Truncated("signatures"));
        }
        let mut signatures = Vec::with_capacity(count);
        while offset < sig_end {
            let mut sig = [0u8; SIGNATURE_LEN];
            sig.copy_from_slice(&bytes[offset..offset + SIGNATURE_LEN]);
            signatures.push(sig);
            offset += SIGNATURE_LEN;
        }

        let message = bytes[sig_end..].to_vec();
        let parsed = parse_message(&message, versioned)?;
        let expected = parsed.header.num_required_signatures as usize;
        if expected != count {
            return Err(TransactionError::SignatureCount {
                expected,
                actual: count,
            });
        }

        Ok(Self {
            signatures,
            message,
            versioned,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + self.signatures.len() * SIGNATURE_LEN + self.message.len());
        encode_short_vec(self.signatures.len(), &mut out);
        for sig in &self.signatures {
            out.extend_from_slice(sig);
        }
        out.extend_from_slice(&self.message);
        out
    }

    pub fn message(&self) -> &[u8] {
        &self.message
    }

    pub fn signatures(&self) -> &[[u8; SIGNATURE_LEN]] {
        &self.signatures
    }

    pub fn is_versioned(&self) -> bool {
        self.versioned
    }

    pub fn header(&self) -> Result<MessageHeader, TransactionError> {
        Ok(parse_message(&self.message, self.versioned)?.header)
    }

    /// Keys of the required signers, in slot order.
    pub fn signer_keys(&self) -> Result<Vec<[u8; PUBKEY_LEN]>, TransactionError> {
        let parsed = parse_message(&self.message, self.versioned)?;
        let required = parsed.header.num_required_signatures as usize;
        debug_assert!(required <= parsed.key_count);
        Ok(self.message[parsed.keys_offset..]
            .chunks_exact(PUBKEY_LEN)
            .take(required)
            .map(|chunk| {
                let mut key = [0u8; PUBKEY_LEN];
                key.copy_from_slice(chunk);
                key
            })
            .collect())
    }

    pub fn signer_index(&self, pubkey: &[u8; PUBKEY_LEN]) -> Option<usize> {
        self.signer_keys().ok()?.iter().position(|k| k == pubkey)
    }

    pub fn set_signature(
        &mut self,
        index: usize,
        signature: [u8; SIGNATURE_LEN],
    ) -> Result<(), TransactionError> {
        let slot = self
            .signatures
            .get_mut(index)
            .ok_or(TransactionError::SignerIndex(index))?;
        *slot = signature;
        Ok(())
    }

    /// True when every signer slot holds a non-zero signature.
    pub fn is_fully_signed(&self) -> bool {
        self.signatures.iter().all(|s| s.iter().any(|b| *b != 0))
    }
}
