//! # Transport Boundary
//!
//! The pipeline never touches keys or sockets. It hands a serialized
//! [`WireMessage`] to a [`Transport`], which seals it for the chat and
//! delivers it over the already-established channel.
//!
//! ## Wire Format
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  WireMessage (JSON, camelCase)                                          │
//! │  {                                                                      │
//! │    "messageId":   "9f2c…",          // sender-generated id              │
//! │    "contentType": 0,                // ContentType code                 │
//! │    "data":        { "text": "hi" }, // per-type payload                 │
//! │    "replyId":     "4ab1…",          // optional                         │
//! │    "timestamp":   "2024-…Z",        // sender's clock                   │
//! │    "expiresOn":   "2024-…Z"         // optional                         │
//! │  }                                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Maximum serialized payload size (64KB)
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// How the transport should protect a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sealing {
    /// Encrypt with the chat's session keys
    Encrypted,
    /// Send as-is; only for pre-handshake signaling
    Plaintext,
}

/// Delivers payloads to a chat
///
/// Errors should be classified so that [`Error::is_retryable`] holds for
/// connectivity problems (the message is retried later) and not for
/// problems with the payload itself (the message is marked failed).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Seal `payload` for `chat_id` and send it
    async fn encrypt_and_transmit(&self, chat_id: &str, payload: &[u8], sealing: Sealing)
        -> Result<()>;
}

/// The message envelope exchanged between peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Sender-generated id
    pub message_id: String,
    /// Raw content type code
    pub content_type: u32,
    /// Per-type payload
    #[serde(default)]
    pub data: Value,
    /// Message this one replies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_id: Option<String>,
    /// Sender's timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Disappearing-message deadline set by the sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_on: Option<String>,
}

impl WireMessage {
    /// Serialize for transmission
    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::InvalidMessageContent(format!(
                "Payload too large: {} bytes (max {})",
                bytes.len(),
                MAX_PAYLOAD_SIZE
            )));
        }
        Ok(bytes)
    }

    /// Parse a decrypted payload
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::DeserializationError(format!("Invalid message envelope: {}", e)))
    }
}
