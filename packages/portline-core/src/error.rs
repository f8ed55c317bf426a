//! # Error Handling
//!
//! Error types for the Portline message pipeline.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Crypto Errors                                                     │
//! │  │   └── EncryptionFailed      - Sealing the payload failed            │
//! │  │                                                                      │
//! │  ├── Storage Errors                                                    │
//! │  │   ├── WriteError            - Failed to write to storage            │
//! │  │   ├── Corrupted             - Data corruption detected              │
//! │  │   ├── DatabaseError         - SQLite failure                        │
//! │  │   └── DuplicateMessage      - chatId + messageId already stored     │
//! │  │                                                                      │
//! │  ├── Network Errors            (retryable, message stays journaled)    │
//! │  │   ├── NotConnected          - Not connected to the network          │
//! │  │   ├── ConnectionFailed      - Failed to connect to peer             │
//! │  │   ├── Timeout               - Operation timed out                   │
//! │  │   ├── PeerNotFound          - Peer not reachable                    │
//! │  │   ├── TransportError        - Transport-level failure               │
//! │  │   └── HttpError             - Media / preview HTTP failure          │
//! │  │                                                                      │
//! │  └── Message Errors                                                    │
//! │      ├── RecipientOffline      - Recipient is offline                  │
//! │      ├── InvalidMessageContent - Data does not fit the content type    │
//! │      ├── EmptyContent          - Incoming data was null                │
//! │      ├── UnknownContentType    - Unrecognised numeric content type     │
//! │      └── MediaUnavailable      - No media endpoint / local file        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Outcome of a failed send
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Phase B error            is_retryable()      Persisted status          │
//! │  ──────────────────────────────────────────────────────────────────     │
//! │  NotConnected / Timeout   true                journaled (reconciler)    │
//! │  InvalidMessageContent    false               failed                    │
//! │  EncryptionFailed         false               failed                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for Portline Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Portline Core
///
/// Errors are grouped by domain. Nothing in this enum crosses the public
/// send/receive entry points; those log and swallow.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Crypto Errors (300-399)
    // ========================================================================

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    // ========================================================================
    // Storage Errors (400-499)
    // ========================================================================

    /// Failed to write to storage
    #[error("Failed to write to storage: {0}")]
    StorageWriteError(String),

    /// Data corruption detected
    #[error("Data corruption detected: {0}")]
    StorageCorrupted(String),

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A message with the same chat and message id is already stored
    #[error("Message {message_id} already exists in chat {chat_id}")]
    DuplicateMessage {
        /// Owning chat
        chat_id: String,
        /// Colliding message id
        message_id: String,
    },

    // ========================================================================
    // Network Errors (500-599)
    // ========================================================================

    /// Not connected to the network
    #[error("Not connected to the network.")]
    NotConnected,

    /// Failed to connect to peer
    #[error("Failed to connect to peer: {0}")]
    ConnectionFailed(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Peer not found on network
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Transport error
    #[error("Transport error: {0}")]
    TransportError(String),

    /// HTTP request failed (media upload/download, Open Graph fetch)
    #[error("HTTP error: {0}")]
    HttpError(String),

    // ========================================================================
    // Message Errors (700-799)
    // ========================================================================

    /// Recipient is offline
    #[error("Recipient is offline. Message will be delivered when they come online.")]
    RecipientOffline,

    /// Invalid message content
    #[error("Invalid message content: {0}")]
    InvalidMessageContent(String),

    /// Incoming message carried no data
    #[error("Message {0} has no content")]
    EmptyContent(String),

    /// Content type code outside the known set
    #[error("Unknown content type: {0}")]
    UnknownContentType(u32),

    /// Media could not be located or no upload endpoint is configured
    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl Error {
    /// Get the numeric error code
    ///
    /// Error codes are organized by category:
    /// - 300-399: Crypto
    /// - 400-499: Storage
    /// - 500-599: Network
    /// - 700-799: Messages
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Crypto (300-399)
            Error::EncryptionFailed(_) => 300,

            // Storage (400-499)
            Error::StorageWriteError(_) => 402,
            Error::StorageCorrupted(_) => 404,
            Error::DatabaseError(_) => 405,
            Error::DuplicateMessage { .. } => 406,

            // Network (500-599)
            Error::NotConnected => 500,
            Error::ConnectionFailed(_) => 501,
            Error::Timeout(_) => 502,
            Error::PeerNotFound(_) => 503,
            Error::TransportError(_) => 505,
            Error::HttpError(_) => 507,

            // Messages (700-799)
            Error::RecipientOffline => 702,
            Error::InvalidMessageContent(_) => 704,
            Error::EmptyContent(_) => 705,
            Error::UnknownContentType(_) => 706,
            Error::MediaUnavailable(_) => 707,

            // Internal (900-999)
            Error::Internal(_) => 900,
            Error::SerializationError(_) => 902,
            Error::DeserializationError(_) => 903,
        }
    }

    /// Check if a failed transmission may succeed on a later attempt
    ///
    /// A send that fails with a retryable error keeps its `journaled`
    /// status so the reconciler picks it up again. Anything else marks
    /// the message `failed`.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NotConnected
                | Error::ConnectionFailed(_)
                | Error::Timeout(_)
                | Error::PeerNotFound(_)
                | Error::RecipientOffline
                | Error::TransportError(_)
                | Error::HttpError(_)
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else if err.is_connect() {
            Error::ConnectionFailed(err.to_string())
        } else {
            Error::HttpError(err.to_string())
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::EncryptionFailed("test".into()).code(), 300);
        assert_eq!(Error::DatabaseError("test".into()).code(), 405);
        assert_eq!(
            Error::DuplicateMessage {
                chat_id: "c1".into(),
                message_id: "m1".into()
            }
            .code(),
            406
        );
        assert_eq!(Error::NotConnected.code(), 500);
        assert_eq!(Error::UnknownContentType(99).code(), 706);
        assert_eq!(Error::Internal("test".into()).code(), 900);
    }

    #[test]
    fn test_codes_are_unique() {
        let all = [
            Error::EncryptionFailed(String::new()),
            Error::StorageWriteError(String::new()),
            Error::StorageCorrupted(String::new()),
            Error::DatabaseError(String::new()),
            Error::DuplicateMessage {
                chat_id: String::new(),
                message_id: String::new(),
            },
            Error::NotConnected,
            Error::ConnectionFailed(String::new()),
            Error::Timeout(String::new()),
            Error::PeerNotFound(String::new()),
            Error::TransportError(String::new()),
            Error::HttpError(String::new()),
            Error::RecipientOffline,
            Error::InvalidMessageContent(String::new()),
            Error::EmptyContent(String::new()),
            Error::UnknownContentType(0),
            Error::MediaUnavailable(String::new()),
            Error::Internal(String::new()),
            Error::SerializationError(String::new()),
            Error::DeserializationError(String::new()),
        ];
        let mut codes: Vec<i32> = all.iter().map(Error::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(Error::Timeout("test".into()).is_retryable());
        assert!(Error::RecipientOffline.is_retryable());
        assert!(Error::TransportError("peer gone".into()).is_retryable());
        assert!(!Error::InvalidMessageContent("bad".into()).is_retryable());
        assert!(!Error::EncryptionFailed("bad key".into()).is_retryable());
        assert!(!Error::SerializationError("bad".into()).is_retryable());
    }

    #[test]
    fn test_duplicate_message_display() {
        let err = Error::DuplicateMessage {
            chat_id: "c1".into(),
            message_id: "m1".into(),
        };
        assert!(err.to_string().contains("m1"));
        assert!(err.to_string().contains("c1"));
    }

    #[test]
    fn test_serde_json_conversion() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert_eq!(err.code(), 902);
    }
}
