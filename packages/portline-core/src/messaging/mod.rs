//! # Messaging Module
//!
//! Everything between the encrypted transport and the local store: message
//! content types, the send dispatcher, the receive pipeline and link
//! previews.
//!
//! ## Message Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          MESSAGE FLOW                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Outgoing                                                               │
//! │  ─────────────────────────────────────────────────────────────         │
//! │                                                                         │
//! │  send_direct(chat, type, data)                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────┐   ┌──────────────┐   ┌────────────────────────┐       │
//! │  │  journal    │──►│  transmit    │──►│  sent / failed / left  │       │
//! │  │  (SQLite)   │   │  (Transport) │   │  journaled for retry   │       │
//! │  └─────────────┘   └──────────────┘   └────────────────────────┘       │
//! │                                                                         │
//! │  Incoming                                                               │
//! │  ─────────────────────────────────────────────────────────────         │
//! │                                                                         │
//! │  decrypted bytes ──► WireMessage ──► ReceiveAction ──► store + summary  │
//! │                                           │                             │
//! │                                           └──► link preview (≤ timeout) │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Encryption, peer discovery and sessions live behind the [`Transport`]
//! trait; this module only ever sees plaintext payloads.

pub mod content;
pub mod link_preview;
pub mod media;
pub mod preview;
pub mod receive;
pub mod send;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use content::{
    generate_id, ContactBundleParams, ContentType, DeletionParams, DisappearingParams,
    EditParams, EmptyParams, LinkParams, MediaParams, MessageData, MessageStatus,
    NameChangeParams, PortBundleParams, ReactionParams, ReceiptParams, TextParams,
    PEER_REACTION_ID, SELF_REACTION_ID,
};
pub use link_preview::{
    Enrichment, HttpOpenGraphFetcher, LinkEnricher, OpenGraphData, OpenGraphFetcher,
};
pub use media::{HttpMediaClient, MediaClient};
pub use preview::{connection_text, DELETED_MESSAGE_TEXT};
pub use receive::{IncomingMessage, ReceiveAction, ReceivePipeline};
pub use send::{SendContext, SendDispatcher, SendOutcome, Sender, SenderKind};
pub use transport::{Sealing, Transport, WireMessage, MAX_PAYLOAD_SIZE};
