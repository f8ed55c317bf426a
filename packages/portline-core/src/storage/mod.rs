//! # Storage Module
//!
//! Local storage for Portline: messages, permissions, media rows and the
//! chat list, all in one SQLite database.
//!
//! ## Storage Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE SYSTEM                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SQLite Database                                                │   │
//! │  │  ───────────────                                                 │   │
//! │  │                                                                 │   │
//! │  │  Tables:                                                       │   │
//! │  │  • lineMessages  - Direct chat messages                        │   │
//! │  │  • groupMessages - Group chat messages (+ memberId)            │   │
//! │  │  • reactions     - One reaction per sender per message         │   │
//! │  │  • permissions   - Per-chat settings                           │   │
//! │  │  • media         - Attachments and preview images              │   │
//! │  │  • connections   - Chat list summaries                         │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Media directory (filesystem)                                   │   │
//! │  │  ────────────────────────────                                    │   │
//! │  │                                                                 │   │
//! │  │  <media_dir>/<chatId>/<mediaId>-<fileName>                     │   │
//! │  │  Rows store the path relative to <media_dir>.                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Encryption at rest is the host platform's concern; payloads reach
//! this layer already decrypted.

mod connections;
mod database;
mod media;
mod permissions;
mod schema;

pub use connections::{ChatKind, ConnectionRecord, SummaryUpdate};
pub use database::{
    CleanDelete, Database, LoadedMessage, MessageRecord, MessageTable, MessageUpdate,
    ReactionRecord, ReplyContent,
};
pub use media::{MediaRecord, MediaUpdate};
pub use permissions::{Permissions, PermissionsUpdate};

use crate::error::Result;

/// Storage configuration
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// Path to the database file (None for in-memory)
    pub database_path: Option<String>,
}

/// Initialize the storage system
pub async fn init(config: StorageConfig) -> Result<Database> {
    Database::open(config.database_path.as_deref()).await
}
