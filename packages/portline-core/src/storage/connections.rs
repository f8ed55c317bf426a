//! # Connections
//!
//! The chat list. Each chat has one summary row: the preview text of its
//! newest message, unread counter and a pointer to its permissions.
//!
//! ## Summary Updates
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  new message ──► update_connection_on_new_message                      │
//! │                  (skipped when the row already shows something newer) │
//! │                                                                         │
//! │  message X deleted / edited / expired                                   │
//! │              ──► update_connection_if_latest_message_is(X, …)           │
//! │                  UPDATE … WHERE chatId = ? AND latestMessageId = X      │
//! │                  (no-op when a newer message is already latest)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::permissions::{insert_permissions, Permissions};
use super::Database;
use crate::error::{Error, Result};
use crate::messaging::{generate_id, ContentType, MessageStatus};

/// Direct or group chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    /// One peer
    Direct,
    /// Many members
    Group,
}

impl ChatKind {
    /// Convert to database string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }

    /// Parse from database string
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "direct" => Some(Self::Direct),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

/// A chat-list row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    /// Chat id
    pub chat_id: String,
    /// Display name
    pub name: String,
    /// Direct or group
    pub kind: ChatKind,
    /// Permissions row of the chat
    pub permissions_id: String,
    /// Summary line
    pub text: Option<String>,
    /// Content type of the newest message
    pub recent_message_type: Option<ContentType>,
    /// Newest message id
    pub latest_message_id: Option<String>,
    /// Time of the newest message
    pub timestamp: Option<String>,
    /// Status of the newest message
    pub read_status: Option<MessageStatus>,
    /// Unread incoming messages
    pub new_message_count: u32,
}

/// Summary values for a new latest message
#[derive(Debug, Clone)]
pub struct SummaryUpdate {
    /// Summary line
    pub text: String,
    /// Content type of the message
    pub recent_message_type: ContentType,
    /// Message id
    pub latest_message_id: String,
    /// Message time
    pub timestamp: String,
    /// Status of the message
    pub read_status: MessageStatus,
    /// Count it as unread
    pub increment_unread: bool,
}

fn connection_from_row(row: &Row) -> rusqlite::Result<ConnectionRecord> {
    let kind: String = row.get(2)?;
    let recent: Option<u32> = row.get(5)?;
    let status: Option<String> = row.get(8)?;
    Ok(ConnectionRecord {
        chat_id: row.get(0)?,
        name: row.get(1)?,
        kind: ChatKind::parse(&kind).unwrap_or(ChatKind::Direct),
        permissions_id: row.get(3)?,
        text: row.get(4)?,
        recent_message_type: recent.and_then(ContentType::from_code),
        latest_message_id: row.get(6)?,
        timestamp: row.get(7)?,
        read_status: status.as_deref().and_then(MessageStatus::parse),
        new_message_count: row.get(9)?,
    })
}

const CONNECTION_COLUMNS: &str = "chatId, name, kind, permissionsId, text, recentMessageType, \
    latestMessageId, timestamp, readStatus, newMessageCount";

impl Database {
    // ========================================================================
    // CONNECTION OPERATIONS
    // ========================================================================

    /// Create a chat with default permissions
    ///
    /// Returns the chat's permissions id. Creating an existing chat returns
    /// the id it already has.
    pub fn create_chat(&self, chat_id: &str, name: &str, kind: ChatKind) -> Result<String> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT permissionsId FROM connections WHERE chatId = ?1",
                params![chat_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::DatabaseError(format!("Failed to read connection: {}", e)))?;

        if let Some(permissions_id) = existing {
            return Ok(permissions_id);
        }

        let permissions_id = generate_id();
        insert_permissions(&tx, &permissions_id, &Permissions::default())?;
        tx.execute(
            "INSERT INTO connections (chatId, name, kind, permissionsId) VALUES (?1, ?2, ?3, ?4)",
            params![chat_id, name, kind.as_str(), permissions_id],
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to create connection: {}", e)))?;

        tx.commit()
            .map_err(|e| Error::DatabaseError(format!("Failed to commit connection: {}", e)))?;

        tracing::debug!("Created {} chat {}", kind.as_str(), chat_id);
        Ok(permissions_id)
    }

    /// Load a chat-list row
    pub fn get_connection(&self, chat_id: &str) -> Result<Option<ConnectionRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM connections WHERE chatId = ?1", CONNECTION_COLUMNS),
            params![chat_id],
            connection_from_row,
        )
        .optional()
        .map_err(|e| Error::DatabaseError(format!("Failed to get connection: {}", e)))
    }

    /// All chats, most recently active first
    pub fn get_connections(&self) -> Result<Vec<ConnectionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM connections ORDER BY timestamp IS NULL, timestamp DESC",
                CONNECTION_COLUMNS
            ))
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let connections = stmt
            .query_map([], connection_from_row)
            .map_err(|e| Error::DatabaseError(format!("Failed to query connections: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::DatabaseError(format!("Failed to read connection: {}", e)))?;

        Ok(connections)
    }

    /// Permissions id of a chat
    pub fn get_permissions_id(&self, chat_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT permissionsId FROM connections WHERE chatId = ?1",
            params![chat_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::DatabaseError(format!("Failed to get permissions id: {}", e)))
    }

    /// Point the summary at a newer message
    ///
    /// A message older than the one already shown leaves the row unchanged
    /// (returns false).
    pub fn update_connection_on_new_message(
        &self,
        chat_id: &str,
        update: &SummaryUpdate,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE connections SET
                    text = ?1,
                    recentMessageType = ?2,
                    latestMessageId = ?3,
                    timestamp = ?4,
                    readStatus = ?5,
                    newMessageCount = newMessageCount + ?6
                 WHERE chatId = ?7 AND (timestamp IS NULL OR timestamp <= ?4)",
                params![
                    update.text,
                    update.recent_message_type.code(),
                    update.latest_message_id,
                    update.timestamp,
                    update.read_status.as_str(),
                    i32::from(update.increment_unread),
                    chat_id,
                ],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to update connection: {}", e)))?;
        Ok(rows > 0)
    }

    /// Compare-and-swap the summary text of a chat
    ///
    /// Only applies while `message_id` is still the chat's latest message.
    /// `recent_message_type = None` keeps the current type.
    pub fn update_connection_if_latest_message_is(
        &self,
        chat_id: &str,
        message_id: &str,
        text: &str,
        recent_message_type: Option<ContentType>,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE connections SET
                    text = ?1,
                    recentMessageType = COALESCE(?2, recentMessageType)
                 WHERE chatId = ?3 AND latestMessageId = ?4",
                params![
                    text,
                    recent_message_type.map(|t| t.code()),
                    chat_id,
                    message_id
                ],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to update connection: {}", e)))?;
        Ok(rows > 0)
    }

    /// Compare-and-swap the read status shown in the summary
    pub fn update_connection_status_if_latest_message_is(
        &self,
        chat_id: &str,
        message_id: &str,
        status: MessageStatus,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE connections SET readStatus = ?1 WHERE chatId = ?2 AND latestMessageId = ?3",
                params![status.as_str(), chat_id, message_id],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to update connection: {}", e)))?;
        Ok(rows > 0)
    }

    /// Reset the unread counter of a chat
    pub fn mark_connection_read(&self, chat_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE connections SET newMessageCount = 0,
                    readStatus = CASE WHEN readStatus = ?1 THEN ?2 ELSE readStatus END
                 WHERE chatId = ?3",
                params![
                    MessageStatus::Latest.as_str(),
                    MessageStatus::Read.as_str(),
                    chat_id
                ],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to mark connection read: {}", e)))?;
        Ok(rows > 0)
    }
}
