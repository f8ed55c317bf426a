//! # Database
//!
//! SQLite database wrapper and the message store.
//!
//! ## Database Operations
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      DATABASE OPERATIONS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐                                                   │
//! │  │ Send / Receive  │                                                   │
//! │  │   pipeline      │                                                   │
//! │  └────────┬────────┘                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                   │
//! │  │    Database     │  High-level API                                   │
//! │  │   (this file)   │  - Messages (direct + group)                      │
//! │  │                 │  - Reactions                                      │
//! │  │  permissions.rs │  - Permissions                                    │
//! │  │  media.rs       │  - Media rows                                     │
//! │  │  connections.rs │  - Chat list summaries                            │
//! │  └────────┬────────┘                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                   │
//! │  │    rusqlite     │  One connection behind a mutex                    │
//! │  │                 │  Multi-statement writes run in a transaction      │
//! │  └────────┬────────┘                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                   │
//! │  │   SQLite DB     │  Storage                                          │
//! │  │   (file or      │  - In-memory for tests                            │
//! │  │    memory)      │  - File for production                            │
//! │  └─────────────────┘                                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Direct and group messages live in two tables with the same layout.
//! Every message operation is written once against [`MessageTable`] and
//! exposed under both the direct and the group name.

use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use serde::Serialize;
use std::sync::Arc;

use super::media::MediaRecord;
use super::schema;
use crate::error::{Error, Result};
use crate::messaging::{ContentType, LinkParams, MessageData, MessageStatus};

/// Which message table an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTable {
    /// `lineMessages`
    Direct,
    /// `groupMessages`
    Group,
}

impl MessageTable {
    /// SQL table name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Direct => "lineMessages",
            Self::Group => "groupMessages",
        }
    }

    fn member_column(&self, alias: &str) -> String {
        match self {
            Self::Direct => "NULL".to_string(),
            Self::Group => format!("{}.memberId", alias),
        }
    }

    /// Select list for a full message row, 17 columns
    fn columns(&self, alias: &str) -> String {
        format!(
            "{a}.chatId, {a}.messageId, {a}.contentType, {a}.data, {a}.sender, {member}, \
             {a}.timestamp, {a}.mtime, {a}.messageStatus, {a}.replyId, {a}.mediaId, \
             {a}.expiresOn, {a}.shouldAck, {a}.hasReaction, {a}.deliveredTimestamp, \
             {a}.readTimestamp, {a}.visible",
            a = alias,
            member = self.member_column(alias),
        )
    }
}

const MESSAGE_COLUMN_COUNT: usize = 17;

// ============================================================================
// RECORDS
// ============================================================================

/// A stored message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Owning chat
    pub chat_id: String,
    /// Sender-generated id, unique within the chat
    pub message_id: String,
    /// Payload discriminator
    pub content_type: ContentType,
    /// Payload
    pub data: MessageData,
    /// True if this device sent it
    pub sender: bool,
    /// Sending group member (group messages only)
    pub member_id: Option<String>,
    /// ISO-8601 ordering time
    pub timestamp: String,
    /// Last modification time
    pub mtime: Option<String>,
    /// Delivery status
    pub message_status: MessageStatus,
    /// Message this one replies to
    pub reply_id: Option<String>,
    /// Attached media row
    pub media_id: Option<String>,
    /// Hard-delete deadline
    pub expires_on: Option<String>,
    /// Whether reading it should produce a read receipt
    pub should_ack: bool,
    /// Whether any reactions exist
    pub has_reaction: bool,
    /// When the peer received it
    pub delivered_timestamp: Option<String>,
    /// When the peer read it
    pub read_timestamp: Option<String>,
    /// False for protocol signaling rows that are never rendered
    pub visible: bool,
}

impl MessageRecord {
    /// A new outgoing message, journaled and stamped with the current time
    pub fn outgoing(
        chat_id: impl Into<String>,
        message_id: impl Into<String>,
        content_type: ContentType,
        data: MessageData,
    ) -> Self {
        let now = crate::time::now_iso();
        Self {
            chat_id: chat_id.into(),
            message_id: message_id.into(),
            content_type,
            data,
            sender: true,
            member_id: None,
            timestamp: now.clone(),
            mtime: Some(now),
            message_status: MessageStatus::Journaled,
            reply_id: None,
            media_id: None,
            expires_on: None,
            should_ack: false,
            has_reaction: false,
            delivered_timestamp: None,
            read_timestamp: None,
            visible: true,
        }
    }

    /// A new incoming message with status `latest`
    pub fn incoming(
        chat_id: impl Into<String>,
        message_id: impl Into<String>,
        content_type: ContentType,
        data: MessageData,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            sender: false,
            timestamp: timestamp.into(),
            mtime: Some(crate::time::now_iso()),
            message_status: MessageStatus::Latest,
            ..Self::outgoing(chat_id, message_id, content_type, data)
        }
    }
}

/// Partial update for a stored message (`None` = leave unchanged)
///
/// `delivered_timestamp` and `read_timestamp` only fill empty columns.
/// `message_status` is dropped when it would move the status backwards.
#[derive(Debug, Clone, Default)]
pub struct MessageUpdate {
    /// New content type
    pub content_type: Option<ContentType>,
    /// New payload
    pub data: Option<MessageData>,
    /// New reply target
    pub reply_id: Option<String>,
    /// New ordering time
    pub timestamp: Option<String>,
    /// New status
    pub message_status: Option<MessageStatus>,
    /// Delivery mark
    pub delivered_timestamp: Option<String>,
    /// Read mark
    pub read_timestamp: Option<String>,
    /// New ack flag
    pub should_ack: Option<bool>,
    /// New reaction flag
    pub has_reaction: Option<bool>,
    /// New expiry
    pub expires_on: Option<String>,
    /// New media link
    pub media_id: Option<String>,
}

impl MessageUpdate {
    /// Update that only changes the status
    pub fn status(status: MessageStatus) -> Self {
        Self {
            message_status: Some(status),
            ..Default::default()
        }
    }
}

/// Content of the message a loaded message replies to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyContent {
    /// Reply target id
    pub message_id: String,
    /// Reply target content type
    pub content_type: ContentType,
    /// Reply target payload
    pub data: MessageData,
    /// Whether we sent the reply target
    pub sender: bool,
    /// Group member who sent the reply target
    pub member_id: Option<String>,
}

/// A message as loaded for display
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedMessage {
    /// The message itself
    #[serde(flatten)]
    pub message: MessageRecord,
    /// Reply target, empty when there is none or it was deleted
    pub reply: Option<ReplyContent>,
    /// Local path of the attached media, when downloaded
    pub file_path: Option<String>,
}

/// Result of tombstoning a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanDelete {
    /// No such message
    NotFound,
    /// The message was already a tombstone
    AlreadyDeleted,
    /// The message is now a tombstone
    Deleted {
        /// Downloaded file that no row references any more
        orphaned_file: Option<String>,
    },
}

/// A reaction row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRecord {
    /// Owning chat
    pub chat_id: String,
    /// Reacted-to message
    pub message_id: String,
    /// Who reacted (member id, peer, or self)
    pub sender_id: String,
    /// Emoji
    pub reaction: String,
    /// When it was set
    pub updated_on: String,
}

// ============================================================================
// DATABASE
// ============================================================================

/// The main database handle
///
/// This wraps a SQLite connection and provides high-level methods
/// for storing and retrieving Portline data.
pub struct Database {
    /// The underlying SQLite connection
    pub(super) conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create a database
    ///
    /// If path is None, creates an in-memory database (useful for testing).
    pub async fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| Error::DatabaseError(format!("Failed to open database: {}", e)))?,
            None => Connection::open_in_memory().map_err(|e| {
                Error::DatabaseError(format!("Failed to create in-memory database: {}", e))
            })?,
        };

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        // Initialize schema
        db.init_schema()?;

        Ok(db)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        // Check current schema version
        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .ok();

        match version {
            None => {
                // Fresh database, create all tables
                conn.execute_batch(schema::CREATE_TABLES)
                    .map_err(|e| Error::DatabaseError(format!("Failed to create tables: {}", e)))?;

                // Set schema version
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| {
                    Error::DatabaseError(format!("Failed to set schema version: {}", e))
                })?;

                tracing::info!("Database schema created (version {})", schema::SCHEMA_VERSION);
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(Error::StorageCorrupted(format!(
                    "Database schema version {} is newer than supported {}",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
            Some(v) => {
                tracing::debug!("Database schema version {}", v);
            }
        }

        Ok(())
    }

    // ========================================================================
    // MESSAGE OPERATIONS (table-generic)
    // ========================================================================

    /// Insert a message; a second insert of the same id fails
    pub fn add_message_in(&self, table: MessageTable, record: &MessageRecord) -> Result<()> {
        let conn = self.conn.lock();
        insert_message(&conn, table, record)
    }

    /// Insert a message together with its media row
    pub fn add_message_with_media_in(
        &self,
        table: MessageTable,
        record: &MessageRecord,
        media: Option<&MediaRecord>,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        insert_message(&tx, table, record)?;
        if let Some(media) = media {
            super::media::insert_media(&tx, media)?;
        }

        tx.commit()
            .map_err(|e| Error::DatabaseError(format!("Failed to journal message: {}", e)))?;
        Ok(())
    }

    /// Load one message
    pub fn get_message_in(
        &self,
        table: MessageTable,
        chat_id: &str,
        message_id: &str,
    ) -> Result<Option<MessageRecord>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM {} AS m WHERE m.chatId = ?1 AND m.messageId = ?2",
            table.columns("m"),
            table.name()
        );

        let result = conn.query_row(&sql, params![chat_id, message_id], |row| {
            message_from_row(row, 0)
        });

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::DatabaseError(format!("Failed to get message: {}", e))),
        }
    }

    /// Apply a partial update
    ///
    /// Returns false when the message does not exist.
    pub fn update_message_in(
        &self,
        table: MessageTable,
        chat_id: &str,
        message_id: &str,
        update: &MessageUpdate,
    ) -> Result<bool> {
        let data = update.data.as_ref().map(|d| d.to_json()).transpose()?;

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        let current: Option<String> = tx
            .query_row(
                &format!(
                    "SELECT messageStatus FROM {} WHERE chatId = ?1 AND messageId = ?2",
                    table.name()
                ),
                params![chat_id, message_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::DatabaseError(format!("Failed to read message status: {}", e)))?;

        let Some(current) = current else {
            return Ok(false);
        };

        let status = match update.message_status {
            Some(next) => {
                let allowed = MessageStatus::parse(&current)
                    .map_or(true, |cur| cur.can_transition_to(next));
                if !allowed {
                    tracing::debug!(
                        "Ignoring status change {} -> {} for message {}",
                        current,
                        next.as_str(),
                        message_id
                    );
                }
                allowed.then(|| next.as_str())
            }
            None => None,
        };

        let sql = format!(
            "UPDATE {} SET
                contentType = COALESCE(?1, contentType),
                data = COALESCE(?2, data),
                replyId = COALESCE(?3, replyId),
                timestamp = COALESCE(?4, timestamp),
                messageStatus = COALESCE(?5, messageStatus),
                deliveredTimestamp = COALESCE(deliveredTimestamp, ?6),
                readTimestamp = COALESCE(readTimestamp, ?7),
                shouldAck = COALESCE(?8, shouldAck),
                hasReaction = COALESCE(?9, hasReaction),
                expiresOn = COALESCE(?10, expiresOn),
                mediaId = COALESCE(?11, mediaId),
                mtime = ?12
             WHERE chatId = ?13 AND messageId = ?14",
            table.name()
        );

        tx.execute(
            &sql,
            params![
                update.content_type.map(|ct| ct.code()),
                data,
                update.reply_id,
                update.timestamp,
                status,
                update.delivered_timestamp,
                update.read_timestamp,
                update.should_ack,
                update.has_reaction,
                update.expires_on,
                update.media_id,
                crate::time::now_iso(),
                chat_id,
                message_id,
            ],
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to update message: {}", e)))?;

        tx.commit()
            .map_err(|e| Error::DatabaseError(format!("Failed to commit message update: {}", e)))?;
        Ok(true)
    }

    /// Newest visible messages of a chat, with reply content and media path
    pub fn get_latest_messages_in(
        &self,
        table: MessageTable,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<LoadedMessage>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {columns},
                    reply.messageId, reply.contentType, reply.data, reply.sender, {reply_member},
                    media.filePath
             FROM (
                SELECT * FROM {table}
                WHERE chatId = ?1 AND visible = 1
                ORDER BY timestamp DESC
                LIMIT ?2
             ) AS message
             LEFT JOIN {table} AS reply
                ON message.replyId = reply.messageId AND reply.chatId = message.chatId
             LEFT JOIN media ON message.mediaId = media.mediaId
             ORDER BY message.timestamp DESC",
            columns = table.columns("message"),
            reply_member = table.member_column("reply"),
            table = table.name(),
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![chat_id, limit], |row| {
                let message = message_from_row(row, 0)?;
                let reply = reply_from_row(row, MESSAGE_COLUMN_COUNT)?;
                let file_path: Option<String> = row.get(MESSAGE_COLUMN_COUNT + 5)?;
                Ok(LoadedMessage {
                    message,
                    reply,
                    file_path,
                })
            })
            .map_err(|e| Error::DatabaseError(format!("Failed to query messages: {}", e)))?;

        collect_rows(rows)
    }

    /// Hard-delete a message and its reactions
    pub fn permanently_delete_message_in(
        &self,
        table: MessageTable,
        chat_id: &str,
        message_id: &str,
    ) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        let rows = tx
            .execute(
                &format!(
                    "DELETE FROM {} WHERE chatId = ?1 AND messageId = ?2",
                    table.name()
                ),
                params![chat_id, message_id],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to delete message: {}", e)))?;

        tx.execute(
            "DELETE FROM reactions WHERE chatId = ?1 AND messageId = ?2",
            params![chat_id, message_id],
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to delete reactions: {}", e)))?;

        tx.commit()
            .map_err(|e| Error::DatabaseError(format!("Failed to commit delete: {}", e)))?;
        Ok(rows > 0)
    }

    /// Turn a message into a tombstone
    ///
    /// The row keeps its id and position in the chat; content type becomes
    /// `deleted`, data becomes `{}`, and the media row, reply link and
    /// reactions are removed. Calling it on a tombstone changes nothing.
    pub fn clean_delete_message_in(
        &self,
        table: MessageTable,
        chat_id: &str,
        message_id: &str,
    ) -> Result<CleanDelete> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        let existing: Option<(u32, String, Option<String>)> = tx
            .query_row(
                &format!(
                    "SELECT contentType, data, mediaId FROM {} WHERE chatId = ?1 AND messageId = ?2",
                    table.name()
                ),
                params![chat_id, message_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(|e| Error::DatabaseError(format!("Failed to read message: {}", e)))?;

        let Some((code, data, media_id)) = existing else {
            return Ok(CleanDelete::NotFound);
        };

        let is_tombstone = code == ContentType::Deleted.code()
            && MessageData::from_json(ContentType::Deleted, &data).target_message_id().is_none()
            && media_id.is_none();
        if is_tombstone {
            return Ok(CleanDelete::AlreadyDeleted);
        }

        let orphaned_file = match media_id {
            Some(media_id) => super::media::take_media(&tx, &media_id)?,
            None => None,
        };

        tx.execute(
            &format!(
                "UPDATE {} SET contentType = ?1, data = '{{}}', mediaId = NULL, replyId = NULL,
                    hasReaction = 0, mtime = ?2
                 WHERE chatId = ?3 AND messageId = ?4",
                table.name()
            ),
            params![
                ContentType::Deleted.code(),
                crate::time::now_iso(),
                chat_id,
                message_id
            ],
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to tombstone message: {}", e)))?;

        tx.execute(
            "DELETE FROM reactions WHERE chatId = ?1 AND messageId = ?2",
            params![chat_id, message_id],
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to delete reactions: {}", e)))?;

        tx.commit()
            .map_err(|e| Error::DatabaseError(format!("Failed to commit tombstone: {}", e)))?;

        Ok(CleanDelete::Deleted { orphaned_file })
    }

    /// Messages whose `expiresOn` is before `now`
    pub fn get_expired_messages_in(
        &self,
        table: MessageTable,
        now: &str,
    ) -> Result<Vec<MessageRecord>> {
        self.query_messages(
            table,
            "m.expiresOn IS NOT NULL AND m.expiresOn < ?1 ORDER BY m.expiresOn ASC",
            &[&now],
        )
    }

    /// Store the result of link-preview enrichment
    ///
    /// The current data is re-read inside the transaction and only the
    /// preview fields of `preview` (title, description, file URI, file name,
    /// media id) are merged in, so a write that landed during the fetch is
    /// kept. Returns false, storing nothing, when the message is gone or is
    /// no longer a link.
    pub fn attach_link_preview_in(
        &self,
        table: MessageTable,
        chat_id: &str,
        message_id: &str,
        preview: &LinkParams,
        media: Option<&MediaRecord>,
    ) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        let current: Option<(u32, String)> = tx
            .query_row(
                &format!(
                    "SELECT contentType, data FROM {} WHERE chatId = ?1 AND messageId = ?2",
                    table.name()
                ),
                params![chat_id, message_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| Error::DatabaseError(format!("Failed to read message: {}", e)))?;

        let Some((code, data)) = current else {
            return Ok(false);
        };
        if code != ContentType::Link.code() {
            return Ok(false);
        }
        let MessageData::Link(mut params) = MessageData::from_json(ContentType::Link, &data) else {
            return Ok(false);
        };

        if preview.title.is_some() {
            params.title = preview.title.clone();
        }
        if preview.description.is_some() {
            params.description = preview.description.clone();
        }
        if preview.file_uri.is_some() {
            params.file_uri = preview.file_uri.clone();
            params.file_name = preview.file_name.clone();
            params.media_id = preview.media_id.clone();
        }
        let json = MessageData::Link(params).to_json()?;

        if let Some(media) = media {
            super::media::insert_media(&tx, media)?;
        }

        tx.execute(
            &format!(
                "UPDATE {} SET data = ?1, mediaId = COALESCE(?2, mediaId), mtime = ?3
                 WHERE chatId = ?4 AND messageId = ?5",
                table.name()
            ),
            params![
                json,
                media.map(|m| m.media_id.as_str()),
                crate::time::now_iso(),
                chat_id,
                message_id
            ],
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to store link preview: {}", e)))?;

        tx.commit()
            .map_err(|e| Error::DatabaseError(format!("Failed to commit link preview: {}", e)))?;
        Ok(true)
    }

    fn query_messages(
        &self,
        table: MessageTable,
        condition: &str,
        args: &[&dyn ToSql],
    ) -> Result<Vec<MessageRecord>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM {} AS m WHERE {}",
            table.columns("m"),
            table.name(),
            condition
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(args, |row| message_from_row(row, 0))
            .map_err(|e| Error::DatabaseError(format!("Failed to query messages: {}", e)))?;

        collect_rows(rows)
    }

    // ========================================================================
    // DIRECT MESSAGE OPERATIONS
    // ========================================================================

    /// Insert a direct message
    pub fn add_message(&self, record: &MessageRecord) -> Result<()> {
        self.add_message_in(MessageTable::Direct, record)
    }

    /// Load a direct message
    pub fn get_message(&self, chat_id: &str, message_id: &str) -> Result<Option<MessageRecord>> {
        self.get_message_in(MessageTable::Direct, chat_id, message_id)
    }

    /// Patch a direct message
    pub fn update_saved_message(
        &self,
        chat_id: &str,
        message_id: &str,
        update: &MessageUpdate,
    ) -> Result<bool> {
        self.update_message_in(MessageTable::Direct, chat_id, message_id, update)
    }

    /// Load the newest direct messages of a chat
    pub fn get_latest_messages(&self, chat_id: &str, limit: usize) -> Result<Vec<LoadedMessage>> {
        self.get_latest_messages_in(MessageTable::Direct, chat_id, limit)
    }

    /// Hard-delete a direct message
    pub fn permanently_delete_message(&self, chat_id: &str, message_id: &str) -> Result<bool> {
        self.permanently_delete_message_in(MessageTable::Direct, chat_id, message_id)
    }

    /// Tombstone a direct message
    pub fn clean_delete_message(&self, chat_id: &str, message_id: &str) -> Result<CleanDelete> {
        self.clean_delete_message_in(MessageTable::Direct, chat_id, message_id)
    }

    /// All journaled direct messages, oldest first
    pub fn get_unsent(&self) -> Result<Vec<MessageRecord>> {
        self.query_messages(
            MessageTable::Direct,
            "m.messageStatus = ?1 ORDER BY m.timestamp ASC",
            &[&MessageStatus::Journaled.as_str()],
        )
    }

    /// Drop every journaled direct message
    pub fn delete_unsent(&self) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM lineMessages WHERE messageStatus = ?1",
            params![MessageStatus::Journaled.as_str()],
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to delete unsent messages: {}", e)))
    }

    /// Expired direct messages
    pub fn get_expired_messages(&self, now: &str) -> Result<Vec<MessageRecord>> {
        self.get_expired_messages_in(MessageTable::Direct, now)
    }

    /// Newest direct message of a given type in a chat
    pub fn get_last_message_of_type(
        &self,
        chat_id: &str,
        content_type: ContentType,
    ) -> Result<Option<MessageRecord>> {
        let mut found = self.query_messages(
            MessageTable::Direct,
            "m.chatId = ?1 AND m.contentType = ?2 ORDER BY m.timestamp DESC LIMIT 1",
            &[&chat_id, &content_type.code()],
        )?;
        Ok(found.pop())
    }

    /// Every message id in a direct chat
    pub fn get_all_message_ids_in_chat(&self, chat_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT messageId FROM lineMessages WHERE chatId = ?1 ORDER BY timestamp ASC")
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let ids = stmt
            .query_map(params![chat_id], |row| row.get(0))
            .map_err(|e| Error::DatabaseError(format!("Failed to query message ids: {}", e)))?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(|e| Error::DatabaseError(format!("Failed to read message id: {}", e)))?;

        Ok(ids)
    }

    // ========================================================================
    // GROUP MESSAGE OPERATIONS
    // ========================================================================

    /// Insert a group message
    pub fn add_group_message(&self, record: &MessageRecord) -> Result<()> {
        self.add_message_in(MessageTable::Group, record)
    }

    /// Load a group message
    pub fn get_group_message(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> Result<Option<MessageRecord>> {
        self.get_message_in(MessageTable::Group, chat_id, message_id)
    }

    /// Patch a group message
    pub fn update_group_message(
        &self,
        chat_id: &str,
        message_id: &str,
        update: &MessageUpdate,
    ) -> Result<bool> {
        self.update_message_in(MessageTable::Group, chat_id, message_id, update)
    }

    /// Load the newest group messages of a chat
    pub fn get_latest_group_messages(
        &self,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<LoadedMessage>> {
        self.get_latest_messages_in(MessageTable::Group, chat_id, limit)
    }

    /// Hard-delete a group message
    pub fn permanently_delete_group_message(&self, chat_id: &str, message_id: &str) -> Result<bool> {
        self.permanently_delete_message_in(MessageTable::Group, chat_id, message_id)
    }

    /// Tombstone a group message
    pub fn clean_delete_group_message(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> Result<CleanDelete> {
        self.clean_delete_message_in(MessageTable::Group, chat_id, message_id)
    }

    /// Expired group messages
    pub fn get_expired_group_messages(&self, now: &str) -> Result<Vec<MessageRecord>> {
        self.get_expired_messages_in(MessageTable::Group, now)
    }

    // ========================================================================
    // REACTION OPERATIONS
    // ========================================================================

    /// Set or clear one sender's reaction on a message
    ///
    /// An empty `reaction` removes the sender's reaction. `hasReaction` on
    /// the message is recomputed in the same transaction. Returns false
    /// when the message does not exist.
    pub fn set_reaction_in(
        &self,
        table: MessageTable,
        chat_id: &str,
        message_id: &str,
        sender_id: &str,
        reaction: &str,
    ) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        let exists = tx
            .query_row(
                &format!(
                    "SELECT 1 FROM {} WHERE chatId = ?1 AND messageId = ?2",
                    table.name()
                ),
                params![chat_id, message_id],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| Error::DatabaseError(format!("Failed to read message: {}", e)))?
            .is_some();

        if !exists {
            return Ok(false);
        }

        let stored = if reaction.is_empty() {
            tx.execute(
                "DELETE FROM reactions WHERE chatId = ?1 AND messageId = ?2 AND senderId = ?3",
                params![chat_id, message_id, sender_id],
            )
        } else {
            tx.execute(
                "INSERT OR REPLACE INTO reactions (chatId, messageId, senderId, reaction, updatedOn)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![chat_id, message_id, sender_id, reaction, crate::time::now_iso()],
            )
        };
        stored.map_err(|e| Error::DatabaseError(format!("Failed to store reaction: {}", e)))?;

        tx.execute(
            &format!(
                "UPDATE {} SET hasReaction = EXISTS(
                    SELECT 1 FROM reactions WHERE chatId = ?1 AND messageId = ?2
                 )
                 WHERE chatId = ?1 AND messageId = ?2",
                table.name()
            ),
            params![chat_id, message_id],
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to update reaction flag: {}", e)))?;

        tx.commit()
            .map_err(|e| Error::DatabaseError(format!("Failed to commit reaction: {}", e)))?;
        Ok(true)
    }

    /// All reactions on a message
    pub fn get_reactions(&self, chat_id: &str, message_id: &str) -> Result<Vec<ReactionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT chatId, messageId, senderId, reaction, updatedOn
                 FROM reactions WHERE chatId = ?1 AND messageId = ?2
                 ORDER BY updatedOn ASC",
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let reactions = stmt
            .query_map(params![chat_id, message_id], |row| {
                Ok(ReactionRecord {
                    chat_id: row.get(0)?,
                    message_id: row.get(1)?,
                    sender_id: row.get(2)?,
                    reaction: row.get(3)?,
                    updated_on: row.get(4)?,
                })
            })
            .map_err(|e| Error::DatabaseError(format!("Failed to query reactions: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::DatabaseError(format!("Failed to read reaction: {}", e)))?;

        Ok(reactions)
    }
}

// ============================================================================
// ROW HELPERS
// ============================================================================

fn insert_message(conn: &Connection, table: MessageTable, record: &MessageRecord) -> Result<()> {
    let data = record.data.to_json()?;
    let code = record.content_type.code();
    let status = record.message_status.as_str();

    let mut values: Vec<&dyn ToSql> = vec![
        &record.chat_id,
        &record.message_id,
        &code,
        &data,
        &record.sender,
        &record.timestamp,
        &record.mtime,
        &status,
        &record.reply_id,
        &record.media_id,
        &record.expires_on,
        &record.should_ack,
        &record.has_reaction,
        &record.delivered_timestamp,
        &record.read_timestamp,
        &record.visible,
    ];

    let (member_column, member_param) = match table {
        MessageTable::Direct => ("", ""),
        MessageTable::Group => {
            values.push(&record.member_id);
            (", memberId", ", ?17")
        }
    };

    let sql = format!(
        "INSERT INTO {} (chatId, messageId, contentType, data, sender, timestamp, mtime,
            messageStatus, replyId, mediaId, expiresOn, shouldAck, hasReaction,
            deliveredTimestamp, readTimestamp, visible{})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16{})",
        table.name(),
        member_column,
        member_param
    );

    match conn.execute(&sql, values.as_slice()) {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(Error::DuplicateMessage {
                chat_id: record.chat_id.clone(),
                message_id: record.message_id.clone(),
            })
        }
        Err(e) => Err(Error::DatabaseError(format!("Failed to store message: {}", e))),
    }
}

fn conversion_error(index: usize, err: Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn content_type_at(row: &Row, index: usize) -> rusqlite::Result<ContentType> {
    let code: u32 = row.get(index)?;
    ContentType::from_code(code).ok_or_else(|| conversion_error(index, Error::UnknownContentType(code)))
}

fn message_from_row(row: &Row, offset: usize) -> rusqlite::Result<MessageRecord> {
    let content_type = content_type_at(row, offset + 2)?;
    let data: String = row.get(offset + 3)?;
    let status: String = row.get(offset + 8)?;
    let message_status = MessageStatus::parse(&status).ok_or_else(|| {
        conversion_error(
            offset + 8,
            Error::StorageCorrupted(format!("unknown message status {}", status)),
        )
    })?;

    Ok(MessageRecord {
        chat_id: row.get(offset)?,
        message_id: row.get(offset + 1)?,
        content_type,
        data: MessageData::from_json(content_type, &data),
        sender: row.get(offset + 4)?,
        member_id: row.get(offset + 5)?,
        timestamp: row.get(offset + 6)?,
        mtime: row.get(offset + 7)?,
        message_status,
        reply_id: row.get(offset + 9)?,
        media_id: row.get(offset + 10)?,
        expires_on: row.get(offset + 11)?,
        should_ack: row.get(offset + 12)?,
        has_reaction: row.get(offset + 13)?,
        delivered_timestamp: row.get(offset + 14)?,
        read_timestamp: row.get(offset + 15)?,
        visible: row.get(offset + 16)?,
    })
}

fn reply_from_row(row: &Row, offset: usize) -> rusqlite::Result<Option<ReplyContent>> {
    let message_id: Option<String> = row.get(offset)?;
    let Some(message_id) = message_id else {
        return Ok(None);
    };

    let code: u32 = row.get(offset + 1)?;
    let Some(content_type) = ContentType::from_code(code) else {
        return Ok(None);
    };
    let data: String = row.get(offset + 2)?;

    Ok(Some(ReplyContent {
        message_id,
        content_type,
        data: MessageData::from_json(content_type, &data),
        sender: row.get(offset + 3)?,
        member_id: row.get(offset + 4)?,
    }))
}

/// Collect mapped rows, skipping rows whose content type or status is unreadable
fn collect_rows<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        match row {
            Ok(item) => out.push(item),
            Err(e @ rusqlite::Error::FromSqlConversionFailure(..)) => {
                tracing::warn!("Skipping unreadable message row: {}", e);
            }
            Err(e) => return Err(Error::DatabaseError(format!("Failed to read row: {}", e))),
        }
    }
    Ok(out)
}

// ============================================================================
// TESTS
// ============================================================================
