//! Media rows: one per attachment or link-preview image.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::Database;
use crate::error::{Error, Result};
use crate::messaging::ContentType;

/// A stored media row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    /// Media id
    pub media_id: String,
    /// Owning chat
    pub chat_id: String,
    /// Message the media belongs to
    pub message_id: String,
    /// When the row was created (ISO-8601)
    pub created_on: String,
    /// Content type of the owning message
    pub media_type: Option<ContentType>,
    /// Display file name
    pub name: Option<String>,
    /// Local path relative to the media dir, once downloaded
    pub file_path: Option<String>,
}

impl MediaRecord {
    /// A fresh row with no file yet
    pub fn new(
        media_id: impl Into<String>,
        chat_id: impl Into<String>,
        message_id: impl Into<String>,
        created_on: impl Into<String>,
    ) -> Self {
        Self {
            media_id: media_id.into(),
            chat_id: chat_id.into(),
            message_id: message_id.into(),
            created_on: created_on.into(),
            media_type: None,
            name: None,
            file_path: None,
        }
    }
}

/// Partial media update (`None` = leave unchanged)
#[derive(Debug, Clone, Default)]
pub struct MediaUpdate {
    /// New type
    pub media_type: Option<ContentType>,
    /// New name
    pub name: Option<String>,
    /// New local path
    pub file_path: Option<String>,
}

impl Database {
    /// Create a media row linking `media_id` to a message
    pub fn save_new_media(
        &self,
        media_id: &str,
        chat_id: &str,
        message_id: &str,
        created_on: &str,
    ) -> Result<()> {
        let conn = self.conn.lock();
        insert_media(
            &conn,
            &MediaRecord::new(media_id, chat_id, message_id, created_on),
        )
    }

    /// Patch a media row
    pub fn update_media(&self, media_id: &str, update: &MediaUpdate) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE media SET
                    type = COALESCE(?1, type),
                    name = COALESCE(?2, name),
                    filePath = COALESCE(?3, filePath)
                 WHERE mediaId = ?4",
                params![
                    update.media_type.map(|t| t.code()),
                    update.name,
                    update.file_path,
                    media_id
                ],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to update media: {}", e)))?;
        Ok(rows > 0)
    }

    /// Load a media row
    pub fn get_media(&self, media_id: &str) -> Result<Option<MediaRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT mediaId, chatId, messageId, createdOn, type, name, filePath
             FROM media WHERE mediaId = ?1",
            params![media_id],
            |row| {
                let code: Option<u32> = row.get(4)?;
                Ok(MediaRecord {
                    media_id: row.get(0)?,
                    chat_id: row.get(1)?,
                    message_id: row.get(2)?,
                    created_on: row.get(3)?,
                    media_type: code.and_then(ContentType::from_code),
                    name: row.get(5)?,
                    file_path: row.get(6)?,
                })
            },
        )
        .optional()
        .map_err(|e| Error::DatabaseError(format!("Failed to get media: {}", e)))
    }

    /// Delete a media row, returning its local path once nothing else uses it
    pub fn delete_media(&self, media_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        take_media(&conn, media_id)
    }
}

pub(super) fn insert_media(conn: &Connection, media: &MediaRecord) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO media (mediaId, chatId, messageId, createdOn, type, name, filePath)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            media.media_id,
            media.chat_id,
            media.message_id,
            media.created_on,
            media.media_type.map(|t| t.code()),
            media.name,
            media.file_path,
        ],
    )
    .map_err(|e| Error::DatabaseError(format!("Failed to save media: {}", e)))?;
    Ok(())
}

/// Delete a media row; the path comes back only when no other row uses it
pub(super) fn take_media(conn: &Connection, media_id: &str) -> Result<Option<String>> {
    let file_path: Option<Option<String>> = conn
        .query_row(
            "SELECT filePath FROM media WHERE mediaId = ?1",
            params![media_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::DatabaseError(format!("Failed to read media: {}", e)))?;

    conn.execute("DELETE FROM media WHERE mediaId = ?1", params![media_id])
        .map_err(|e| Error::DatabaseError(format!("Failed to delete media: {}", e)))?;

    let Some(file_path) = file_path.flatten() else {
        return Ok(None);
    };
    let shared: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM media WHERE filePath = ?1",
            params![file_path],
            |row| row.get(0),
        )
        .map_err(|e| Error::DatabaseError(format!("Failed to count media references: {}", e)))?;

    Ok((shared == 0).then_some(file_path))
}
