//! # Permissions
//!
//! Per-chat settings. Several chats may share one permissions row
//! through the same `permissionsId`.
//!
//! ```text
//! ┌──────────────────────┬─────────┬──────────────────────────────────────┐
//! │ Field                │ Default │ Read by                              │
//! ├──────────────────────┼─────────┼──────────────────────────────────────┤
//! │ autoDownload         │ true    │ receive: download incoming media     │
//! │ contactSharing       │ true    │ host                                 │
//! │ disappearingMessages │ 0 (off) │ send + receive: expiresOn            │
//! │ displayPicture       │ true    │ host                                 │
//! │ notifications        │ true    │ host                                 │
//! │ readReceipts         │ true    │ receive: shouldAck                   │
//! │ focus                │ true    │ host                                 │
//! │ favourite            │ false   │ host                                 │
//! │ calling              │ true    │ host                                 │
//! └──────────────────────┴─────────┴──────────────────────────────────────┘
//! ```

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::Database;
use crate::error::{Error, Result};

/// Settings of a chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    /// Download incoming media automatically
    pub auto_download: bool,
    /// Allow contact sharing in this chat
    pub contact_sharing: bool,
    /// Disappearing-message timeout in seconds (0 = off)
    pub disappearing_messages: u64,
    /// Show the peer's display picture
    pub display_picture: bool,
    /// Deliver notifications
    pub notifications: bool,
    /// Send read receipts for incoming messages
    pub read_receipts: bool,
    /// Include in focus mode
    pub focus: bool,
    /// Pinned as favourite
    pub favourite: bool,
    /// Allow calls
    pub calling: bool,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            auto_download: true,
            contact_sharing: true,
            disappearing_messages: 0,
            display_picture: true,
            notifications: true,
            read_receipts: true,
            focus: true,
            favourite: false,
            calling: true,
        }
    }
}

/// Partial permissions patch (`None` = leave unchanged)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermissionsUpdate {
    /// See [`Permissions::auto_download`]
    pub auto_download: Option<bool>,
    /// See [`Permissions::contact_sharing`]
    pub contact_sharing: Option<bool>,
    /// See [`Permissions::disappearing_messages`]
    pub disappearing_messages: Option<u64>,
    /// See [`Permissions::display_picture`]
    pub display_picture: Option<bool>,
    /// See [`Permissions::notifications`]
    pub notifications: Option<bool>,
    /// See [`Permissions::read_receipts`]
    pub read_receipts: Option<bool>,
    /// See [`Permissions::focus`]
    pub focus: Option<bool>,
    /// See [`Permissions::favourite`]
    pub favourite: Option<bool>,
    /// See [`Permissions::calling`]
    pub calling: Option<bool>,
}

const PERMISSION_COLUMNS: &str = "autoDownload, contactSharing, disappearingMessages, \
    displayPicture, notifications, readReceipts, focus, favourite, calling";

fn permissions_from_row(row: &Row) -> rusqlite::Result<Permissions> {
    let timeout: i64 = row.get(2)?;
    Ok(Permissions {
        auto_download: row.get(0)?,
        contact_sharing: row.get(1)?,
        disappearing_messages: u64::try_from(timeout).unwrap_or(0),
        display_picture: row.get(3)?,
        notifications: row.get(4)?,
        read_receipts: row.get(5)?,
        focus: row.get(6)?,
        favourite: row.get(7)?,
        calling: row.get(8)?,
    })
}

fn timeout_to_sql(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

pub(super) fn insert_permissions(
    conn: &Connection,
    permissions_id: &str,
    permissions: &Permissions,
) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO permissions (permissionsId, {})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            PERMISSION_COLUMNS
        ),
        params![
            permissions_id,
            permissions.auto_download,
            permissions.contact_sharing,
            timeout_to_sql(permissions.disappearing_messages),
            permissions.display_picture,
            permissions.notifications,
            permissions.read_receipts,
            permissions.focus,
            permissions.favourite,
            permissions.calling,
        ],
    )
    .map_err(|e| Error::DatabaseError(format!("Failed to add permissions: {}", e)))?;
    Ok(())
}

impl Database {
    // ========================================================================
    // PERMISSIONS OPERATIONS
    // ========================================================================

    /// Store a permissions row
    pub fn add_permission_entry(&self, permissions_id: &str, permissions: &Permissions) -> Result<()> {
        let conn = self.conn.lock();
        insert_permissions(&conn, permissions_id, permissions)
    }

    /// Load a permissions row, falling back to defaults when it is missing
    pub fn get_permissions(&self, permissions_id: &str) -> Result<Permissions> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                &format!(
                    "SELECT {} FROM permissions WHERE permissionsId = ?1",
                    PERMISSION_COLUMNS
                ),
                params![permissions_id],
                permissions_from_row,
            )
            .optional()
            .map_err(|e| Error::DatabaseError(format!("Failed to get permissions: {}", e)))?;

        Ok(found.unwrap_or_default())
    }

    /// Permissions of a chat, via its connection row; defaults if either is missing
    pub fn get_chat_permissions(&self, chat_id: &str) -> Result<Permissions> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                &format!(
                    "SELECT {} FROM permissions
                     JOIN connections ON connections.permissionsId = permissions.permissionsId
                     WHERE connections.chatId = ?1",
                    PERMISSION_COLUMNS
                ),
                params![chat_id],
                permissions_from_row,
            )
            .optional()
            .map_err(|e| Error::DatabaseError(format!("Failed to get chat permissions: {}", e)))?;

        Ok(found.unwrap_or_default())
    }

    /// Apply a partial patch; returns false when the row does not exist
    pub fn update_permissions(
        &self,
        permissions_id: &str,
        update: &PermissionsUpdate,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE permissions SET
                    autoDownload = COALESCE(?1, autoDownload),
                    contactSharing = COALESCE(?2, contactSharing),
                    disappearingMessages = COALESCE(?3, disappearingMessages),
                    displayPicture = COALESCE(?4, displayPicture),
                    notifications = COALESCE(?5, notifications),
                    readReceipts = COALESCE(?6, readReceipts),
                    focus = COALESCE(?7, focus),
                    favourite = COALESCE(?8, favourite),
                    calling = COALESCE(?9, calling)
                 WHERE permissionsId = ?10",
                params![
                    update.auto_download,
                    update.contact_sharing,
                    update.disappearing_messages.map(timeout_to_sql),
                    update.display_picture,
                    update.notifications,
                    update.read_receipts,
                    update.focus,
                    update.favourite,
                    update.calling,
                    permissions_id,
                ],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to update permissions: {}", e)))?;
        Ok(rows > 0)
    }

    /// Delete a permissions row
    pub fn clear_permissions(&self, permissions_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM permissions WHERE permissionsId = ?1",
                params![permissions_id],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to clear permissions: {}", e)))?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_permissions_use_defaults() {
        let db = Database::open(None).await.unwrap();
        let perms = db.get_permissions("nope").unwrap();
        assert_eq!(perms, Permissions::default());
        assert!(perms.read_receipts);
        assert!(!perms.favourite);
        assert_eq!(perms.disappearing_messages, 0);
    }

    #[tokio::test]
    async fn test_partial_update() {
        let db = Database::open(None).await.unwrap();
        db.add_permission_entry("p1", &Permissions::default()).unwrap();

        let updated = db
            .update_permissions(
                "p1",
                &PermissionsUpdate {
                    disappearing_messages: Some(3600),
                    read_receipts: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(updated);

        let perms = db.get_permissions("p1").unwrap();
        assert_eq!(perms.disappearing_messages, 3600);
        assert!(!perms.read_receipts);
        assert!(perms.auto_download);

        assert!(!db
            .update_permissions("p2", &PermissionsUpdate::default())
            .unwrap());
    }

    #[tokio::test]
    async fn test_clear_permissions() {
        let db = Database::open(None).await.unwrap();
        let custom = Permissions {
            favourite: true,
            ..Default::default()
        };
        db.add_permission_entry("p1", &custom).unwrap();
        assert!(db.get_permissions("p1").unwrap().favourite);

        assert!(db.clear_permissions("p1").unwrap());
        assert!(!db.get_permissions("p1").unwrap().favourite);
    }

    #[test]
    fn test_update_deserializes_partial_json() {
        let update: PermissionsUpdate =
            serde_json::from_str(r#"{"autoDownload": false}"#).unwrap();
        assert_eq!(update.auto_download, Some(false));
        assert!(update.calling.is_none());
    }
}
