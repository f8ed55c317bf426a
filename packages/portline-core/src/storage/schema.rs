//! # Database Schema
//!
//! SQL schema definitions for the Portline database.
//!
//! ## Schema Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         DATABASE SCHEMA                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐    ┌─────────────────┐      ┌─────────────────┐    │
//! │  │  connections    │    │  permissions    │      │  lineMessages   │    │
//! │  ├─────────────────┤    ├─────────────────┤      ├─────────────────┤    │
//! │  │ chatId          │    │ permissionsId   │      │ chatId   ┐ PK   │    │
//! │  │ permissionsId   │───►│ autoDownload    │      │ messageId┘      │    │
//! │  │ text            │    │ readReceipts    │      │ contentType     │    │
//! │  │ latestMessageId │    │ disappearing…   │      │ data (JSON)     │    │
//! │  │ readStatus      │    │ …               │      │ replyId ─ ─ ─ ─ │─ ┐ │
//! │  └─────────────────┘    └─────────────────┘      │ mediaId         │──┐ │
//! │                                                  │ messageStatus   │  │ │
//! │  ┌─────────────────┐    ┌─────────────────┐      │ expiresOn       │  │ │
//! │  │   reactions     │    │     media       │◄─────│ visible         │  │ │
//! │  ├─────────────────┤    ├─────────────────┤      └─────────────────┘  │ │
//! │  │ chatId          │    │ mediaId         │◄──────────────────────────┘ │
//! │  │ messageId       │    │ chatId          │      groupMessages: same    │
//! │  │ senderId        │    │ messageId       │      columns + memberId     │
//! │  │ reaction        │    │ filePath        │                             │
//! │  └─────────────────┘    └─────────────────┘      replyId is weak (no FK)│
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

-- Direct chat messages
-- One row per (chatId, messageId). Outgoing rows start journaled.
CREATE TABLE IF NOT EXISTS lineMessages (
    chatId TEXT NOT NULL,
    messageId TEXT NOT NULL,
    -- Numeric ContentType code
    contentType INTEGER NOT NULL,
    -- JSON payload, decoded per content type
    data TEXT NOT NULL,
    -- 1 if this device sent the message
    sender INTEGER NOT NULL,
    -- ISO-8601 send/receive time, used for ordering
    timestamp TEXT NOT NULL,
    -- Last modification time
    mtime TEXT,
    messageStatus TEXT NOT NULL,
    -- Weak reference to another message in the same chat
    replyId TEXT,
    mediaId TEXT,
    -- Hard-delete deadline for disappearing messages
    expiresOn TEXT,
    shouldAck INTEGER NOT NULL DEFAULT 0,
    hasReaction INTEGER NOT NULL DEFAULT 0,
    -- Set once, never overwritten
    deliveredTimestamp TEXT,
    readTimestamp TEXT,
    -- 0 for journaled signaling rows (deletion, edit, reaction intents)
    visible INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (chatId, messageId)
);
CREATE INDEX IF NOT EXISTS idx_line_messages_chat ON lineMessages(chatId, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_line_messages_status ON lineMessages(messageStatus);
CREATE INDEX IF NOT EXISTS idx_line_messages_expiry ON lineMessages(expiresOn) WHERE expiresOn IS NOT NULL;

-- Group chat messages
-- Same layout as lineMessages plus the sending member.
CREATE TABLE IF NOT EXISTS groupMessages (
    chatId TEXT NOT NULL,
    messageId TEXT NOT NULL,
    contentType INTEGER NOT NULL,
    data TEXT NOT NULL,
    sender INTEGER NOT NULL,
    -- Group member who sent it (NULL for our own messages)
    memberId TEXT,
    timestamp TEXT NOT NULL,
    mtime TEXT,
    messageStatus TEXT NOT NULL,
    replyId TEXT,
    mediaId TEXT,
    expiresOn TEXT,
    shouldAck INTEGER NOT NULL DEFAULT 0,
    hasReaction INTEGER NOT NULL DEFAULT 0,
    deliveredTimestamp TEXT,
    readTimestamp TEXT,
    visible INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (chatId, messageId)
);
CREATE INDEX IF NOT EXISTS idx_group_messages_chat ON groupMessages(chatId, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_group_messages_expiry ON groupMessages(expiresOn) WHERE expiresOn IS NOT NULL;

-- Per-chat settings
-- Shared by every chat that points at the same permissionsId.
CREATE TABLE IF NOT EXISTS permissions (
    permissionsId TEXT PRIMARY KEY,
    autoDownload INTEGER NOT NULL DEFAULT 1,
    contactSharing INTEGER NOT NULL DEFAULT 1,
    -- Timeout in seconds, 0 = off
    disappearingMessages INTEGER NOT NULL DEFAULT 0,
    displayPicture INTEGER NOT NULL DEFAULT 1,
    notifications INTEGER NOT NULL DEFAULT 1,
    readReceipts INTEGER NOT NULL DEFAULT 1,
    focus INTEGER NOT NULL DEFAULT 1,
    favourite INTEGER NOT NULL DEFAULT 0,
    calling INTEGER NOT NULL DEFAULT 1
);

-- Media attached to messages (uploads, downloads, link preview images)
CREATE TABLE IF NOT EXISTS media (
    mediaId TEXT PRIMARY KEY,
    chatId TEXT NOT NULL,
    messageId TEXT NOT NULL,
    createdOn TEXT NOT NULL,
    -- Numeric ContentType code
    type INTEGER,
    name TEXT,
    -- Relative to the media dir; NULL until the bytes are local
    filePath TEXT
);
CREATE INDEX IF NOT EXISTS idx_media_message ON media(chatId, messageId);

-- Chat list
-- One summary row per chat, updated as messages arrive or change.
CREATE TABLE IF NOT EXISTS connections (
    chatId TEXT PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    -- 'direct' or 'group'
    kind TEXT NOT NULL DEFAULT 'direct',
    permissionsId TEXT NOT NULL,
    text TEXT,
    recentMessageType INTEGER,
    latestMessageId TEXT,
    timestamp TEXT,
    readStatus TEXT,
    newMessageCount INTEGER NOT NULL DEFAULT 0
);

-- Reactions
-- One reaction per sender per message.
CREATE TABLE IF NOT EXISTS reactions (
    chatId TEXT NOT NULL,
    messageId TEXT NOT NULL,
    senderId TEXT NOT NULL,
    reaction TEXT NOT NULL,
    updatedOn TEXT NOT NULL,
    PRIMARY KEY (chatId, messageId, senderId)
);
"#;
