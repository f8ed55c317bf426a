//! # Receive Pipeline
//!
//! Decrypted payloads from the transport are parsed, classified into a
//! [`ReceiveAction`] and applied to the local store.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        RECEIVE PIPELINE                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  decrypted bytes                                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  WireMessage::decode ──► validate ──► ReceiveAction::classify           │
//! │       (bad envelope,      (null data,    (exhaustive match)             │
//! │        dropped)           unknown type,                                 │
//! │                           wrong shape:                                  │
//! │                           no writes)                                    │
//! │                                                 │                       │
//! │       ┌──────────┬──────────┬──────────┬────────┴──┬─────────┬──────┐  │
//! │       ▼          ▼          ▼          ▼           ▼         ▼      ▼  │
//! │  NewMessage    Link     Deletion     Edit      Reaction  Receipt  Disap.│
//! │   insert     insert +  tombstone  replace     reactions  delivery timer │
//! │   + media    preview   + CAS      text + CAS  table      / read   + msg │
//! │       │          │          │          │                         │      │
//! │       └──────────┴──────────┴──────────┴─────► connection summary ◄┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Errors never leave [`ReceivePipeline::on_message_received`]; they are
//! logged with a level matching their cause.

use std::path::PathBuf;
use std::sync::Arc;

use super::content::{ContentType, MessageData, MessageStatus, PEER_REACTION_ID};
use super::link_preview::LinkEnricher;
use super::media::{remove_media_file, stored_file_name, MediaClient};
use super::preview::{connection_text, DELETED_MESSAGE_TEXT};
use super::transport::WireMessage;
use crate::config::LinkPreviewMode;
use crate::error::{Error, Result};
use crate::storage::{
    CleanDelete, Database, MediaRecord, MediaUpdate, MessageRecord, MessageTable, MessageUpdate,
    PermissionsUpdate, SummaryUpdate,
};

/// A validated incoming message
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    /// Direct or group table
    pub table: MessageTable,
    /// Owning chat
    pub chat_id: String,
    /// Sending member (group chats)
    pub member_id: Option<String>,
    /// Sender-generated id
    pub message_id: String,
    /// Content type
    pub content_type: ContentType,
    /// Decoded payload
    pub data: MessageData,
    /// Message this one replies to
    pub reply_id: Option<String>,
    /// Sender's timestamp, normalized to ISO-8601 UTC
    pub timestamp: String,
    /// Sender-provided expiry
    pub expires_on: Option<String>,
}

impl IncomingMessage {
    /// Parse and validate a wire message
    ///
    /// Fails without touching the store when the content type is unknown,
    /// the data is null or the data does not fit the content type.
    pub fn from_wire(
        table: MessageTable,
        chat_id: &str,
        member_id: Option<&str>,
        wire: WireMessage,
    ) -> Result<Self> {
        let content_type = ContentType::from_code(wire.content_type)
            .ok_or(Error::UnknownContentType(wire.content_type))?;

        if wire.message_id.is_empty() {
            return Err(Error::InvalidMessageContent("missing message id".into()));
        }
        if wire.data.is_null() {
            return Err(Error::EmptyContent(wire.message_id));
        }

        let data = MessageData::decode(content_type, wire.data);
        data.validate_for(content_type)?;

        let expires_on = wire
            .expires_on
            .as_deref()
            .and_then(crate::time::parse_iso)
            .map(crate::time::format_iso);

        Ok(Self {
            table,
            chat_id: chat_id.to_string(),
            member_id: member_id.map(str::to_string),
            message_id: wire.message_id,
            content_type,
            data,
            reply_id: wire.reply_id.filter(|r| !r.is_empty()),
            timestamp: crate::time::normalize_iso(wire.timestamp.as_deref()),
            expires_on,
        })
    }
}

// ============================================================================
// RECEIVE ACTIONS
// ============================================================================

/// What an incoming message does to local state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveAction {
    /// Store it as a new chat message
    NewMessage,
    /// Store it, then fetch its link preview
    Link,
    /// Tombstone the referenced message
    Deletion,
    /// Replace the text of the referenced message
    Edit,
    /// Set or clear a reaction
    Reaction,
    /// Mark delivery / read on one of our messages
    Receipt,
    /// Change the chat's disappearing-messages timer
    DisappearingMessages,
}

impl ReceiveAction {
    /// The action for a content type
    pub fn classify(content_type: ContentType) -> Self {
        match content_type {
            ContentType::Text
            | ContentType::Image
            | ContentType::Video
            | ContentType::File
            | ContentType::AudioRecording
            | ContentType::ContactBundle
            | ContentType::ContactBundleRequest
            | ContentType::ContactBundleResponse
            | ContentType::ContactPortBundle
            | ContentType::NameChange
            | ContentType::InitialInfoRequest => Self::NewMessage,
            ContentType::Link => Self::Link,
            ContentType::Deleted => Self::Deletion,
            ContentType::Edited => Self::Edit,
            ContentType::Reaction => Self::Reaction,
            ContentType::Receipt => Self::Receipt,
            ContentType::DisappearingMessages => Self::DisappearingMessages,
        }
    }

    /// Chat-list text for the message; empty for actions that add no message
    pub fn generate_preview_text(&self, content_type: ContentType, data: &MessageData) -> String {
        match self {
            Self::Deletion | Self::Edit | Self::Reaction | Self::Receipt => String::new(),
            Self::NewMessage | Self::Link | Self::DisappearingMessages => {
                connection_text(content_type, data)
            }
        }
    }

    /// Apply the message to local state
    pub async fn perform_action(
        &self,
        pipeline: &ReceivePipeline,
        message: &IncomingMessage,
    ) -> Result<()> {
        match self {
            Self::NewMessage => store_new_message(pipeline, message, *self).await.map(|_| ()),
            Self::Link => receive_link(pipeline, message).await,
            Self::Deletion => apply_deletion(pipeline, message).await,
            Self::Edit => apply_edit(pipeline, message),
            Self::Reaction => apply_reaction(pipeline, message),
            Self::Receipt => apply_receipt(pipeline, message),
            Self::DisappearingMessages => apply_disappearing(pipeline, message).await,
        }
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Entry point for decrypted incoming payloads
pub struct ReceivePipeline {
    db: Arc<Database>,
    media: Arc<dyn MediaClient>,
    enricher: Arc<LinkEnricher>,
    media_dir: PathBuf,
    mode: LinkPreviewMode,
}

impl ReceivePipeline {
    /// Create a pipeline
    pub fn new(
        db: Arc<Database>,
        media: Arc<dyn MediaClient>,
        enricher: Arc<LinkEnricher>,
        media_dir: PathBuf,
        mode: LinkPreviewMode,
    ) -> Self {
        Self {
            db,
            media,
            enricher,
            media_dir,
            mode,
        }
    }

    /// Handle a payload from a direct chat
    pub async fn on_message_received(&self, chat_id: &str, payload: &[u8]) {
        self.dispatch(MessageTable::Direct, chat_id, None, payload)
            .await
    }

    /// Handle a payload from a group chat
    pub async fn on_group_message_received(&self, chat_id: &str, member_id: &str, payload: &[u8]) {
        self.dispatch(MessageTable::Group, chat_id, Some(member_id), payload)
            .await
    }

    async fn dispatch(
        &self,
        table: MessageTable,
        chat_id: &str,
        member_id: Option<&str>,
        payload: &[u8],
    ) {
        match self.receive(table, chat_id, member_id, payload).await {
            Ok(()) => {}
            Err(e @ Error::UnknownContentType(_)) => {
                tracing::error!("Dropping message in chat {}: {}", chat_id, e)
            }
            Err(
                e @ (Error::EmptyContent(_)
                | Error::InvalidMessageContent(_)
                | Error::DeserializationError(_)),
            ) => tracing::warn!("Rejected message in chat {}: {}", chat_id, e),
            Err(e) => tracing::error!("Failed to apply message in chat {}: {}", chat_id, e),
        }
    }

    async fn receive(
        &self,
        table: MessageTable,
        chat_id: &str,
        member_id: Option<&str>,
        payload: &[u8],
    ) -> Result<()> {
        let wire = WireMessage::decode(payload)?;
        let message = IncomingMessage::from_wire(table, chat_id, member_id, wire)?;
        let action = ReceiveAction::classify(message.content_type);

        tracing::debug!(
            "Received {} message {} in chat {} ({:?})",
            message.content_type,
            message.message_id,
            chat_id,
            action
        );

        action.perform_action(self, &message).await
    }
}

// ============================================================================
// ACTIONS
// ============================================================================

/// Insert a new message; `None` when it was already stored
async fn store_new_message(
    pipeline: &ReceivePipeline,
    message: &IncomingMessage,
    action: ReceiveAction,
) -> Result<Option<MessageRecord>> {
    let db = &pipeline.db;
    let permissions = db.get_chat_permissions(&message.chat_id)?;

    let mut data = message.data.clone();
    let mut media = None;
    if let MessageData::Media(params) = &mut data {
        // Local paths from a peer are never trusted
        params.file_uri = None;
        let media_id = super::content::generate_id();
        params.media_id = Some(media_id.clone());

        let mut row = MediaRecord::new(
            media_id,
            &message.chat_id,
            &message.message_id,
            &message.timestamp,
        );
        row.media_type = Some(message.content_type);
        row.name = Some(params.file_name.clone());
        media = Some(row);
    }

    let mut record = MessageRecord::incoming(
        &message.chat_id,
        &message.message_id,
        message.content_type,
        data,
        &message.timestamp,
    );
    record.member_id = message.member_id.clone();
    record.reply_id = message.reply_id.clone();
    record.media_id = media.as_ref().map(|m| m.media_id.clone());
    record.should_ack = permissions.read_receipts;
    record.visible = message.content_type != ContentType::InitialInfoRequest;
    record.expires_on = message.expires_on.clone().or_else(|| {
        (permissions.disappearing_messages > 0).then(|| {
            crate::time::iso_after_secs(
                &crate::time::now_iso(),
                permissions.disappearing_messages,
            )
        })
    });

    match db.add_message_with_media_in(message.table, &record, media.as_ref()) {
        Ok(()) => {}
        Err(Error::DuplicateMessage { .. }) => {
            tracing::debug!("Ignoring duplicate message {}", message.message_id);
            return Ok(None);
        }
        Err(e) => return Err(e),
    }

    if record.visible {
        db.update_connection_on_new_message(
            &message.chat_id,
            &SummaryUpdate {
                text: action.generate_preview_text(record.content_type, &record.data),
                recent_message_type: record.content_type,
                latest_message_id: record.message_id.clone(),
                timestamp: record.timestamp.clone(),
                read_status: MessageStatus::Latest,
                increment_unread: true,
            },
        )?;
    }

    if permissions.auto_download {
        auto_download(pipeline, message.table, &mut record).await;
    }

    Ok(Some(record))
}

/// Download an attachment right away; failures leave it for a manual fetch
async fn auto_download(
    pipeline: &ReceivePipeline,
    table: MessageTable,
    record: &mut MessageRecord,
) {
    let MessageData::Media(params) = &mut record.data else {
        return;
    };
    let (Some(remote_url), Some(media_id)) = (params.remote_url.clone(), record.media_id.clone())
    else {
        return;
    };

    let path = match pipeline
        .media
        .download_to_media_dir(
            &record.chat_id,
            &stored_file_name(&media_id, &params.file_name),
            &remote_url,
        )
        .await
    {
        Ok(Some(path)) => path,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!("Auto-download of {} failed: {}", record.message_id, e);
            return;
        }
    };
    params.file_uri = Some(path.clone());

    let stored = pipeline
        .db
        .update_media(
            &media_id,
            &MediaUpdate {
                file_path: Some(path),
                ..Default::default()
            },
        )
        .and_then(|_| {
            pipeline.db.update_message_in(
                table,
                &record.chat_id,
                &record.message_id,
                &MessageUpdate {
                    data: Some(record.data.clone()),
                    ..Default::default()
                },
            )
        });
    if let Err(e) = stored {
        tracing::warn!("Failed to record download of {}: {}", record.message_id, e);
    }
}

async fn receive_link(pipeline: &ReceivePipeline, message: &IncomingMessage) -> Result<()> {
    if store_new_message(pipeline, message, ReceiveAction::Link)
        .await?
        .is_none()
    {
        return Ok(());
    }

    match pipeline.mode {
        LinkPreviewMode::Awaited => {
            log_enrichment(
                &message.message_id,
                pipeline
                    .enricher
                    .enrich(message.table, &message.chat_id, &message.message_id)
                    .await,
            );
        }
        LinkPreviewMode::Detached => {
            let enricher = pipeline.enricher.clone();
            let table = message.table;
            let chat_id = message.chat_id.clone();
            let message_id = message.message_id.clone();
            tokio::spawn(async move {
                let result = enricher.enrich(table, &chat_id, &message_id).await;
                log_enrichment(&message_id, result);
            });
        }
    }
    Ok(())
}

fn log_enrichment(message_id: &str, result: Result<super::link_preview::Enrichment>) {
    match result {
        Ok(outcome) => tracing::debug!("Link preview for {}: {:?}", message_id, outcome),
        Err(e) => tracing::warn!("Link preview for {} failed: {}", message_id, e),
    }
}

async fn apply_deletion(pipeline: &ReceivePipeline, message: &IncomingMessage) -> Result<()> {
    let Some(target) = message.data.target_message_id() else {
        return Ok(());
    };

    match pipeline
        .db
        .clean_delete_message_in(message.table, &message.chat_id, target)?
    {
        CleanDelete::NotFound => {
            tracing::debug!("Deletion target {} not found", target);
            return Ok(());
        }
        CleanDelete::AlreadyDeleted => {
            tracing::debug!("Message {} already deleted", target);
        }
        CleanDelete::Deleted { orphaned_file } => {
            if let Some(path) = orphaned_file {
                remove_media_file(&pipeline.media_dir, &path).await;
            }
        }
    }

    pipeline.db.update_connection_if_latest_message_is(
        &message.chat_id,
        target,
        DELETED_MESSAGE_TEXT,
        Some(ContentType::Deleted),
    )?;
    Ok(())
}

fn apply_edit(pipeline: &ReceivePipeline, message: &IncomingMessage) -> Result<()> {
    let MessageData::Edit(edit) = &message.data else {
        return Ok(());
    };
    let Some(target) =
        pipeline
            .db
            .get_message_in(message.table, &message.chat_id, &edit.message_id_to_edit)?
    else {
        tracing::debug!("Edit target {} not found", edit.message_id_to_edit);
        return Ok(());
    };

    if target.sender || target.member_id != message.member_id {
        tracing::debug!(
            "Ignoring edit of {} from someone who did not send it",
            edit.message_id_to_edit
        );
        return Ok(());
    }

    let data = match target.data {
        MessageData::Text(_) => MessageData::text(edit.edited_text.clone()),
        MessageData::Link(mut params) => {
            params.text = edit.edited_text.clone();
            MessageData::Link(params)
        }
        _ => {
            tracing::debug!("Message {} cannot be edited", edit.message_id_to_edit);
            return Ok(());
        }
    };

    pipeline.db.update_message_in(
        message.table,
        &message.chat_id,
        &edit.message_id_to_edit,
        &MessageUpdate {
            data: Some(data.clone()),
            ..Default::default()
        },
    )?;
    pipeline.db.update_connection_if_latest_message_is(
        &message.chat_id,
        &edit.message_id_to_edit,
        &connection_text(target.content_type, &data),
        None,
    )?;
    Ok(())
}

fn apply_reaction(pipeline: &ReceivePipeline, message: &IncomingMessage) -> Result<()> {
    let MessageData::Reaction(reaction) = &message.data else {
        return Ok(());
    };
    let sender_id = message.member_id.as_deref().unwrap_or(PEER_REACTION_ID);

    let applied = pipeline.db.set_reaction_in(
        message.table,
        &message.chat_id,
        &reaction.message_id,
        sender_id,
        &reaction.reaction,
    )?;
    if !applied {
        tracing::debug!("Reaction target {} not found", reaction.message_id);
    }
    Ok(())
}

fn apply_receipt(pipeline: &ReceivePipeline, message: &IncomingMessage) -> Result<()> {
    let MessageData::Receipt(receipt) = &message.data else {
        return Ok(());
    };

    let read = receipt.read_at.is_some();
    let update = MessageUpdate {
        delivered_timestamp: receipt.delivered_at.clone().or_else(|| receipt.read_at.clone()),
        read_timestamp: receipt.read_at.clone(),
        message_status: read.then_some(MessageStatus::Read),
        ..Default::default()
    };

    let found = pipeline.db.update_message_in(
        message.table,
        &message.chat_id,
        &receipt.message_id,
        &update,
    )?;
    if !found {
        tracing::debug!("Receipt for unknown message {}", receipt.message_id);
        return Ok(());
    }

    if read {
        pipeline.db.update_connection_status_if_latest_message_is(
            &message.chat_id,
            &receipt.message_id,
            MessageStatus::Read,
        )?;
    }
    Ok(())
}

async fn apply_disappearing(pipeline: &ReceivePipeline, message: &IncomingMessage) -> Result<()> {
    let MessageData::Disappearing(timer) = &message.data else {
        return Ok(());
    };

    let stored = store_new_message(pipeline, message, ReceiveAction::DisappearingMessages).await?;
    if stored.is_none() {
        return Ok(());
    }

    match pipeline.db.get_permissions_id(&message.chat_id)? {
        Some(permissions_id) => {
            pipeline.db.update_permissions(
                &permissions_id,
                &PermissionsUpdate {
                    disappearing_messages: Some(timer.timeout_value),
                    ..Default::default()
                },
            )?;
            tracing::info!(
                "Disappearing messages in chat {} set to {}s",
                message.chat_id,
                timer.timeout_value
            );
        }
        None => tracing::debug!("No permissions for chat {}", message.chat_id),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::content::{
        DeletionParams, EditParams, LinkParams, MediaParams, ReactionParams, ReceiptParams,
    };
    use crate::messaging::link_preview::{OpenGraphData, OpenGraphFetcher};
    use crate::messaging::testing::FakeMedia;
    use crate::storage::ChatKind;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct StaticFetcher;

    #[async_trait]
    impl OpenGraphFetcher for StaticFetcher {
        async fn fetch(&self, _url: &str) -> Result<Option<OpenGraphData>> {
            Ok(Some(OpenGraphData {
                title: Some("Title".into()),
                description: None,
                image: Some("https://example.com/og.png".into()),
            }))
        }
    }

    struct Harness {
        db: Arc<Database>,
        media: Arc<FakeMedia>,
        pipeline: ReceivePipeline,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let db = Arc::new(Database::open(None).await.unwrap());
        db.create_chat("c1", "Ada", ChatKind::Direct).unwrap();
        db.create_chat("g1", "Team", ChatKind::Group).unwrap();
        let media = Arc::new(FakeMedia::default());
        let enricher = Arc::new(LinkEnricher::new(
            db.clone(),
            Arc::new(StaticFetcher),
            media.clone(),
            Duration::from_secs(2),
        ));
        let dir = tempfile::tempdir().unwrap();
        let pipeline = ReceivePipeline::new(
            db.clone(),
            media.clone(),
            enricher,
            dir.path().to_path_buf(),
            LinkPreviewMode::Awaited,
        );
        Harness {
            db,
            media,
            pipeline,
            _dir: dir,
        }
    }

    fn wire(id: &str, content_type: ContentType, data: serde_json::Value, ts: &str) -> Vec<u8> {
        WireMessage {
            message_id: id.into(),
            content_type: content_type.code(),
            data,
            reply_id: None,
            timestamp: Some(ts.into()),
            expires_on: None,
        }
        .encode()
        .unwrap()
    }

    async fn receive(h: &Harness, payload: Vec<u8>) {
        h.pipeline.on_message_received("c1", &payload).await;
    }

    #[test]
    fn test_classification_is_total() {
        for ct in ContentType::ALL {
            let action = ReceiveAction::classify(ct);
            if matches!(
                action,
                ReceiveAction::Deletion | ReceiveAction::Receipt | ReceiveAction::Reaction
            ) {
                assert_eq!(
                    action.generate_preview_text(ct, &MessageData::Empty(Default::default())),
                    ""
                );
            }
        }
        assert_eq!(ReceiveAction::classify(ContentType::Link), ReceiveAction::Link);
        assert_eq!(
            ReceiveAction::classify(ContentType::Image),
            ReceiveAction::NewMessage
        );
    }

    #[test]
    fn test_validation_rejects_bad_envelopes() {
        let null_data = WireMessage {
            message_id: "m1".into(),
            content_type: 0,
            data: serde_json::Value::Null,
            reply_id: None,
            timestamp: None,
            expires_on: None,
        };
        assert!(matches!(
            IncomingMessage::from_wire(MessageTable::Direct, "c1", None, null_data),
            Err(Error::EmptyContent(_))
        ));

        let unknown = WireMessage {
            message_id: "m1".into(),
            content_type: 77,
            data: json!({}),
            reply_id: None,
            timestamp: None,
            expires_on: None,
        };
        assert!(matches!(
            IncomingMessage::from_wire(MessageTable::Direct, "c1", None, unknown),
            Err(Error::UnknownContentType(77))
        ));

        let wrong_shape = WireMessage {
            message_id: "m1".into(),
            content_type: ContentType::Deleted.code(),
            data: json!({"text": "not a deletion"}),
            reply_id: None,
            timestamp: None,
            expires_on: None,
        };
        assert!(IncomingMessage::from_wire(MessageTable::Direct, "c1", None, wrong_shape).is_err());
    }

    #[test]
    fn test_offset_expiry_is_stored_as_utc() {
        let offset = WireMessage {
            message_id: "m1".into(),
            content_type: ContentType::Text.code(),
            data: json!({"text": "bye"}),
            reply_id: None,
            timestamp: None,
            expires_on: Some("2030-01-01T00:00:00.000-05:00".into()),
        };
        let message = IncomingMessage::from_wire(MessageTable::Direct, "c1", None, offset).unwrap();
        assert_eq!(message.expires_on.as_deref(), Some("2030-01-01T05:00:00.000Z"));

        let garbage = WireMessage {
            message_id: "m2".into(),
            content_type: ContentType::Text.code(),
            data: json!({"text": "bye"}),
            reply_id: None,
            timestamp: None,
            expires_on: Some("next tuesday".into()),
        };
        let message =
            IncomingMessage::from_wire(MessageTable::Direct, "c1", None, garbage).unwrap();
        assert!(message.expires_on.is_none());
    }

    #[tokio::test]
    async fn test_offset_expiry_is_not_purged_early() {
        let h = harness().await;
        let payload = WireMessage {
            message_id: "m1".into(),
            content_type: ContentType::Text.code(),
            data: json!({"text": "bye"}),
            reply_id: None,
            timestamp: Some("2029-12-31T23:00:00.000Z".into()),
            expires_on: Some("2030-01-01T00:00:00.000-05:00".into()),
        }
        .encode()
        .unwrap();
        receive(&h, payload).await;

        // 01:00Z is after the local wall-clock time but before the real instant
        assert!(h
            .db
            .get_expired_messages("2030-01-01T01:00:00.000Z")
            .unwrap()
            .is_empty());
        let expired = h.db.get_expired_messages("2030-01-01T05:00:00.001Z").unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].message_id, "m1");
    }

    #[tokio::test]
    async fn test_new_text_message() {
        let h = harness().await;
        receive(
            &h,
            wire("m1", ContentType::Text, json!({"text": "hi"}), "2024-01-01T00:00:00.000Z"),
        )
        .await;

        let stored = h.db.get_message("c1", "m1").unwrap().unwrap();
        assert!(!stored.sender);
        assert_eq!(stored.message_status, MessageStatus::Latest);
        assert!(stored.should_ack);
        assert!(stored.expires_on.is_none());

        let summary = h.db.get_connection("c1").unwrap().unwrap();
        assert_eq!(summary.text.as_deref(), Some("hi"));
        assert_eq!(summary.new_message_count, 1);

        // Duplicate delivery changes nothing
        receive(
            &h,
            wire("m1", ContentType::Text, json!({"text": "changed"}), "2024-01-01T00:00:00.000Z"),
        )
        .await;
        assert_eq!(
            h.db.get_message("c1", "m1").unwrap().unwrap().data,
            MessageData::text("hi")
        );
        assert_eq!(h.db.get_connection("c1").unwrap().unwrap().new_message_count, 1);
    }

    #[tokio::test]
    async fn test_null_data_writes_nothing() {
        let h = harness().await;
        receive(
            &h,
            wire("m1", ContentType::Text, serde_json::Value::Null, "2024-01-01T00:00:00.000Z"),
        )
        .await;
        assert!(h.db.get_message("c1", "m1").unwrap().is_none());
        assert!(h.db.get_connection("c1").unwrap().unwrap().text.is_none());
    }

    #[tokio::test]
    async fn test_media_gets_row_and_auto_download() {
        let h = harness().await;
        let data = serde_json::to_value(MediaParams {
            file_name: "cat.png".into(),
            file_uri: Some("/etc/passwd".into()),
            remote_url: Some("https://media.test/c1/0".into()),
            ..Default::default()
        })
        .unwrap();
        receive(&h, wire("m1", ContentType::Image, data, "2024-01-01T00:00:00.000Z")).await;

        let stored = h.db.get_message("c1", "m1").unwrap().unwrap();
        let media_id = stored.media_id.clone().unwrap();
        let MessageData::Media(params) = &stored.data else {
            panic!("media data expected");
        };
        let expected = format!("c1/{}-cat.png", media_id);
        assert_eq!(params.file_uri.as_deref(), Some(expected.as_str()));
        assert_eq!(params.media_id.as_deref(), Some(media_id.as_str()));

        let row = h.db.get_media(&media_id).unwrap().unwrap();
        assert_eq!(row.file_path.as_deref(), Some(expected.as_str()));
        assert_eq!(h.media.downloads.lock().len(), 1);

        let summary = h.db.get_connection("c1").unwrap().unwrap();
        assert_eq!(summary.text.as_deref(), Some("📷 image"));
    }

    #[tokio::test]
    async fn test_same_file_name_gets_separate_files() {
        let h = harness().await;
        for (id, url) in [("m1", "https://media.test/c1/0"), ("m2", "https://media.test/c1/1")] {
            let data = serde_json::to_value(MediaParams {
                file_name: "photo.jpg".into(),
                remote_url: Some(url.into()),
                ..Default::default()
            })
            .unwrap();
            receive(&h, wire(id, ContentType::Image, data, "2024-01-01T00:00:00.000Z")).await;
        }

        let path_of = |id: &str| {
            let stored = h.db.get_message("c1", id).unwrap().unwrap();
            let media_id = stored.media_id.unwrap();
            h.db.get_media(&media_id).unwrap().unwrap().file_path.unwrap()
        };
        let first = path_of("m1");
        let second = path_of("m2");
        assert_ne!(first, second);

        // Lay the downloads down on disk the way a real client would
        for path in [&first, &second] {
            let full = h._dir.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(&full, b"jpeg").unwrap();
        }

        receive(
            &h,
            wire(
                "d1",
                ContentType::Deleted,
                json!({"messageIdToDelete": "m1"}),
                "2024-01-01T00:00:01.000Z",
            ),
        )
        .await;

        assert!(!h._dir.path().join(&first).exists());
        assert!(h._dir.path().join(&second).exists());
        assert_eq!(path_of("m2"), second);
    }

    #[tokio::test]
    async fn test_deletion_is_idempotent_and_updates_summary() {
        let h = harness().await;
        receive(
            &h,
            wire("m1", ContentType::Text, json!({"text": "oops"}), "2024-01-01T00:00:00.000Z"),
        )
        .await;
        h.db.set_reaction_in(MessageTable::Direct, "c1", "m1", "self", "👍")
            .unwrap();

        let deletion = serde_json::to_value(DeletionParams {
            message_id_to_delete: "m1".into(),
        })
        .unwrap();
        receive(
            &h,
            wire("d1", ContentType::Deleted, deletion.clone(), "2024-01-01T00:00:01.000Z"),
        )
        .await;
        let once = h.db.get_message("c1", "m1").unwrap().unwrap();

        receive(
            &h,
            wire("d2", ContentType::Deleted, deletion, "2024-01-01T00:00:02.000Z"),
        )
        .await;
        let twice = h.db.get_message("c1", "m1").unwrap().unwrap();

        assert_eq!(once, twice);
        assert_eq!(once.content_type, ContentType::Deleted);
        assert!(h.db.get_reactions("c1", "m1").unwrap().is_empty());

        let summary = h.db.get_connection("c1").unwrap().unwrap();
        assert_eq!(summary.text.as_deref(), Some(DELETED_MESSAGE_TEXT));
        assert_eq!(summary.recent_message_type, Some(ContentType::Deleted));
    }

    #[tokio::test]
    async fn test_deletion_of_older_message_keeps_newer_summary() {
        let h = harness().await;
        receive(
            &h,
            wire("x", ContentType::Text, json!({"text": "first"}), "2024-01-01T00:00:00.000Z"),
        )
        .await;
        receive(
            &h,
            wire("y", ContentType::Text, json!({"text": "second"}), "2024-01-01T00:00:01.000Z"),
        )
        .await;
        receive(
            &h,
            wire(
                "d1",
                ContentType::Deleted,
                json!({"messageIdToDelete": "x"}),
                "2024-01-01T00:00:02.000Z",
            ),
        )
        .await;

        let summary = h.db.get_connection("c1").unwrap().unwrap();
        assert_eq!(summary.text.as_deref(), Some("second"));
        assert_eq!(summary.latest_message_id.as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn test_edit_only_applies_to_peer_messages() {
        let h = harness().await;
        receive(
            &h,
            wire("m1", ContentType::Text, json!({"text": "teh"}), "2024-01-01T00:00:00.000Z"),
        )
        .await;
        let mut mine = MessageRecord::outgoing("c1", "own", ContentType::Text, MessageData::text("mine"));
        mine.timestamp = "2023-12-31T00:00:00.000Z".into();
        h.db.add_message(&mine).unwrap();

        let edit = |target: &str| {
            serde_json::to_value(EditParams {
                message_id_to_edit: target.into(),
                edited_text: "the".into(),
            })
            .unwrap()
        };
        receive(&h, wire("e1", ContentType::Edited, edit("m1"), "2024-01-01T00:00:01.000Z")).await;
        receive(&h, wire("e2", ContentType::Edited, edit("own"), "2024-01-01T00:00:02.000Z")).await;

        assert_eq!(
            h.db.get_message("c1", "m1").unwrap().unwrap().data,
            MessageData::text("the")
        );
        assert_eq!(
            h.db.get_message("c1", "own").unwrap().unwrap().data,
            MessageData::text("mine")
        );
        assert_eq!(
            h.db.get_connection("c1").unwrap().unwrap().text.as_deref(),
            Some("the")
        );
        // Edits are not stored as messages
        assert!(h.db.get_message("c1", "e1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reaction_from_peer_and_group_member() {
        let h = harness().await;
        receive(
            &h,
            wire("m1", ContentType::Text, json!({"text": "hi"}), "2024-01-01T00:00:00.000Z"),
        )
        .await;
        let reaction = serde_json::to_value(ReactionParams {
            message_id: "m1".into(),
            reaction: "❤️".into(),
        })
        .unwrap();
        receive(&h, wire("r1", ContentType::Reaction, reaction, "2024-01-01T00:00:01.000Z")).await;

        let reactions = h.db.get_reactions("c1", "m1").unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].sender_id, PEER_REACTION_ID);

        h.pipeline
            .on_group_message_received(
                "g1",
                "alice",
                &wire("gm1", ContentType::Text, json!({"text": "yo"}), "2024-01-01T00:00:00.000Z"),
            )
            .await;
        h.pipeline
            .on_group_message_received(
                "g1",
                "bob",
                &wire(
                    "gr1",
                    ContentType::Reaction,
                    json!({"messageId": "gm1", "reaction": "👍"}),
                    "2024-01-01T00:00:01.000Z",
                ),
            )
            .await;
        let group_reactions = h.db.get_reactions("g1", "gm1").unwrap();
        assert_eq!(group_reactions[0].sender_id, "bob");
        assert!(h.db.get_group_message("g1", "gm1").unwrap().unwrap().has_reaction);

        // Empty emoji removes
        receive(
            &h,
            wire(
                "r2",
                ContentType::Reaction,
                json!({"messageId": "m1", "reaction": ""}),
                "2024-01-01T00:00:02.000Z",
            ),
        )
        .await;
        assert!(h.db.get_reactions("c1", "m1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_receipt_marks_are_monotonic() {
        let h = harness().await;
        let mut mine = MessageRecord::outgoing("c1", "m1", ContentType::Text, MessageData::text("x"));
        mine.message_status = MessageStatus::Sent;
        h.db.add_message(&mine).unwrap();

        let receipt = |read_at: &str| {
            serde_json::to_value(ReceiptParams {
                message_id: "m1".into(),
                delivered_at: None,
                read_at: Some(read_at.into()),
            })
            .unwrap()
        };
        receive(
            &h,
            wire("r1", ContentType::Receipt, receipt("2024-01-01T00:00:05.000Z"), "2024-01-01T00:00:05.000Z"),
        )
        .await;
        receive(
            &h,
            wire("r2", ContentType::Receipt, receipt("2024-01-01T00:00:09.000Z"), "2024-01-01T00:00:09.000Z"),
        )
        .await;

        let stored = h.db.get_message("c1", "m1").unwrap().unwrap();
        assert_eq!(stored.message_status, MessageStatus::Read);
        assert_eq!(stored.read_timestamp.as_deref(), Some("2024-01-01T00:00:05.000Z"));
        assert_eq!(
            stored.delivered_timestamp.as_deref(),
            Some("2024-01-01T00:00:05.000Z")
        );
    }

    #[tokio::test]
    async fn test_disappearing_timer_updates_permissions() {
        let h = harness().await;
        receive(
            &h,
            wire(
                "t1",
                ContentType::DisappearingMessages,
                json!({"timeoutValue": 3600}),
                "2024-01-01T00:00:00.000Z",
            ),
        )
        .await;

        assert_eq!(h.db.get_chat_permissions("c1").unwrap().disappearing_messages, 3600);
        let summary = h.db.get_connection("c1").unwrap().unwrap();
        assert_eq!(
            summary.text.as_deref(),
            Some("Disappearing messages have been turned ON")
        );

        receive(
            &h,
            wire("m1", ContentType::Text, json!({"text": "bye"}), "2024-01-01T00:00:01.000Z"),
        )
        .await;
        assert!(h.db.get_message("c1", "m1").unwrap().unwrap().expires_on.is_some());
    }

    #[tokio::test]
    async fn test_link_is_enriched_when_awaited() {
        let h = harness().await;
        let data = serde_json::to_value(LinkParams {
            text: "see https://example.com".into(),
            ..Default::default()
        })
        .unwrap();
        receive(&h, wire("l1", ContentType::Link, data, "2024-01-01T00:00:00.000Z")).await;

        let stored = h.db.get_message("c1", "l1").unwrap().unwrap();
        let MessageData::Link(params) = &stored.data else {
            panic!("link data expected");
        };
        assert_eq!(params.title.as_deref(), Some("Title"));
        assert!(params.file_uri.is_some());
        assert!(h.db.get_media(stored.media_id.as_deref().unwrap()).unwrap().is_some());
    }
}
