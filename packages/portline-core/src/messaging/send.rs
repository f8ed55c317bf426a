//! # Send Dispatcher
//!
//! Outgoing messages are written to the store before anything touches the
//! network, so a crash or a lost connection never loses a message.
//!
//! ## Journal-then-transmit
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SEND PIPELINE                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  send_direct(chat, type, data, reply, id)                              │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  SenderKind::for_content_type ── exhaustive match                      │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  Phase A: journal        status = journaled   (not for receipts)       │
//! │         │                 + media row, summary, expiresOn               │
//! │         ▼                                                               │
//! │  Phase B: transmit       validate → upload media → WireMessage →       │
//! │         │                 Transport::encrypt_and_transmit               │
//! │         ▼                                                               │
//! │  ┌──────────────┬──────────────────────┬────────────────────────┐      │
//! │  │ Ok           │ retryable error      │ other error            │      │
//! │  │ → sent       │ → stays journaled    │ → failed               │      │
//! │  └──────────────┴──────────────────────┴────────────────────────┘      │
//! │                                                                         │
//! │  retry_direct(...)  runs phase B only, and only for rows that are      │
//! │                     still journaled.                                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing returns an error past [`SendDispatcher`]: the outcome is in the
//! log and in the stored status.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use super::content::{generate_id, ContentType, MessageData, MessageStatus, SELF_REACTION_ID};
use super::media::MediaClient;
use super::preview::connection_text;
use super::transport::{Sealing, Transport, WireMessage};
use crate::error::{Error, Result};
use crate::storage::{
    Database, MediaRecord, MessageRecord, MessageTable, MessageUpdate, SummaryUpdate,
};

// ============================================================================
// SENDER REGISTRY
// ============================================================================

/// Sender variant for a group of content types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderKind {
    /// Text, link, name change, disappearing-messages timer
    Generic,
    /// Pre-handshake signaling, sent unencrypted
    Plaintext,
    /// Contact bundle and contact bundle response
    ContactBundle,
    /// Request for a contact bundle
    ContactBundleRequest,
    /// Shared Port
    ContactPortBundle,
    /// Delete-for-everyone intent
    Deletion,
    /// Delivery/read receipt
    Receipt,
    /// Reaction
    Reaction,
    /// Image, video, file, audio
    Media,
    /// Edit intent
    Edited,
}

impl SenderKind {
    /// The sender variant responsible for a content type
    pub fn for_content_type(content_type: ContentType) -> Self {
        match content_type {
            ContentType::Text
            | ContentType::Link
            | ContentType::DisappearingMessages
            | ContentType::NameChange => Self::Generic,
            ContentType::InitialInfoRequest => Self::Plaintext,
            ContentType::ContactBundle | ContentType::ContactBundleResponse => Self::ContactBundle,
            ContentType::ContactBundleRequest => Self::ContactBundleRequest,
            ContentType::ContactPortBundle => Self::ContactPortBundle,
            ContentType::Deleted => Self::Deletion,
            ContentType::Receipt => Self::Receipt,
            ContentType::Reaction => Self::Reaction,
            ContentType::Image
            | ContentType::Video
            | ContentType::File
            | ContentType::AudioRecording => Self::Media,
            ContentType::Edited => Self::Edited,
        }
    }

    /// Whether phase A runs for this variant
    pub fn journals(&self) -> bool {
        !matches!(self, Self::Receipt)
    }

    /// Whether the journaled row is shown in the chat
    pub fn is_visible(&self) -> bool {
        !matches!(
            self,
            Self::Deletion | Self::Reaction | Self::Edited | Self::Plaintext | Self::Receipt
        )
    }

    /// How the transport protects the payload
    pub fn sealing(&self) -> Sealing {
        match self {
            Self::Plaintext => Sealing::Plaintext,
            _ => Sealing::Encrypted,
        }
    }
}

/// What a send or retry attempt ended with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Transmitted; status is `sent`
    Sent,
    /// Retryable failure; status stays `journaled`
    Deferred,
    /// Permanent failure; status is `failed`
    Failed,
    /// Retry found nothing to do
    Skipped,
}

/// Handles a sender needs
#[derive(Clone)]
pub struct SendContext {
    /// Message store
    pub db: Arc<Database>,
    /// Encrypting transport
    pub transport: Arc<dyn Transport>,
    /// Media upload
    pub media: Arc<dyn MediaClient>,
}

// ============================================================================
// SENDER
// ============================================================================

/// One outgoing message on its way through the pipeline
pub struct Sender {
    ctx: SendContext,
    kind: SenderKind,
    chat_id: String,
    content_type: ContentType,
    data: MessageData,
    reply_id: Option<String>,
    message_id: String,
    timestamp: String,
    expires_on: Option<String>,
}

impl Sender {
    /// Build the sender for a message
    pub fn new(
        ctx: SendContext,
        chat_id: impl Into<String>,
        content_type: ContentType,
        data: MessageData,
        reply_id: Option<String>,
        message_id: impl Into<String>,
    ) -> Self {
        Self {
            ctx,
            kind: SenderKind::for_content_type(content_type),
            chat_id: chat_id.into(),
            content_type,
            data,
            reply_id,
            message_id: message_id.into(),
            timestamp: crate::time::now_iso(),
            expires_on: None,
        }
    }

    /// Sender variant
    pub fn kind(&self) -> SenderKind {
        self.kind
    }

    /// Journal, then transmit
    ///
    /// A message id that is already journaled is not journaled twice; the
    /// call continues as a retry of the stored row.
    pub async fn send(mut self) -> Result<SendOutcome> {
        if self.kind.journals() {
            match self.journal() {
                Ok(()) => {}
                Err(Error::DuplicateMessage { .. }) => {
                    tracing::debug!(
                        "Message {} already stored, continuing as retry",
                        self.message_id
                    );
                    return self.retry().await;
                }
                Err(e) => return Err(e),
            }
        }

        self.transmit_and_record().await
    }

    /// Transmit a journaled message again
    ///
    /// The stored row is the source of truth: its data (including any
    /// remote media URL from an earlier attempt), reply link, timestamp
    /// and expiry are sent. Rows that are missing or no longer journaled
    /// are left alone.
    pub async fn retry(mut self) -> Result<SendOutcome> {
        if self.kind.journals() {
            let Some(stored) = self.ctx.db.get_message(&self.chat_id, &self.message_id)? else {
                tracing::debug!("Nothing to retry for message {}", self.message_id);
                return Ok(SendOutcome::Skipped);
            };

            if stored.message_status != MessageStatus::Journaled {
                tracing::debug!(
                    "Message {} is {}, not retrying",
                    self.message_id,
                    stored.message_status.as_str()
                );
                return Ok(SendOutcome::Skipped);
            }

            self.data = stored.data;
            self.reply_id = stored.reply_id.or(self.reply_id);
            self.timestamp = stored.timestamp;
            self.expires_on = stored.expires_on;
        }

        self.transmit_and_record().await
    }

    /// Phase A
    fn journal(&mut self) -> Result<()> {
        let visible = self.kind.is_visible();
        let media = self.prepare_media_row();

        let mut record = MessageRecord::outgoing(
            &self.chat_id,
            &self.message_id,
            self.content_type,
            self.data.clone(),
        );
        record.timestamp = self.timestamp.clone();
        record.reply_id = self.reply_id.clone();
        record.media_id = media.as_ref().map(|m| m.media_id.clone());
        record.visible = visible;

        if visible {
            let permissions = self.ctx.db.get_chat_permissions(&self.chat_id)?;
            if permissions.disappearing_messages > 0 {
                record.expires_on = Some(crate::time::iso_after_secs(
                    &self.timestamp,
                    permissions.disappearing_messages,
                ));
            }
        }

        self.ctx
            .db
            .add_message_with_media_in(MessageTable::Direct, &record, media.as_ref())?;
        self.expires_on = record.expires_on;

        if let MessageData::Reaction(reaction) = &self.data {
            self.ctx.db.set_reaction_in(
                MessageTable::Direct,
                &self.chat_id,
                &reaction.message_id,
                SELF_REACTION_ID,
                &reaction.reaction,
            )?;
        }

        if visible {
            self.ctx.db.update_connection_on_new_message(
                &self.chat_id,
                &SummaryUpdate {
                    text: connection_text(self.content_type, &self.data),
                    recent_message_type: self.content_type,
                    latest_message_id: self.message_id.clone(),
                    timestamp: self.timestamp.clone(),
                    read_status: MessageStatus::Journaled,
                    increment_unread: false,
                },
            )?;
        }

        tracing::debug!(
            "Journaled {} message {} in chat {}",
            self.content_type,
            self.message_id,
            self.chat_id
        );
        Ok(())
    }

    fn prepare_media_row(&mut self) -> Option<MediaRecord> {
        if self.kind != SenderKind::Media {
            return None;
        }
        let MessageData::Media(params) = &mut self.data else {
            return None;
        };

        let media_id = params.media_id.get_or_insert_with(generate_id).clone();
        let mut row = MediaRecord::new(media_id, &self.chat_id, &self.message_id, &self.timestamp);
        row.media_type = Some(self.content_type);
        row.name = Some(params.file_name.clone());
        row.file_path = params.file_uri.clone();
        Some(row)
    }

    async fn transmit_and_record(&mut self) -> Result<SendOutcome> {
        match self.transmit().await {
            Ok(()) => {
                self.mark(MessageStatus::Sent)?;
                self.after_sent()?;
                tracing::debug!("Sent message {} in chat {}", self.message_id, self.chat_id);
                Ok(SendOutcome::Sent)
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!("Message {} stays journaled: {}", self.message_id, e);
                Ok(SendOutcome::Deferred)
            }
            Err(e) => {
                tracing::warn!("Message {} failed: {}", self.message_id, e);
                self.mark(MessageStatus::Failed)?;
                Ok(SendOutcome::Failed)
            }
        }
    }

    /// Phase B
    async fn transmit(&mut self) -> Result<()> {
        self.data.validate_for(self.content_type)?;

        if self.kind == SenderKind::Media {
            self.ensure_uploaded().await?;
        }

        let wire = WireMessage {
            message_id: self.message_id.clone(),
            content_type: self.content_type.code(),
            data: self.wire_data()?,
            reply_id: self.reply_id.clone(),
            timestamp: Some(self.timestamp.clone()),
            expires_on: self.expires_on.clone(),
        };
        let payload = wire.encode()?;

        self.ctx
            .transport
            .encrypt_and_transmit(&self.chat_id, &payload, self.kind.sealing())
            .await
    }

    /// Upload the attachment unless an earlier attempt already did
    async fn ensure_uploaded(&mut self) -> Result<()> {
        let MessageData::Media(params) = &mut self.data else {
            return Ok(());
        };
        if params.remote_url.is_some() {
            return Ok(());
        }

        let local = params.file_uri.clone().ok_or_else(|| {
            Error::MediaUnavailable(format!("message {} has no local file", self.message_id))
        })?;

        // The upload URL doubles as the download location for the peer
        let url = self.ctx.media.request_upload_url(&self.chat_id).await?;
        self.ctx.media.upload_raw_media(&local, &url).await?;
        params.remote_url = Some(url);

        let update = MessageUpdate {
            data: Some(self.data.clone()),
            ..Default::default()
        };
        self.ctx
            .db
            .update_saved_message(&self.chat_id, &self.message_id, &update)?;
        Ok(())
    }

    /// Payload as sent; local-only media fields are dropped
    fn wire_data(&self) -> Result<Value> {
        let mut value = self.data.to_value()?;
        if self.kind == SenderKind::Media {
            if let Some(object) = value.as_object_mut() {
                object.remove("fileUri");
                object.remove("mediaId");
            }
        }
        Ok(value)
    }

    fn mark(&self, status: MessageStatus) -> Result<()> {
        if !self.kind.journals() {
            return Ok(());
        }
        self.ctx.db.update_saved_message(
            &self.chat_id,
            &self.message_id,
            &MessageUpdate::status(status),
        )?;
        if self.kind.is_visible() {
            self.ctx.db.update_connection_status_if_latest_message_is(
                &self.chat_id,
                &self.message_id,
                status,
            )?;
        }
        Ok(())
    }

    /// A contact bundle sent in reply to a request closes the request
    fn after_sent(&self) -> Result<()> {
        if self.content_type != ContentType::ContactBundleResponse {
            return Ok(());
        }
        let Some(request_id) = self.reply_id.as_deref() else {
            return Ok(());
        };
        let Some(request) = self.ctx.db.get_message(&self.chat_id, request_id)? else {
            return Ok(());
        };

        if request.content_type == ContentType::ContactBundleRequest && !request.sender {
            self.ctx.db.permanently_delete_message(&self.chat_id, request_id)?;
            tracing::debug!("Contact bundle request {} answered", request_id);
        }
        Ok(())
    }
}

// ============================================================================
// DISPATCHER
// ============================================================================

type InFlightKey = (String, String);

/// Removes its key from the in-flight set when dropped
struct InFlight<'a> {
    set: &'a Mutex<HashSet<InFlightKey>>,
    key: InFlightKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

/// Public entry point for outgoing direct messages
pub struct SendDispatcher {
    ctx: SendContext,
    in_flight: Mutex<HashSet<InFlightKey>>,
}

impl SendDispatcher {
    /// Create a dispatcher over the given store, transport and media client
    pub fn new(
        db: Arc<Database>,
        transport: Arc<dyn Transport>,
        media: Arc<dyn MediaClient>,
    ) -> Self {
        Self {
            ctx: SendContext {
                db,
                transport,
                media,
            },
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// The message store
    pub fn database(&self) -> &Arc<Database> {
        &self.ctx.db
    }

    fn claim(&self, chat_id: &str, message_id: &str) -> Option<InFlight<'_>> {
        let key = (chat_id.to_string(), message_id.to_string());
        if !self.in_flight.lock().insert(key.clone()) {
            return None;
        }
        Some(InFlight {
            set: &self.in_flight,
            key,
        })
    }

    /// Send a new message
    ///
    /// `message_id = None` generates one.
    pub async fn send_direct(
        &self,
        chat_id: &str,
        content_type: ContentType,
        data: MessageData,
        reply_id: Option<String>,
        message_id: Option<String>,
    ) {
        let message_id = message_id.unwrap_or_else(generate_id);
        let Some(_claim) = self.claim(chat_id, &message_id) else {
            tracing::debug!("Message {} is already being sent", message_id);
            return;
        };

        let sender = Sender::new(
            self.ctx.clone(),
            chat_id,
            content_type,
            data,
            reply_id,
            message_id.as_str(),
        );
        let kind = sender.kind();

        match sender.send().await {
            Ok(outcome) => {
                tracing::debug!("send {} via {:?}: {:?}", message_id, kind, outcome)
            }
            Err(e) => tracing::error!(
                "Failed to send message {} in chat {}: {}",
                message_id,
                chat_id,
                e
            ),
        }
    }

    /// Transmit a journaled message again
    pub async fn retry_direct(
        &self,
        chat_id: &str,
        content_type: ContentType,
        data: MessageData,
        reply_id: Option<String>,
        message_id: &str,
    ) {
        let Some(_claim) = self.claim(chat_id, message_id) else {
            tracing::debug!("Message {} is already being sent", message_id);
            return;
        };

        let sender = Sender::new(
            self.ctx.clone(),
            chat_id,
            content_type,
            data,
            reply_id,
            message_id,
        );
        let kind = sender.kind();

        match sender.retry().await {
            Ok(outcome) => {
                tracing::debug!("retry {} via {:?}: {:?}", message_id, kind, outcome)
            }
            Err(e) => tracing::error!(
                "Failed to retry message {} in chat {}: {}",
                message_id,
                chat_id,
                e
            ),
        }
    }

    /// Retry a stored record
    pub async fn retry_record(&self, record: MessageRecord) {
        self.retry_direct(
            &record.chat_id,
            record.content_type,
            record.data,
            record.reply_id,
            &record.message_id,
        )
        .await
    }

    /// Send with a raw content type code and JSON data
    ///
    /// Codes with no registered sender are logged and dropped.
    pub async fn send_direct_raw(
        &self,
        chat_id: &str,
        content_type: u32,
        data: Value,
        reply_id: Option<String>,
        message_id: Option<String>,
    ) {
        let Some(content_type) = ContentType::from_code(content_type) else {
            tracing::error!("No sender registered for content type {}", content_type);
            return;
        };
        let data = MessageData::decode(content_type, data);
        self.send_direct(chat_id, content_type, data, reply_id, message_id)
            .await
    }

    /// Move a failed message back to the journal and transmit it again
    pub async fn resend_failed(&self, chat_id: &str, message_id: &str) {
        let record = match self.ctx.db.get_message(chat_id, message_id) {
            Ok(Some(record)) if record.message_status == MessageStatus::Failed => record,
            Ok(_) => {
                tracing::debug!("Message {} is not failed, nothing to resend", message_id);
                return;
            }
            Err(e) => {
                tracing::error!("Failed to load message {}: {}", message_id, e);
                return;
            }
        };

        if let Err(e) = self.ctx.db.update_saved_message(
            chat_id,
            message_id,
            &MessageUpdate::status(MessageStatus::Journaled),
        ) {
            tracing::error!("Failed to re-journal message {}: {}", message_id, e);
            return;
        }

        self.retry_record(record).await
    }
}
