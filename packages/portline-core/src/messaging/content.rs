//! # Message Content
//!
//! Content types, delivery status and the per-type data payloads.
//!
//! ## Content Type Codes
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Code  ContentType             Data                   Visible          │
//! │  ──────────────────────────────────────────────────────────────────     │
//! │   0    text                    TextParams             yes               │
//! │   1    link                    LinkParams             yes               │
//! │   2    image                   MediaParams            yes               │
//! │   3    video                   MediaParams            yes               │
//! │   4    file                    MediaParams            yes               │
//! │   5    audioRecording          MediaParams            yes               │
//! │   6    deleted                 DeletionParams | {}    intent: no        │
//! │   7    contactBundle           ContactBundleParams    yes               │
//! │   8    contactBundleRequest    {}                     yes               │
//! │   9    contactBundleResponse   ContactBundleParams    yes               │
//! │  10    contactPortBundle       PortBundleParams       yes               │
//! │  11    reaction                ReactionParams         no                │
//! │  12    receipt                 ReceiptParams          never stored      │
//! │  13    disappearingMessages    DisappearingParams     yes               │
//! │  14    edited                  EditParams             no                │
//! │  15    nameChange              NameChangeParams       yes               │
//! │  16    initialInfoRequest      {}                     no                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Codes are persisted and sent on the wire, so they never change.
//!
//! ## Status Transitions
//!
//! ```text
//!   journaled ──► sent ──► read        latest ──► read   (incoming)
//!       │          │
//!       └──────────┴──► failed ──► journaled   (manual resend)
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Matches the first http(s) URL inside free text
static URL_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>"']+"#).ok());

/// Reaction sender id for reactions made on this device
pub const SELF_REACTION_ID: &str = "self";

/// Reaction sender id for the peer of a direct chat
pub const PEER_REACTION_ID: &str = "peer";

/// Generate a hyphen-free random id for messages and media rows
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

// ============================================================================
// CONTENT TYPE
// ============================================================================

/// Discriminator for a message's data payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum ContentType {
    /// Plain text
    Text,
    /// Text containing a link, enriched with an Open Graph preview
    Link,
    /// Image attachment
    Image,
    /// Video attachment
    Video,
    /// Generic file attachment
    File,
    /// Voice note
    AudioRecording,
    /// Deletion intent, or the tombstone it leaves behind
    Deleted,
    /// Shared contact
    ContactBundle,
    /// Request for a contact
    ContactBundleRequest,
    /// Answer to a contact request
    ContactBundleResponse,
    /// Shared Port (connection invite)
    ContactPortBundle,
    /// Emoji reaction to another message
    Reaction,
    /// Delivery / read receipt
    Receipt,
    /// Disappearing-messages timer change
    DisappearingMessages,
    /// Edit of an earlier text message
    Edited,
    /// Peer changed their display name
    NameChange,
    /// Pre-handshake request for peer info, sent unsealed
    InitialInfoRequest,
}

impl ContentType {
    /// Every content type, in code order
    pub const ALL: [ContentType; 17] = [
        Self::Text,
        Self::Link,
        Self::Image,
        Self::Video,
        Self::File,
        Self::AudioRecording,
        Self::Deleted,
        Self::ContactBundle,
        Self::ContactBundleRequest,
        Self::ContactBundleResponse,
        Self::ContactPortBundle,
        Self::Reaction,
        Self::Receipt,
        Self::DisappearingMessages,
        Self::Edited,
        Self::NameChange,
        Self::InitialInfoRequest,
    ];

    /// Get the numeric code used in storage and on the wire
    pub fn code(&self) -> u32 {
        match self {
            Self::Text => 0,
            Self::Link => 1,
            Self::Image => 2,
            Self::Video => 3,
            Self::File => 4,
            Self::AudioRecording => 5,
            Self::Deleted => 6,
            Self::ContactBundle => 7,
            Self::ContactBundleRequest => 8,
            Self::ContactBundleResponse => 9,
            Self::ContactPortBundle => 10,
            Self::Reaction => 11,
            Self::Receipt => 12,
            Self::DisappearingMessages => 13,
            Self::Edited => 14,
            Self::NameChange => 15,
            Self::InitialInfoRequest => 16,
        }
    }

    /// Parse from numeric code
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Protocol name of the content type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Link => "link",
            Self::Image => "image",
            Self::Video => "video",
            Self::File => "file",
            Self::AudioRecording => "audioRecording",
            Self::Deleted => "deleted",
            Self::ContactBundle => "contactBundle",
            Self::ContactBundleRequest => "contactBundleRequest",
            Self::ContactBundleResponse => "contactBundleResponse",
            Self::ContactPortBundle => "contactPortBundle",
            Self::Reaction => "reaction",
            Self::Receipt => "receipt",
            Self::DisappearingMessages => "disappearingMessages",
            Self::Edited => "edited",
            Self::NameChange => "nameChange",
            Self::InitialInfoRequest => "initialInfoRequest",
        }
    }

    /// Check if the message carries an uploaded attachment
    pub fn is_media(&self) -> bool {
        matches!(
            self,
            Self::Image | Self::Video | Self::File | Self::AudioRecording
        )
    }
}

impl From<ContentType> for u32 {
    fn from(content_type: ContentType) -> Self {
        content_type.code()
    }
}

impl TryFrom<u32> for ContentType {
    type Error = Error;

    fn try_from(code: u32) -> Result<Self> {
        Self::from_code(code).ok_or(Error::UnknownContentType(code))
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// MESSAGE STATUS
// ============================================================================

/// Delivery status of a stored message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Persisted locally, not yet handed to the transport
    Journaled,
    /// Handed to the transport
    Sent,
    /// Read by the recipient (outgoing) or by us (incoming)
    Read,
    /// Could not be sent and will not be retried automatically
    Failed,
    /// Incoming and not yet read
    Latest,
}

impl MessageStatus {
    /// Convert to database string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Journaled => "journaled",
            Self::Sent => "sent",
            Self::Read => "read",
            Self::Failed => "failed",
            Self::Latest => "latest",
        }
    }

    /// Parse from database string
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "journaled" => Some(Self::Journaled),
            "sent" => Some(Self::Sent),
            "read" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            "latest" => Some(Self::Latest),
            _ => None,
        }
    }

    /// Check whether moving from `self` to `next` is a forward transition
    ///
    /// Writing the current status again is not a transition.
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Journaled, Sent)
                | (Journaled, Read)
                | (Journaled, Failed)
                | (Sent, Read)
                | (Sent, Failed)
                | (Failed, Journaled)
                | (Latest, Read)
        )
    }
}

// ============================================================================
// DATA PAYLOADS
// ============================================================================

/// Payload with no fields (`{}`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyParams {}

/// Plain text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextParams {
    /// Message body
    pub text: String,
}

/// Text with a link and its preview
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkParams {
    /// Message body
    pub text: String,
    /// Link to preview; the first URL in `text` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_uri: Option<String>,
    /// Open Graph title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Open Graph description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Downloaded preview image, relative to the media dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_uri: Option<String>,
    /// File name of the preview image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Media row for the preview image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
}

impl LinkParams {
    /// URL the preview should be fetched from
    pub fn target_url(&self) -> Option<String> {
        if let Some(uri) = self.link_uri.as_deref().filter(|u| !u.is_empty()) {
            return Some(uri.to_string());
        }
        URL_PATTERN
            .as_ref()
            .and_then(|re| re.find(&self.text))
            .map(|m| m.as_str().to_string())
    }
}

/// Image, video, file or audio attachment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaParams {
    /// Original file name
    pub file_name: String,
    /// Local copy, relative to the media dir (never sent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_uri: Option<String>,
    /// MIME type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    /// Media row id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    /// Where the uploaded bytes live
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    /// Caption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Playback length in seconds (audio/video)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

/// Delete-for-everyone intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionParams {
    /// Message to tombstone
    pub message_id_to_delete: String,
}

/// Edit intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditParams {
    /// Message whose text changes
    pub message_id_to_edit: String,
    /// Replacement text
    pub edited_text: String,
}

/// Reaction to a message (empty `reaction` removes it)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionParams {
    /// Message being reacted to
    pub message_id: String,
    /// Emoji
    #[serde(default)]
    pub reaction: String,
}

/// Delivery/read receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptParams {
    /// Message being acknowledged
    pub message_id: String,
    /// When the peer received it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<String>,
    /// When the peer read it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<String>,
}

/// Disappearing-messages timer (seconds, 0 = off)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisappearingParams {
    /// New timeout
    pub timeout_value: u64,
}

/// Shared contact (bundle, or response to a request)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactBundleParams {
    /// Display name of the shared contact
    pub name: String,
    /// Opaque connection bundle
    #[serde(default)]
    pub bundle: Value,
}

/// Shared Port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortBundleParams {
    /// Port id
    pub port_id: String,
    /// Label of the Port
    #[serde(default)]
    pub name: String,
    /// Opaque Port bundle
    #[serde(default)]
    pub bundle: Value,
}

/// Display-name change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameChangeParams {
    /// New display name
    pub name: String,
}

/// Decoded `data` blob of a message
///
/// Serialized untagged, so the JSON form is exactly the inner payload.
/// Blobs that do not decode for their content type are kept as `Raw`
/// so a stored row is always readable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageData {
    /// Text
    Text(TextParams),
    /// Link
    Link(LinkParams),
    /// Attachment
    Media(MediaParams),
    /// Deletion intent
    Deletion(DeletionParams),
    /// Edit intent
    Edit(EditParams),
    /// Reaction
    Reaction(ReactionParams),
    /// Receipt
    Receipt(ReceiptParams),
    /// Timer change
    Disappearing(DisappearingParams),
    /// Contact bundle / response
    ContactBundle(ContactBundleParams),
    /// Port bundle
    PortBundle(PortBundleParams),
    /// Name change
    NameChange(NameChangeParams),
    /// Requests and tombstones
    Empty(EmptyParams),
    /// Anything that does not match its content type
    Raw(Value),
}

impl MessageData {
    /// Text message
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(TextParams { text: s.into() })
    }

    /// Decode a blob for the given content type
    pub fn decode(content_type: ContentType, value: Value) -> Self {
        fn typed<T: serde::de::DeserializeOwned>(
            value: &Value,
            wrap: fn(T) -> MessageData,
        ) -> Option<MessageData> {
            serde_json::from_value::<T>(value.clone()).ok().map(wrap)
        }

        let decoded = match content_type {
            ContentType::Text => typed(&value, Self::Text),
            ContentType::Link => typed(&value, Self::Link),
            ContentType::Image
            | ContentType::Video
            | ContentType::File
            | ContentType::AudioRecording => typed(&value, Self::Media),
            ContentType::Deleted => typed(&value, Self::Deletion)
                .or_else(|| value.is_object().then(|| Self::Empty(EmptyParams {}))),
            ContentType::ContactBundle | ContentType::ContactBundleResponse => {
                typed(&value, Self::ContactBundle)
            }
            ContentType::ContactBundleRequest | ContentType::InitialInfoRequest => {
                value.is_object().then(|| Self::Empty(EmptyParams {}))
            }
            ContentType::ContactPortBundle => typed(&value, Self::PortBundle),
            ContentType::Reaction => typed(&value, Self::Reaction),
            ContentType::Receipt => typed(&value, Self::Receipt),
            ContentType::DisappearingMessages => typed(&value, Self::Disappearing),
            ContentType::Edited => typed(&value, Self::Edit),
            ContentType::NameChange => typed(&value, Self::NameChange),
        };

        decoded.unwrap_or(Self::Raw(value))
    }

    /// Decode a stored JSON string
    pub fn from_json(content_type: ContentType, json: &str) -> Self {
        match serde_json::from_str::<Value>(json) {
            Ok(value) => Self::decode(content_type, value),
            Err(_) => Self::Raw(Value::String(json.to_string())),
        }
    }

    /// Serialize to a JSON value
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Serialize to a JSON string for storage
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check whether this payload is the right shape for `content_type`
    pub fn accepts(&self, content_type: ContentType) -> bool {
        match self {
            Self::Text(_) => content_type == ContentType::Text,
            Self::Link(_) => content_type == ContentType::Link,
            Self::Media(_) => content_type.is_media(),
            Self::Deletion(_) => content_type == ContentType::Deleted,
            Self::Edit(_) => content_type == ContentType::Edited,
            Self::Reaction(_) => content_type == ContentType::Reaction,
            Self::Receipt(_) => content_type == ContentType::Receipt,
            Self::Disappearing(_) => content_type == ContentType::DisappearingMessages,
            Self::ContactBundle(_) => matches!(
                content_type,
                ContentType::ContactBundle | ContentType::ContactBundleResponse
            ),
            Self::PortBundle(_) => content_type == ContentType::ContactPortBundle,
            Self::NameChange(_) => content_type == ContentType::NameChange,
            Self::Empty(_) => matches!(
                content_type,
                ContentType::ContactBundleRequest | ContentType::InitialInfoRequest
            ),
            Self::Raw(_) => false,
        }
    }

    /// Validate the payload before it is sent or stored as incoming
    pub fn validate_for(&self, content_type: ContentType) -> Result<()> {
        if !self.accepts(content_type) {
            return Err(Error::InvalidMessageContent(format!(
                "data does not match content type {}",
                content_type
            )));
        }

        let missing = match self {
            Self::Deletion(p) => p.message_id_to_delete.is_empty(),
            Self::Edit(p) => p.message_id_to_edit.is_empty(),
            Self::Reaction(p) => p.message_id.is_empty(),
            Self::Receipt(p) => p.message_id.is_empty(),
            Self::Media(p) => p.file_name.is_empty(),
            Self::PortBundle(p) => p.port_id.is_empty(),
            _ => false,
        };
        if missing {
            return Err(Error::InvalidMessageContent(format!(
                "{} payload is missing its target",
                content_type
            )));
        }

        Ok(())
    }

    /// Id of the message this payload acts on (deletion, edit, reaction, receipt)
    pub fn target_message_id(&self) -> Option<&str> {
        match self {
            Self::Deletion(p) => Some(&p.message_id_to_delete),
            Self::Edit(p) => Some(&p.message_id_to_edit),
            Self::Reaction(p) => Some(&p.message_id),
            Self::Receipt(p) => Some(&p.message_id),
            _ => None,
        }
    }

    /// Media row referenced by the payload
    pub fn media_id(&self) -> Option<&str> {
        match self {
            Self::Media(p) => p.media_id.as_deref(),
            Self::Link(p) => p.media_id.as_deref(),
            _ => None,
        }
    }
}
