//! Chat-list summary text for a message.

use super::content::{ContentType, MessageData};

/// Summary text shown after a message is tombstoned
pub const DELETED_MESSAGE_TEXT: &str = "This message was deleted";

/// Summary line for a message of the given type
///
/// Content types that never appear in the chat list (deletions, receipts,
/// reactions, edits, signaling) produce an empty string.
pub fn connection_text(content_type: ContentType, data: &MessageData) -> String {
    match (content_type, data) {
        (ContentType::Text, MessageData::Text(p)) => p.text.clone(),
        (ContentType::Link, MessageData::Link(p)) => p.text.clone(),
        (ContentType::File, _) => media_text("📎", data, "file"),
        (ContentType::Image, _) => media_text("📷", data, "image"),
        (ContentType::Video, _) => media_text("🎥", data, "video"),
        (ContentType::AudioRecording, _) => media_text("🔊", data, "audio"),
        (ContentType::ContactBundle, MessageData::ContactBundle(p)) => {
            format!("👤 {}", p.name)
        }
        (ContentType::ContactBundleRequest, _) => "👤 contact has been requested".to_string(),
        (ContentType::ContactBundleResponse, MessageData::ContactBundle(p)) => {
            format!("👤 shared you contact with {}", p.name)
        }
        (ContentType::DisappearingMessages, MessageData::Disappearing(p)) => {
            let state = if p.timeout_value > 0 { "ON" } else { "OFF" };
            format!("Disappearing messages have been turned {}", state)
        }
        _ => String::new(),
    }
}

fn media_text(icon: &str, data: &MessageData, fallback: &str) -> String {
    let caption = match data {
        MessageData::Media(p) => p.text.as_deref().filter(|t| !t.is_empty()),
        _ => None,
    };
    format!("{} {}", icon, caption.unwrap_or(fallback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::content::{
        ContactBundleParams, DisappearingParams, EmptyParams, MediaParams, ReactionParams,
    };

    #[test]
    fn test_text_and_media_previews() {
        assert_eq!(
            connection_text(ContentType::Text, &MessageData::text("hello")),
            "hello"
        );

        let image = MessageData::Media(MediaParams {
            file_name: "a.png".into(),
            ..Default::default()
        });
        assert_eq!(connection_text(ContentType::Image, &image), "📷 image");

        let captioned = MessageData::Media(MediaParams {
            file_name: "a.mp4".into(),
            text: Some("beach".into()),
            ..Default::default()
        });
        assert_eq!(connection_text(ContentType::Video, &captioned), "🎥 beach");
    }

    #[test]
    fn test_contact_previews() {
        let bundle = MessageData::ContactBundle(ContactBundleParams {
            name: "Ada".into(),
            bundle: serde_json::Value::Null,
        });
        assert_eq!(connection_text(ContentType::ContactBundle, &bundle), "👤 Ada");
        assert_eq!(
            connection_text(ContentType::ContactBundleResponse, &bundle),
            "👤 shared you contact with Ada"
        );
        assert_eq!(
            connection_text(
                ContentType::ContactBundleRequest,
                &MessageData::Empty(EmptyParams {})
            ),
            "👤 contact has been requested"
        );
    }

    #[test]
    fn test_disappearing_and_silent_types() {
        let on = MessageData::Disappearing(DisappearingParams { timeout_value: 60 });
        let off = MessageData::Disappearing(DisappearingParams { timeout_value: 0 });
        assert_eq!(
            connection_text(ContentType::DisappearingMessages, &on),
            "Disappearing messages have been turned ON"
        );
        assert_eq!(
            connection_text(ContentType::DisappearingMessages, &off),
            "Disappearing messages have been turned OFF"
        );

        let reaction = MessageData::Reaction(ReactionParams {
            message_id: "m1".into(),
            reaction: "👍".into(),
        });
        assert_eq!(connection_text(ContentType::Reaction, &reaction), "");
    }
}
