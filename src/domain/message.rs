use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Shown in place of a text body whose ciphertext no longer decrypts.
pub const DECRYPT_PLACEHOLDER: &str = "[message could not be decrypted]";

/// Characters of a text body used for the conversation preview.
pub const TEXT_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    File,
}

impl MessageKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::File => "file",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "file" => Some(Self::File),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_text(self) -> bool {
        matches!(self, Self::Text)
    }
}

/// Media reference carried by non-text messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub url: String,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub filename: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// Everything the sender controls about a message.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub receiver_id: Uuid,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub media: Option<MediaRef>,
    pub reply_to: Option<Uuid>,
}

impl OutgoingMessage {
    /// Enforces the kind/field invariant: text messages carry no media,
    /// media messages carry no text body.
    pub fn validate_shape(&self) -> Result<()> {
        if self.kind.is_text() {
            if self.text.is_none() {
                return Err(AppError::Validation("Text message requires a text body".to_string()));
            }
            if self.media.is_some() {
                return Err(AppError::Validation("Text message cannot carry media fields".to_string()));
            }
        } else {
            if self.media.is_none() {
                return Err(AppError::Validation("Media message requires a media URL".to_string()));
            }
            if self.text.is_some() {
                return Err(AppError::Validation("Media message cannot carry a text body".to_string()));
            }
        }
        Ok(())
    }
}

/// Payload row to be written. Ids are generated by the caller so the
/// delivery row can carry the reference before the payload write returns.
#[derive(Debug, Clone)]
pub struct NewPayload {
    pub id: Uuid,
    pub body: Option<Vec<u8>>,
    pub media: Option<MediaRef>,
}

/// Delivery row to be written.
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub kind: MessageKind,
    pub payload_ref: Uuid,
    pub reply_to: Option<Uuid>,
}

/// Payload row as stored: ciphertext for text messages, a media reference
/// for the rest. Never exposed to clients directly.
#[derive(Debug, Clone)]
pub struct Payload {
    pub id: Uuid,
    pub body: Option<Vec<u8>>,
    pub media: Option<MediaRef>,
    pub created_at: OffsetDateTime,
}

/// Delivery row: control metadata referencing its payload by id only.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub kind: MessageKind,
    pub payload_ref: Uuid,
    pub reply_to: Option<Uuid>,
    pub is_delivered: bool,
    pub delivered_at: Option<OffsetDateTime>,
    pub is_read: bool,
    pub read_at: Option<OffsetDateTime>,
    pub is_deleted: bool,
    pub created_at: OffsetDateTime,
}

/// The decrypted view returned to clients. `text` holds plaintext (or the
/// placeholder for undecryptable bodies); storage stays encrypted.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub media: Option<MediaRef>,
    pub reply_to: Option<Uuid>,
    pub is_delivered: bool,
    pub delivered_at: Option<OffsetDateTime>,
    pub is_read: bool,
    pub read_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Conversation-list preview: the first characters of a text body, or a
/// fixed label for media kinds.
#[must_use]
pub fn preview_for(kind: MessageKind, sanitized_text: Option<&str>) -> String {
    match kind {
        MessageKind::Text => {
            sanitized_text.unwrap_or_default().chars().take(TEXT_PREVIEW_CHARS).collect()
        }
        MessageKind::Image => "[Image]".to_string(),
        MessageKind::Video => "[Video]".to_string(),
        MessageKind::File => "[File]".to_string(),
    }
}
