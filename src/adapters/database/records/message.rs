use crate::domain::message::{Delivery, MediaRef, MessageKind, Payload};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct PayloadRecord {
    pub(crate) id: Uuid,
    pub(crate) body: Option<Vec<u8>>,
    pub(crate) media_url: Option<String>,
    pub(crate) media_mime_type: Option<String>,
    pub(crate) media_size_bytes: Option<i64>,
    pub(crate) media_filename: Option<String>,
    pub(crate) media_thumbnail_url: Option<String>,
    pub(crate) created_at: OffsetDateTime,
}

impl From<PayloadRecord> for Payload {
    fn from(record: PayloadRecord) -> Self {
        let media = record.media_url.map(|url| MediaRef {
            url,
            mime_type: record.media_mime_type,
            size_bytes: record.media_size_bytes,
            filename: record.media_filename,
            thumbnail_url: record.media_thumbnail_url,
        });
        Self { id: record.id, body: record.body, media, created_at: record.created_at }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct DeliveryRecord {
    pub(crate) id: Uuid,
    pub(crate) conversation_id: Uuid,
    pub(crate) sender_id: Uuid,
    pub(crate) receiver_id: Uuid,
    pub(crate) kind: String,
    pub(crate) payload_ref: Uuid,
    pub(crate) reply_to: Option<Uuid>,
    pub(crate) is_delivered: bool,
    pub(crate) delivered_at: Option<OffsetDateTime>,
    pub(crate) is_read: bool,
    pub(crate) read_at: Option<OffsetDateTime>,
    pub(crate) is_deleted: bool,
    pub(crate) created_at: OffsetDateTime,
}

impl From<DeliveryRecord> for Delivery {
    fn from(record: DeliveryRecord) -> Self {
        Self {
            id: record.id,
            conversation_id: record.conversation_id,
            sender_id: record.sender_id,
            receiver_id: record.receiver_id,
            // The column carries a CHECK constraint over exactly these values.
            kind: MessageKind::parse(&record.kind).unwrap_or(MessageKind::Text),
            payload_ref: record.payload_ref,
            reply_to: record.reply_to,
            is_delivered: record.is_delivered,
            delivered_at: record.delivered_at,
            is_read: record.is_read,
            read_at: record.read_at,
            is_deleted: record.is_deleted,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct UnreadCountRecord {
    pub(crate) conversation_id: Uuid,
    pub(crate) unread: i64,
}
