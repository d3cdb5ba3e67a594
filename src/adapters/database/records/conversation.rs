use crate::domain::conversation::Conversation;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct ConversationRecord {
    pub(crate) id: Uuid,
    pub(crate) participant_a: Uuid,
    pub(crate) participant_b: Uuid,
    pub(crate) last_message_preview: Option<String>,
    pub(crate) last_message_at: Option<OffsetDateTime>,
    pub(crate) is_blocked: bool,
    pub(crate) blocked_by: Option<Uuid>,
    pub(crate) created_at: OffsetDateTime,
}

impl From<ConversationRecord> for Conversation {
    fn from(record: ConversationRecord) -> Self {
        Self {
            id: record.id,
            participant_a: record.participant_a,
            participant_b: record.participant_b,
            last_message_preview: record.last_message_preview,
            last_message_at: record.last_message_at,
            is_blocked: record.is_blocked,
            blocked_by: record.blocked_by,
            created_at: record.created_at,
        }
    }
}
