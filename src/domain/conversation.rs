use time::OffsetDateTime;
use uuid::Uuid;

/// Longest preview stored on a conversation row.
pub const PREVIEW_MAX_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: Uuid,
    pub participant_a: Uuid,
    pub participant_b: Uuid,
    pub last_message_preview: Option<String>,
    pub last_message_at: Option<OffsetDateTime>,
    pub is_blocked: bool,
    pub blocked_by: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

impl Conversation {
    #[must_use]
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.participant_a == user_id || self.participant_b == user_id
    }

    /// The other participant. Callers must have checked `involves` first;
    /// for a foreign user id this returns `participant_a`.
    #[must_use]
    pub fn partner_of(&self, user_id: Uuid) -> Uuid {
        if self.participant_a == user_id { self.participant_b } else { self.participant_a }
    }
}

/// Sorts two user ids so either direction of a pair normalizes to the same
/// lookup key. The stored order is enforced again by a database constraint,
/// which is the final arbiter under concurrent first contact.
#[must_use]
pub fn canonical_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Truncates preview text to the stored limit on a character boundary.
#[must_use]
pub fn truncate_preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_MAX_CHARS {
        text.to_string()
    } else {
        text.chars().take(PREVIEW_MAX_CHARS).collect()
    }
}
