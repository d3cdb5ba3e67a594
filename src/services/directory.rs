use crate::domain::conversation::{Conversation, canonical_pair, truncate_preview};
use crate::error::{AppError, Result};
use crate::stores::ConversationStore;
use opentelemetry::{global, metrics::Counter};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    created_total: Counter<u64>,
    pair_races_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            created_total: meter
                .u64_counter("directory_conversations_created_total")
                .with_description("Total conversations created")
                .build(),
            pair_races_total: meter
                .u64_counter("directory_pair_races_total")
                .with_description("Concurrent first-contact inserts resolved by re-read")
                .build(),
        }
    }
}

/// Canonical registry of conversations. Every caller goes through
/// [`resolve_or_create`](Self::resolve_or_create), so a user pair maps to
/// exactly one row regardless of who contacted whom first.
#[derive(Clone, Debug)]
pub struct ConversationDirectory {
    conversations: Arc<dyn ConversationStore>,
    metrics: Metrics,
}

impl ConversationDirectory {
    #[must_use]
    pub fn new(conversations: Arc<dyn ConversationStore>) -> Self {
        Self { conversations, metrics: Metrics::new() }
    }

    /// Returns the conversation for a user pair, creating it on first
    /// contact. Loses the insert race gracefully: a unique-key conflict
    /// means the other side just created the row, so it is re-read.
    ///
    /// # Errors
    /// Returns `AppError::Validation` when both ids name the same user.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn resolve_or_create(&self, user_a: Uuid, user_b: Uuid) -> Result<Conversation> {
        if user_a == user_b {
            return Err(AppError::Validation(
                "Cannot start a conversation with yourself".to_string(),
            ));
        }

        let (participant_a, participant_b) = canonical_pair(user_a, user_b);
        if let Some(existing) = self.conversations.find_by_pair(participant_a, participant_b).await? {
            return Ok(existing);
        }

        match self.conversations.insert(participant_a, participant_b).await {
            Ok(created) => {
                self.metrics.created_total.add(1, &[]);
                tracing::debug!(conversation_id = %created.id, "Conversation created");
                Ok(created)
            }
            Err(AppError::Conflict(_)) => {
                self.metrics.pair_races_total.add(1, &[]);
                self.conversations
                    .find_by_pair(participant_a, participant_b)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal("Conversation missing after insert conflict".to_string())
                    })
            }
            Err(e) => Err(e),
        }
    }

    /// # Errors
    /// Returns `AppError::NotFound` if the conversation does not exist.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<Conversation> {
        self.conversations.find(id).await?.ok_or(AppError::NotFound)
    }

    /// Stamps the conversation with its latest message preview. The text is
    /// truncated to the stored limit here so no caller can overshoot it.
    #[tracing::instrument(err(level = "warn"), skip(self, preview))]
    pub async fn update_preview(&self, id: Uuid, preview: &str, at: OffsetDateTime) -> Result<()> {
        self.conversations.update_preview(id, &truncate_preview(preview), at).await
    }

    /// # Errors
    /// Returns `AppError::Unauthorized` if `user_id` is not a participant.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn block(&self, id: Uuid, user_id: Uuid) -> Result<()> {
        let conversation = self.get(id).await?;
        if !conversation.involves(user_id) {
            return Err(AppError::Unauthorized);
        }
        self.conversations.block(id, user_id).await
    }

    /// Either participant may lift a block, including one placed by the
    /// other side.
    ///
    /// # Errors
    /// Returns `AppError::Unauthorized` if `user_id` is not a participant.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn unblock(&self, id: Uuid, user_id: Uuid) -> Result<()> {
        let conversation = self.get(id).await?;
        if !conversation.involves(user_id) {
            return Err(AppError::Unauthorized);
        }
        self.conversations.unblock(id).await
    }

    /// Pages a user's conversations, most recently active first.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Conversation>, i64)> {
        self.conversations.list_for_user(user_id, limit, offset).await
    }

    /// Everyone `user_id` shares a conversation with.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn partner_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.conversations.partner_ids(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryConversationStore;

    fn directory() -> (ConversationDirectory, Arc<MemoryConversationStore>) {
        let store = Arc::new(MemoryConversationStore::new());
        (ConversationDirectory::new(Arc::clone(&store) as Arc<dyn ConversationStore>), store)
    }

    #[tokio::test]
    async fn test_resolve_is_direction_independent() {
        let (directory, store) = directory();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let first = directory.resolve_or_create(alice, bob).await.unwrap();
        let second = directory.resolve_or_create(bob, alice).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.row_count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_rejects_self_pair() {
        let (directory, _) = directory();
        let user = Uuid::new_v4();

        let result = directory.resolve_or_create(user, user).await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_concurrent_resolve_converges() {
        let (directory, store) = directory();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let a = tokio::spawn({
            let directory = directory.clone();
            async move { directory.resolve_or_create(alice, bob).await }
        });
        let b = tokio::spawn({
            let directory = directory.clone();
            async move { directory.resolve_or_create(bob, alice).await }
        });

        let first = a.await.unwrap().unwrap();
        let second = b.await.unwrap().unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.row_count(), 1);
    }

    #[tokio::test]
    async fn test_insert_conflict_falls_back_to_reread() {
        let (directory, _) = directory();
        let (participant_a, participant_b) = canonical_pair(Uuid::new_v4(), Uuid::new_v4());

        // Seed the row as if another node created it between our find and
        // insert, then resolve again through the conflict path.
        let seeded = directory.conversations.insert(participant_a, participant_b).await.unwrap();
        let resolved = directory.resolve_or_create(participant_b, participant_a).await.unwrap();

        assert_eq!(seeded.id, resolved.id);
    }

    #[tokio::test]
    async fn test_block_requires_membership() {
        let (directory, _) = directory();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let conversation = directory.resolve_or_create(alice, bob).await.unwrap();

        let outsider = directory.block(conversation.id, Uuid::new_v4()).await;
        assert!(matches!(outsider, Err(AppError::Unauthorized)));

        directory.block(conversation.id, alice).await.unwrap();
        let blocked = directory.get(conversation.id).await.unwrap();
        assert!(blocked.is_blocked);
        assert_eq!(blocked.blocked_by, Some(alice));
    }

    #[tokio::test]
    async fn test_either_participant_can_unblock() {
        let (directory, _) = directory();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let conversation = directory.resolve_or_create(alice, bob).await.unwrap();

        directory.block(conversation.id, alice).await.unwrap();
        directory.unblock(conversation.id, bob).await.unwrap();

        let unblocked = directory.get(conversation.id).await.unwrap();
        assert!(!unblocked.is_blocked);
        assert_eq!(unblocked.blocked_by, None);
    }

    #[tokio::test]
    async fn test_preview_is_truncated_before_storage() {
        let (directory, _) = directory();
        let conversation =
            directory.resolve_or_create(Uuid::new_v4(), Uuid::new_v4()).await.unwrap();
        let long = "p".repeat(2000);

        directory.update_preview(conversation.id, &long, OffsetDateTime::now_utc()).await.unwrap();

        let updated = directory.get(conversation.id).await.unwrap();
        assert_eq!(updated.last_message_preview.unwrap().chars().count(), 500);
    }
}
