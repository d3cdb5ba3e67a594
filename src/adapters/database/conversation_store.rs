use crate::adapters::database::DbPool;
use crate::adapters::database::records::ConversationRecord;
use crate::domain::conversation::Conversation;
use crate::error::{AppError, Result};
use crate::stores::ConversationStore;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct PgConversationStore {
    pool: DbPool,
}

impl PgConversationStore {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn find_by_pair(&self, participant_a: Uuid, participant_b: Uuid) -> Result<Option<Conversation>> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT id, participant_a, participant_b, last_message_preview, last_message_at,
                   is_blocked, blocked_by, created_at
            FROM conversations
            WHERE participant_a = $1 AND participant_b = $2
            "#,
        )
        .bind(participant_a)
        .bind(participant_b)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Into::into))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn insert(&self, participant_a: Uuid, participant_b: Uuid) -> Result<Conversation> {
        let result = sqlx::query_as::<_, ConversationRecord>(
            r#"
            INSERT INTO conversations (participant_a, participant_b)
            VALUES ($1, $2)
            RETURNING id, participant_a, participant_b, last_message_preview, last_message_at,
                      is_blocked, blocked_by, created_at
            "#,
        )
        .bind(participant_a)
        .bind(participant_b)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(record) => Ok(record.into()),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("23505") => {
                // Unique violation: a concurrent first contact won the race.
                Err(AppError::Conflict("Conversation already exists".to_string()))
            }
            Err(e) => Err(AppError::Database(e)),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn find(&self, id: Uuid) -> Result<Option<Conversation>> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT id, participant_a, participant_b, last_message_preview, last_message_at,
                   is_blocked, blocked_by, created_at
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Into::into))
    }

    #[tracing::instrument(level = "debug", skip(self, preview))]
    async fn update_preview(&self, id: Uuid, preview: &str, at: OffsetDateTime) -> Result<()> {
        sqlx::query("UPDATE conversations SET last_message_preview = $2, last_message_at = $3 WHERE id = $1")
            .bind(id)
            .bind(preview)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn block(&self, id: Uuid, by_user: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE conversations SET is_blocked = TRUE, blocked_by = $2 WHERE id = $1")
            .bind(id)
            .bind(by_user)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn unblock(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE conversations SET is_blocked = FALSE, blocked_by = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_for_user(&self, user_id: Uuid, limit: i64, offset: i64) -> Result<(Vec<Conversation>, i64)> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM conversations WHERE participant_a = $1 OR participant_b = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        let records = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT id, participant_a, participant_b, last_message_preview, last_message_at,
                   is_blocked, blocked_by, created_at
            FROM conversations
            WHERE participant_a = $1 OR participant_b = $1
            ORDER BY last_message_at DESC NULLS LAST, created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((records.into_iter().map(Into::into).collect(), total))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn partner_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let partners = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT CASE WHEN participant_a = $1 THEN participant_b ELSE participant_a END
            FROM conversations
            WHERE participant_a = $1 OR participant_b = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(partners)
    }
}
