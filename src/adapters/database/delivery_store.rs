use crate::adapters::database::DbPool;
use crate::adapters::database::records::{DeliveryRecord, UnreadCountRecord};
use crate::domain::message::{Delivery, NewDelivery};
use crate::error::{AppError, Result};
use crate::stores::DeliveryStore;
use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct PgDeliveryStore {
    pool: DbPool,
}

impl PgDeliveryStore {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryStore for PgDeliveryStore {
    #[tracing::instrument(level = "debug", skip(self, delivery), fields(delivery_id = %delivery.id))]
    async fn insert(&self, delivery: &NewDelivery) -> Result<Delivery> {
        let result = sqlx::query_as::<_, DeliveryRecord>(
            r#"
            INSERT INTO message_deliveries (id, conversation_id, sender_id, receiver_id, kind,
                                            payload_ref, reply_to)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, conversation_id, sender_id, receiver_id, kind, payload_ref, reply_to,
                      is_delivered, delivered_at, is_read, read_at, is_deleted, created_at
            "#,
        )
        .bind(delivery.id)
        .bind(delivery.conversation_id)
        .bind(delivery.sender_id)
        .bind(delivery.receiver_id)
        .bind(delivery.kind.as_str())
        .bind(delivery.payload_ref)
        .bind(delivery.reply_to)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(record) => Ok(record.into()),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("23503") => {
                // Foreign key violation: the conversation does not exist.
                Err(AppError::NotFound)
            }
            Err(e) => Err(AppError::Database(e)),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn find(&self, id: Uuid) -> Result<Option<Delivery>> {
        let record = sqlx::query_as::<_, DeliveryRecord>(
            r#"
            SELECT id, conversation_id, sender_id, receiver_id, kind, payload_ref, reply_to,
                   is_delivered, delivered_at, is_read, read_at, is_deleted, created_at
            FROM message_deliveries
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Into::into))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn page_by_conversation(
        &self,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Delivery>, i64)> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM message_deliveries WHERE conversation_id = $1 AND NOT is_deleted",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;

        let records = sqlx::query_as::<_, DeliveryRecord>(
            r#"
            SELECT id, conversation_id, sender_id, receiver_id, kind, payload_ref, reply_to,
                   is_delivered, delivered_at, is_read, read_at, is_deleted, created_at
            FROM message_deliveries
            WHERE conversation_id = $1 AND NOT is_deleted
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(conversation_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((records.into_iter().map(Into::into).collect(), total))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn mark_delivered(&self, id: Uuid) -> Result<Option<Delivery>> {
        let record = sqlx::query_as::<_, DeliveryRecord>(
            r#"
            UPDATE message_deliveries
            SET is_delivered = TRUE, delivered_at = NOW()
            WHERE id = $1 AND NOT is_delivered
            RETURNING id, conversation_id, sender_id, receiver_id, kind, payload_ref, reply_to,
                      is_delivered, delivered_at, is_read, read_at, is_deleted, created_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Into::into))
    }

    #[tracing::instrument(level = "debug", skip(self, ids), fields(count = ids.len()))]
    async fn mark_read(&self, ids: &[Uuid]) -> Result<Vec<Delivery>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, DeliveryRecord>(
            r#"
            UPDATE message_deliveries
            SET is_read = TRUE, read_at = NOW()
            WHERE id = ANY($1) AND NOT is_read
            RETURNING id, conversation_id, sender_id, receiver_id, kind, payload_ref, reply_to,
                      is_delivered, delivered_at, is_read, read_at, is_deleted, created_at
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn soft_delete(&self, id: Uuid, requester: Uuid) -> Result<()> {
        let Some(delivery) = self.find(id).await? else {
            return Err(AppError::NotFound);
        };
        if delivery.sender_id != requester {
            return Err(AppError::Unauthorized);
        }

        sqlx::query("UPDATE message_deliveries SET is_deleted = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn unread_count(&self, user_id: Uuid, conversation_id: Option<Uuid>) -> Result<i64> {
        let count: i64 = match conversation_id {
            Some(conversation_id) => {
                sqlx::query_scalar(
                    r#"
                    SELECT COUNT(*) FROM message_deliveries
                    WHERE receiver_id = $1 AND conversation_id = $2 AND NOT is_read AND NOT is_deleted
                    "#,
                )
                .bind(user_id)
                .bind(conversation_id)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    r#"
                    SELECT COUNT(*) FROM message_deliveries
                    WHERE receiver_id = $1 AND NOT is_read AND NOT is_deleted
                    "#,
                )
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?
            }
        };

        Ok(count)
    }

    #[tracing::instrument(level = "debug", skip(self, conversation_ids), fields(count = conversation_ids.len()))]
    async fn unread_counts(&self, user_id: Uuid, conversation_ids: &[Uuid]) -> Result<HashMap<Uuid, i64>> {
        if conversation_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, UnreadCountRecord>(
            r#"
            SELECT conversation_id, COUNT(*) AS unread
            FROM message_deliveries
            WHERE receiver_id = $1 AND conversation_id = ANY($2) AND NOT is_read AND NOT is_deleted
            GROUP BY conversation_id
            "#,
        )
        .bind(user_id)
        .bind(conversation_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| (row.conversation_id, row.unread)).collect())
    }

    #[tracing::instrument(level = "debug", skip(self, payload_ids), fields(count = payload_ids.len()))]
    async fn referenced_payloads(&self, payload_ids: &[Uuid]) -> Result<Vec<Uuid>> {
        if payload_ids.is_empty() {
            return Ok(Vec::new());
        }
        let referenced = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT payload_ref FROM message_deliveries WHERE payload_ref = ANY($1)",
        )
        .bind(payload_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(referenced)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn refs_created_before(&self, cutoff: OffsetDateTime, limit: i64) -> Result<Vec<(Uuid, Uuid)>> {
        let refs = sqlx::query_as::<_, (Uuid, Uuid)>(
            r#"
            SELECT id, payload_ref FROM message_deliveries
            WHERE created_at < $1 AND NOT is_deleted
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(refs)
    }

    #[tracing::instrument(level = "debug", skip(self, ids), fields(count = ids.len()))]
    async fn soft_delete_many(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("UPDATE message_deliveries SET is_deleted = TRUE WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
