use crate::adapters::database::DbPool;
use crate::adapters::database::records::PayloadRecord;
use crate::domain::message::{NewPayload, Payload};
use crate::error::Result;
use crate::stores::PayloadStore;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct PgPayloadStore {
    pool: DbPool,
}

impl PgPayloadStore {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PayloadStore for PgPayloadStore {
    #[tracing::instrument(level = "debug", skip(self, payload), fields(payload_id = %payload.id))]
    async fn insert(&self, payload: &NewPayload) -> Result<Payload> {
        let media = payload.media.as_ref();
        let record = sqlx::query_as::<_, PayloadRecord>(
            r#"
            INSERT INTO message_payloads (id, body, media_url, media_mime_type, media_size_bytes,
                                          media_filename, media_thumbnail_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, body, media_url, media_mime_type, media_size_bytes, media_filename,
                      media_thumbnail_url, created_at
            "#,
        )
        .bind(payload.id)
        .bind(payload.body.as_deref())
        .bind(media.map(|m| m.url.as_str()))
        .bind(media.and_then(|m| m.mime_type.as_deref()))
        .bind(media.and_then(|m| m.size_bytes))
        .bind(media.and_then(|m| m.filename.as_deref()))
        .bind(media.and_then(|m| m.thumbnail_url.as_deref()))
        .fetch_one(&self.pool)
        .await?;

        Ok(record.into())
    }

    #[tracing::instrument(level = "debug", skip(self, ids), fields(count = ids.len()))]
    async fn fetch_many(&self, ids: &[Uuid]) -> Result<Vec<Payload>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, PayloadRecord>(
            r#"
            SELECT id, body, media_url, media_mime_type, media_size_bytes, media_filename,
                   media_thumbnail_url, created_at
            FROM message_payloads
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(level = "debug", skip(self, ids), fields(count = ids.len()))]
    async fn filter_existing(&self, ids: &[Uuid]) -> Result<Vec<Uuid>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let existing = sqlx::query_scalar::<_, Uuid>("SELECT id FROM message_payloads WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        Ok(existing)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn ids_created_before(&self, cutoff: OffsetDateTime, limit: i64) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM message_payloads WHERE created_at < $1 ORDER BY created_at ASC LIMIT $2",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    #[tracing::instrument(level = "debug", skip(self, ids), fields(count = ids.len()))]
    async fn delete_many(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM message_payloads WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
