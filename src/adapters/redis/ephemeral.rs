use crate::adapters::redis::RedisClient;
use crate::domain::presence::PresenceRecord;
use crate::error::{AppError, Result};
use crate::stores::{PresenceStore, TypingStore};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const STATUS_PREFIX: &str = "status:";
const TYPING_PREFIX: &str = "typing:";

/// Presence records as TTL-keyed JSON documents. Expiry is the only cleanup
/// path for records a crashed node leaves behind.
#[derive(Debug, Clone)]
pub struct RedisPresenceStore {
    redis: Arc<RedisClient>,
}

impl RedisPresenceStore {
    #[must_use]
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }

    fn key(user_id: Uuid) -> String {
        format!("{STATUS_PREFIX}{user_id}")
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    #[tracing::instrument(level = "debug", skip(self, record))]
    async fn put(&self, user_id: Uuid, record: &PresenceRecord, ttl: Duration) -> Result<()> {
        let value = serde_json::to_string(record)
            .map_err(|e| AppError::Internal(format!("Failed to encode presence record: {e}")))?;
        let mut conn = self.redis.publisher();
        let _: () = conn.set_ex(Self::key(user_id), value, ttl.as_secs()).await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get(&self, user_id: Uuid) -> Result<Option<PresenceRecord>> {
        let mut conn = self.redis.publisher();
        let raw: Option<String> = conn.get(Self::key(user_id)).await?;

        Ok(raw.and_then(|value| match serde_json::from_str(&value) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(error = %e, %user_id, "Discarding malformed presence record");
                None
            }
        }))
    }

    #[tracing::instrument(level = "debug", skip(self, user_ids), fields(count = user_ids.len()))]
    async fn get_many(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, PresenceRecord>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let keys: Vec<String> = user_ids.iter().map(|id| Self::key(*id)).collect();
        let mut conn = self.redis.publisher();
        let values: Vec<Option<String>> = conn.mget(&keys).await?;

        let mut records = HashMap::new();
        for (user_id, value) in user_ids.iter().zip(values) {
            if let Some(value) = value
                && let Ok(record) = serde_json::from_str(&value)
            {
                records.insert(*user_id, record);
            }
        }
        Ok(records)
    }
}

/// Typing markers are bare sentinel keys; a short TTL is the safety net for
/// a missed stop event.
#[derive(Debug, Clone)]
pub struct RedisTypingStore {
    redis: Arc<RedisClient>,
}

impl RedisTypingStore {
    #[must_use]
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }

    fn key(conversation_id: Uuid, user_id: Uuid) -> String {
        format!("{TYPING_PREFIX}{conversation_id}:{user_id}")
    }
}

#[async_trait]
impl TypingStore for RedisTypingStore {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn set(&self, conversation_id: Uuid, user_id: Uuid, ttl: Duration) -> Result<()> {
        let mut conn = self.redis.publisher();
        let _: () = conn.set_ex(Self::key(conversation_id, user_id), 1u8, ttl.as_secs()).await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn clear(&self, conversation_id: Uuid, user_id: Uuid) -> Result<()> {
        let mut conn = self.redis.publisher();
        let _: () = conn.del(Self::key(conversation_id, user_id)).await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn is_typing(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        let mut conn = self.redis.publisher();
        let exists: bool = conn.exists(Self::key(conversation_id, user_id)).await?;
        Ok(exists)
    }
}
