//! In-memory store fakes for service-level tests. Each fake keeps the
//! observable contract of its Postgres or Redis counterpart: conflict on
//! duplicate pairs, monotonic flag flips, real TTL expiry.

use crate::domain::conversation::Conversation;
use crate::domain::message::{Delivery, NewDelivery, NewPayload, Payload};
use crate::domain::presence::PresenceRecord;
use crate::error::{AppError, Result};
use crate::stores::{ConversationStore, DeliveryStore, PayloadStore, PresenceStore, TypingStore};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    rows: Mutex<Vec<Conversation>>,
}

impl MemoryConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn find_by_pair(&self, participant_a: Uuid, participant_b: Uuid) -> Result<Option<Conversation>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .find(|c| c.participant_a == participant_a && c.participant_b == participant_b)
            .cloned())
    }

    async fn insert(&self, participant_a: Uuid, participant_b: Uuid) -> Result<Conversation> {
        if participant_a >= participant_b {
            return Err(AppError::Internal("Participants not in canonical order".to_string()));
        }

        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|c| c.participant_a == participant_a && c.participant_b == participant_b) {
            return Err(AppError::Conflict("Conversation already exists".to_string()));
        }

        let conversation = Conversation {
            id: Uuid::new_v4(),
            participant_a,
            participant_b,
            last_message_preview: None,
            last_message_at: None,
            is_blocked: false,
            blocked_by: None,
            created_at: OffsetDateTime::now_utc(),
        };
        rows.push(conversation.clone());
        Ok(conversation)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Conversation>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.iter().find(|c| c.id == id).cloned())
    }

    async fn update_preview(&self, id: Uuid, preview: &str, at: OffsetDateTime) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(conversation) = rows.iter_mut().find(|c| c.id == id) {
            conversation.last_message_preview = Some(preview.to_string());
            conversation.last_message_at = Some(at);
        }
        Ok(())
    }

    async fn block(&self, id: Uuid, by_user: Uuid) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(conversation) = rows.iter_mut().find(|c| c.id == id) {
            conversation.is_blocked = true;
            conversation.blocked_by = Some(by_user);
        }
        Ok(())
    }

    async fn unblock(&self, id: Uuid) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(conversation) = rows.iter_mut().find(|c| c.id == id) {
            conversation.is_blocked = false;
            conversation.blocked_by = None;
        }
        Ok(())
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64, offset: i64) -> Result<(Vec<Conversation>, i64)> {
        let rows = self.rows.lock().unwrap();
        let mut mine: Vec<Conversation> = rows.iter().filter(|c| c.involves(user_id)).cloned().collect();
        mine.sort_by(|x, y| {
            match (x.last_message_at, y.last_message_at) {
                (Some(a), Some(b)) => b.cmp(&a),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
            .then_with(|| y.created_at.cmp(&x.created_at))
        });

        let total = mine.len() as i64;
        let page = mine
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect();
        Ok((page, total))
    }

    async fn partner_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.iter().filter(|c| c.involves(user_id)).map(|c| c.partner_of(user_id)).collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryPayloadStore {
    rows: Mutex<HashMap<Uuid, Payload>>,
}

impl MemoryPayloadStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrites a stored row's creation time so sweep tests can age it.
    pub fn backdate(&self, id: Uuid, created_at: OffsetDateTime) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(payload) = rows.get_mut(&id) {
            payload.created_at = created_at;
        }
    }

    /// Drops a row without going through the sweep, simulating a lost
    /// payload write.
    pub fn vanish(&self, id: Uuid) {
        self.rows.lock().unwrap().remove(&id);
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.rows.lock().unwrap().contains_key(&id)
    }
}

#[async_trait]
impl PayloadStore for MemoryPayloadStore {
    async fn insert(&self, payload: &NewPayload) -> Result<Payload> {
        let row = Payload {
            id: payload.id,
            body: payload.body.clone(),
            media: payload.media.clone(),
            created_at: OffsetDateTime::now_utc(),
        };
        self.rows.lock().unwrap().insert(row.id, row.clone());
        Ok(row)
    }

    async fn fetch_many(&self, ids: &[Uuid]) -> Result<Vec<Payload>> {
        let rows = self.rows.lock().unwrap();
        Ok(ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
    }

    async fn filter_existing(&self, ids: &[Uuid]) -> Result<Vec<Uuid>> {
        let rows = self.rows.lock().unwrap();
        Ok(ids.iter().copied().filter(|id| rows.contains_key(id)).collect())
    }

    async fn ids_created_before(&self, cutoff: OffsetDateTime, limit: i64) -> Result<Vec<Uuid>> {
        let rows = self.rows.lock().unwrap();
        let mut old: Vec<(Uuid, OffsetDateTime)> = rows
            .values()
            .filter(|p| p.created_at < cutoff)
            .map(|p| (p.id, p.created_at))
            .collect();
        old.sort_by_key(|(_, created_at)| *created_at);
        Ok(old.into_iter().take(usize::try_from(limit).unwrap_or(0)).map(|(id, _)| id).collect())
    }

    async fn delete_many(&self, ids: &[Uuid]) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let mut deleted = 0;
        for id in ids {
            if rows.remove(id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[derive(Debug, Default)]
pub struct MemoryDeliveryStore {
    rows: Mutex<Vec<Delivery>>,
}

impl MemoryDeliveryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrites a stored row's creation time so sweep tests can age it.
    pub fn backdate(&self, id: Uuid, created_at: OffsetDateTime) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(delivery) = rows.iter_mut().find(|d| d.id == id) {
            delivery.created_at = created_at;
        }
    }

    pub fn is_soft_deleted(&self, id: Uuid) -> bool {
        let rows = self.rows.lock().unwrap();
        rows.iter().any(|d| d.id == id && d.is_deleted)
    }
}

#[async_trait]
impl DeliveryStore for MemoryDeliveryStore {
    async fn insert(&self, delivery: &NewDelivery) -> Result<Delivery> {
        let row = Delivery {
            id: delivery.id,
            conversation_id: delivery.conversation_id,
            sender_id: delivery.sender_id,
            receiver_id: delivery.receiver_id,
            kind: delivery.kind,
            payload_ref: delivery.payload_ref,
            reply_to: delivery.reply_to,
            is_delivered: false,
            delivered_at: None,
            is_read: false,
            read_at: None,
            is_deleted: false,
            created_at: OffsetDateTime::now_utc(),
        };
        self.rows.lock().unwrap().push(row.clone());
        Ok(row)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Delivery>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.iter().find(|d| d.id == id).cloned())
    }

    async fn page_by_conversation(
        &self,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Delivery>, i64)> {
        let rows = self.rows.lock().unwrap();
        let mut mine: Vec<Delivery> = rows
            .iter()
            .filter(|d| d.conversation_id == conversation_id && !d.is_deleted)
            .cloned()
            .collect();
        mine.sort_by(|x, y| y.created_at.cmp(&x.created_at).then_with(|| y.id.cmp(&x.id)));

        let total = mine.len() as i64;
        let page = mine
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect();
        Ok((page, total))
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<Option<Delivery>> {
        let mut rows = self.rows.lock().unwrap();
        let Some(delivery) = rows.iter_mut().find(|d| d.id == id && !d.is_delivered) else {
            return Ok(None);
        };
        delivery.is_delivered = true;
        delivery.delivered_at = Some(OffsetDateTime::now_utc());
        Ok(Some(delivery.clone()))
    }

    async fn mark_read(&self, ids: &[Uuid]) -> Result<Vec<Delivery>> {
        let mut rows = self.rows.lock().unwrap();
        let mut transitioned = Vec::new();
        for delivery in rows.iter_mut().filter(|d| ids.contains(&d.id) && !d.is_read) {
            delivery.is_read = true;
            delivery.read_at = Some(OffsetDateTime::now_utc());
            transitioned.push(delivery.clone());
        }
        Ok(transitioned)
    }

    async fn soft_delete(&self, id: Uuid, requester: Uuid) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let Some(delivery) = rows.iter_mut().find(|d| d.id == id) else {
            return Err(AppError::NotFound);
        };
        if delivery.sender_id != requester {
            return Err(AppError::Unauthorized);
        }
        delivery.is_deleted = true;
        Ok(())
    }

    async fn unread_count(&self, user_id: Uuid, conversation_id: Option<Uuid>) -> Result<i64> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|d| {
                d.receiver_id == user_id
                    && !d.is_read
                    && !d.is_deleted
                    && conversation_id.is_none_or(|c| d.conversation_id == c)
            })
            .count() as i64)
    }

    async fn unread_counts(&self, user_id: Uuid, conversation_ids: &[Uuid]) -> Result<HashMap<Uuid, i64>> {
        let rows = self.rows.lock().unwrap();
        let mut counts = HashMap::new();
        for delivery in rows.iter().filter(|d| {
            d.receiver_id == user_id
                && !d.is_read
                && !d.is_deleted
                && conversation_ids.contains(&d.conversation_id)
        }) {
            *counts.entry(delivery.conversation_id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn referenced_payloads(&self, payload_ids: &[Uuid]) -> Result<Vec<Uuid>> {
        let rows = self.rows.lock().unwrap();
        let mut referenced: Vec<Uuid> =
            payload_ids.iter().copied().filter(|p| rows.iter().any(|d| d.payload_ref == *p)).collect();
        referenced.dedup();
        Ok(referenced)
    }

    async fn refs_created_before(&self, cutoff: OffsetDateTime, limit: i64) -> Result<Vec<(Uuid, Uuid)>> {
        let rows = self.rows.lock().unwrap();
        let mut old: Vec<&Delivery> =
            rows.iter().filter(|d| !d.is_deleted && d.created_at < cutoff).collect();
        old.sort_by_key(|d| d.created_at);
        Ok(old
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|d| (d.id, d.payload_ref))
            .collect())
    }

    async fn soft_delete_many(&self, ids: &[Uuid]) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let mut flagged = 0;
        for delivery in rows.iter_mut().filter(|d| ids.contains(&d.id) && !d.is_deleted) {
            delivery.is_deleted = true;
            flagged += 1;
        }
        Ok(flagged)
    }
}

/// TTL entries age against the tokio clock; tests use short TTLs and
/// sleep past them.
#[derive(Debug, Default)]
pub struct MemoryPresenceStore {
    records: Mutex<HashMap<Uuid, (PresenceRecord, Option<Instant>)>>,
}

impl MemoryPresenceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn put(&self, user_id: Uuid, record: &PresenceRecord, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now().checked_add(ttl);
        self.records.lock().unwrap().insert(user_id, (record.clone(), expires_at));
        Ok(())
    }

    async fn get(&self, user_id: Uuid) -> Result<Option<PresenceRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records
            .get(&user_id)
            .filter(|(_, expires_at)| expires_at.is_none_or(|at| Instant::now() < at))
            .map(|(record, _)| record.clone()))
    }

    async fn get_many(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, PresenceRecord>> {
        let records = self.records.lock().unwrap();
        let now = Instant::now();
        Ok(user_ids
            .iter()
            .filter_map(|id| {
                records
                    .get(id)
                    .filter(|(_, expires_at)| expires_at.is_none_or(|at| now < at))
                    .map(|(record, _)| (*id, record.clone()))
            })
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTypingStore {
    entries: Mutex<HashMap<(Uuid, Uuid), Instant>>,
}

impl MemoryTypingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TypingStore for MemoryTypingStore {
    async fn set(&self, conversation_id: Uuid, user_id: Uuid, ttl: Duration) -> Result<()> {
        if let Some(expires_at) = Instant::now().checked_add(ttl) {
            self.entries.lock().unwrap().insert((conversation_id, user_id), expires_at);
        }
        Ok(())
    }

    async fn clear(&self, conversation_id: Uuid, user_id: Uuid) -> Result<()> {
        self.entries.lock().unwrap().remove(&(conversation_id, user_id));
        Ok(())
    }

    async fn is_typing(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(&(conversation_id, user_id)).is_some_and(|at| Instant::now() < *at))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<Vec<(String, String, bytes::Bytes)>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().iter().map(|(key, _, _)| key.clone()).collect()
    }
}

#[async_trait]
impl crate::adapters::storage::ObjectStorage for MemoryStorage {
    async fn put(&self, key: &str, content_type: &str, bytes: bytes::Bytes) -> Result<String> {
        self.objects.lock().unwrap().push((key.to_string(), content_type.to_string(), bytes));
        Ok(format!("mem://{key}"))
    }

    async fn check(&self) -> Result<()> {
        Ok(())
    }
}
