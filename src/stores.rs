//! Persistence seams. Each store owns exactly one table or key family;
//! anything spanning two stores (the payload/delivery join, the
//! reconciliation sweep) happens in application space on top of these.

use crate::domain::conversation::Conversation;
use crate::domain::message::{Delivery, NewDelivery, NewPayload, Payload};
use crate::domain::presence::PresenceRecord;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

#[async_trait]
pub trait ConversationStore: Send + Sync + std::fmt::Debug {
    /// Looks up the row for a canonically ordered pair.
    async fn find_by_pair(&self, participant_a: Uuid, participant_b: Uuid) -> Result<Option<Conversation>>;

    /// Inserts a row for a canonically ordered pair. A concurrent insert
    /// for the same pair surfaces as [`crate::error::AppError::Conflict`];
    /// callers re-read instead of failing.
    async fn insert(&self, participant_a: Uuid, participant_b: Uuid) -> Result<Conversation>;

    async fn find(&self, id: Uuid) -> Result<Option<Conversation>>;

    /// Last-write-wins preview update. Missing rows are a no-op.
    async fn update_preview(&self, id: Uuid, preview: &str, at: OffsetDateTime) -> Result<()>;

    async fn block(&self, id: Uuid, by_user: Uuid) -> Result<()>;

    async fn unblock(&self, id: Uuid) -> Result<()>;

    /// Pages conversations for a user, most recent message first.
    async fn list_for_user(&self, user_id: Uuid, limit: i64, offset: i64) -> Result<(Vec<Conversation>, i64)>;

    /// Every user this user shares a conversation with.
    async fn partner_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>>;
}

#[async_trait]
pub trait PayloadStore: Send + Sync + std::fmt::Debug {
    async fn insert(&self, payload: &NewPayload) -> Result<Payload>;

    /// Fetches the payloads that exist among `ids`; missing ids are simply
    /// absent from the result.
    async fn fetch_many(&self, ids: &[Uuid]) -> Result<Vec<Payload>>;

    /// Which of `ids` exist. Used by the sweep to find dangling deliveries.
    async fn filter_existing(&self, ids: &[Uuid]) -> Result<Vec<Uuid>>;

    /// Payload ids older than `cutoff`, oldest first. Sweep candidates.
    async fn ids_created_before(&self, cutoff: OffsetDateTime, limit: i64) -> Result<Vec<Uuid>>;

    async fn delete_many(&self, ids: &[Uuid]) -> Result<u64>;
}

#[async_trait]
pub trait DeliveryStore: Send + Sync + std::fmt::Debug {
    async fn insert(&self, delivery: &NewDelivery) -> Result<Delivery>;

    /// Point read, soft-deleted rows included.
    async fn find(&self, id: Uuid) -> Result<Option<Delivery>>;

    /// Pages non-deleted rows by creation time descending, with the total
    /// count of non-deleted rows in the conversation.
    async fn page_by_conversation(&self, conversation_id: Uuid, limit: i64, offset: i64)
    -> Result<(Vec<Delivery>, i64)>;

    /// Monotonic delivered flip. Returns the updated row only when this
    /// call performed the transition; `None` means the row was already
    /// delivered or does not exist.
    async fn mark_delivered(&self, id: Uuid) -> Result<Option<Delivery>>;

    /// Monotonic bulk read flip. Returns only the rows this call
    /// transitioned, so each affected sender can be notified exactly once.
    async fn mark_read(&self, ids: &[Uuid]) -> Result<Vec<Delivery>>;

    /// Flags a row deleted. Fails `Unauthorized` unless `requester` is the
    /// stored sender, `NotFound` if the row does not exist.
    async fn soft_delete(&self, id: Uuid, requester: Uuid) -> Result<()>;

    async fn unread_count(&self, user_id: Uuid, conversation_id: Option<Uuid>) -> Result<i64>;

    /// One aggregate query for a page of conversations.
    async fn unread_counts(&self, user_id: Uuid, conversation_ids: &[Uuid]) -> Result<HashMap<Uuid, i64>>;

    /// Which of `payload_ids` are referenced by any delivery row.
    async fn referenced_payloads(&self, payload_ids: &[Uuid]) -> Result<Vec<Uuid>>;

    /// `(delivery id, payload_ref)` for non-deleted rows older than
    /// `cutoff`. Sweep candidates for the dangling-delivery half.
    async fn refs_created_before(&self, cutoff: OffsetDateTime, limit: i64) -> Result<Vec<(Uuid, Uuid)>>;

    /// Sweep remediation for deliveries whose payload is gone.
    async fn soft_delete_many(&self, ids: &[Uuid]) -> Result<u64>;
}

#[async_trait]
pub trait PresenceStore: Send + Sync + std::fmt::Debug {
    async fn put(&self, user_id: Uuid, record: &PresenceRecord, ttl: Duration) -> Result<()>;

    async fn get(&self, user_id: Uuid) -> Result<Option<PresenceRecord>>;

    async fn get_many(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, PresenceRecord>>;
}

#[async_trait]
pub trait TypingStore: Send + Sync + std::fmt::Debug {
    async fn set(&self, conversation_id: Uuid, user_id: Uuid, ttl: Duration) -> Result<()>;

    async fn clear(&self, conversation_id: Uuid, user_id: Uuid) -> Result<()>;

    async fn is_typing(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool>;
}
