use crate::domain::message::{Delivery, NewDelivery, NewPayload, Payload};
use crate::error::Result;
use crate::stores::{DeliveryStore, PayloadStore};
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    writes_total: Counter<u64>,
    missing_payloads_total: Counter<u64>,
    swept_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            writes_total: meter
                .u64_counter("parley_message_writes_total")
                .with_description("Total two-phase message write attempts")
                .build(),
            missing_payloads_total: meter
                .u64_counter("parley_missing_payloads_total")
                .with_description("Delivery rows encountered without their payload row")
                .build(),
            swept_total: meter
                .u64_counter("parley_messages_swept_total")
                .with_description("Rows removed or flagged by the reconciliation sweep")
                .build(),
        }
    }
}

/// Message persistence across its two backends: the payload store holds
/// content, the delivery store holds routing and state flags, and nothing
/// but the `payload_ref` id ties them together. Every cross-backend join
/// and both halves of the reconciliation sweep live here.
#[derive(Clone, Debug)]
pub struct MessageStore {
    payloads: Arc<dyn PayloadStore>,
    deliveries: Arc<dyn DeliveryStore>,
    metrics: Metrics,
}

impl MessageStore {
    #[must_use]
    pub fn new(payloads: Arc<dyn PayloadStore>, deliveries: Arc<dyn DeliveryStore>) -> Self {
        Self { payloads, deliveries, metrics: Metrics::new() }
    }

    /// Two-phase write, payload first. If the delivery write fails the
    /// payload stays behind as an orphan; the sweep collects it once it
    /// ages past the grace window.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the referenced conversation does not
    /// exist, `AppError::Database` on either write failing.
    #[tracing::instrument(err(level = "warn"), skip(self, payload, delivery), fields(delivery_id = %delivery.id))]
    pub async fn create(&self, payload: &NewPayload, delivery: &NewDelivery) -> Result<Delivery> {
        self.payloads.insert(payload).await.inspect_err(|_| {
            self.metrics.writes_total.add(1, &[KeyValue::new("status", "payload_failed")]);
        })?;

        match self.deliveries.insert(delivery).await {
            Ok(stored) => {
                self.metrics.writes_total.add(1, &[KeyValue::new("status", "success")]);
                Ok(stored)
            }
            Err(e) => {
                self.metrics.writes_total.add(1, &[KeyValue::new("status", "delivery_failed")]);
                tracing::warn!(payload_id = %payload.id, "Payload stored without delivery row");
                Err(e)
            }
        }
    }

    /// Pages a conversation and joins each delivery to its payload. Rows
    /// whose payload is gone are returned with `None`; the caller decides
    /// how to present them.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn page_with_payloads(
        &self,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<(Delivery, Option<Payload>)>, i64)> {
        let (deliveries, total) =
            self.deliveries.page_by_conversation(conversation_id, limit, offset).await?;

        let refs: Vec<Uuid> = deliveries.iter().map(|d| d.payload_ref).collect();
        let mut payloads: HashMap<Uuid, Payload> =
            self.payloads.fetch_many(&refs).await?.into_iter().map(|p| (p.id, p)).collect();

        let joined = deliveries
            .into_iter()
            .map(|delivery| {
                let payload = payloads.remove(&delivery.payload_ref);
                if payload.is_none() {
                    self.metrics.missing_payloads_total.add(1, &[]);
                    tracing::warn!(
                        delivery_id = %delivery.id,
                        payload_ref = %delivery.payload_ref,
                        "Delivery row has no payload"
                    );
                }
                (delivery, payload)
            })
            .collect();

        Ok((joined, total))
    }

    /// Monotonic delivered flip; `Some` only when this call transitioned
    /// the row.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn mark_delivered(&self, id: Uuid) -> Result<Option<Delivery>> {
        self.deliveries.mark_delivered(id).await
    }

    /// Monotonic bulk read flip; returns only the rows this call
    /// transitioned.
    #[tracing::instrument(err(level = "warn"), skip(self, ids), fields(count = ids.len()))]
    pub async fn mark_read(&self, ids: &[Uuid]) -> Result<Vec<Delivery>> {
        self.deliveries.mark_read(ids).await
    }

    /// # Errors
    /// Returns `AppError::Unauthorized` unless `requester` sent the
    /// message, `AppError::NotFound` if it does not exist.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn soft_delete(&self, id: Uuid, requester: Uuid) -> Result<()> {
        self.deliveries.soft_delete(id, requester).await
    }

    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn unread_count(&self, user_id: Uuid, conversation_id: Option<Uuid>) -> Result<i64> {
        self.deliveries.unread_count(user_id, conversation_id).await
    }

    #[tracing::instrument(err(level = "warn"), skip(self, conversation_ids), fields(count = conversation_ids.len()))]
    pub async fn unread_counts(
        &self,
        user_id: Uuid,
        conversation_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, i64>> {
        self.deliveries.unread_counts(user_id, conversation_ids).await
    }

    /// Sweep half one: payloads old enough to be past any in-flight write
    /// that no delivery row references. These are leftovers of failed
    /// second phases and are deleted outright.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn sweep_orphan_payloads(&self, cutoff: OffsetDateTime, limit: i64) -> Result<u64> {
        let candidates = self.payloads.ids_created_before(cutoff, limit).await?;
        if candidates.is_empty() {
            return Ok(0);
        }

        let referenced: HashSet<Uuid> =
            self.deliveries.referenced_payloads(&candidates).await?.into_iter().collect();
        let orphans: Vec<Uuid> =
            candidates.into_iter().filter(|id| !referenced.contains(id)).collect();
        if orphans.is_empty() {
            return Ok(0);
        }

        let deleted = self.payloads.delete_many(&orphans).await?;
        self.metrics.swept_total.add(deleted, &[KeyValue::new("kind", "orphan_payload")]);
        Ok(deleted)
    }

    /// Sweep half two: deliveries whose payload row is gone. They can never
    /// render again, so they are soft-deleted to drop out of history.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn sweep_dangling_deliveries(
        &self,
        cutoff: OffsetDateTime,
        limit: i64,
    ) -> Result<u64> {
        let refs = self.deliveries.refs_created_before(cutoff, limit).await?;
        if refs.is_empty() {
            return Ok(0);
        }

        let payload_ids: Vec<Uuid> =
            refs.iter().map(|(_, payload_ref)| *payload_ref).collect::<HashSet<_>>().into_iter().collect();
        let existing: HashSet<Uuid> =
            self.payloads.filter_existing(&payload_ids).await?.into_iter().collect();

        let dangling: Vec<Uuid> = refs
            .into_iter()
            .filter(|(_, payload_ref)| !existing.contains(payload_ref))
            .map(|(delivery_id, _)| delivery_id)
            .collect();
        if dangling.is_empty() {
            return Ok(0);
        }

        let flagged = self.deliveries.soft_delete_many(&dangling).await?;
        self.metrics.swept_total.add(flagged, &[KeyValue::new("kind", "dangling_delivery")]);
        Ok(flagged)
    }
}
