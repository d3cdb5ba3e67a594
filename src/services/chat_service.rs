use crate::domain::codec::{self, MessageCodec};
use crate::domain::message::{
    DECRYPT_PLACEHOLDER, Delivery, MediaRef, Message, NewDelivery, NewPayload, OutgoingMessage,
    preview_for,
};
use crate::error::{AppError, Result};
use crate::protocol::{ConversationDto, ConversationPage, MessagePage, ServerEvent};
use crate::services::directory::ConversationDirectory;
use crate::services::fanout::EventFanout;
use crate::services::message_store::MessageStore;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Clone, Debug)]
struct Metrics {
    sent_total: Counter<u64>,
    decrypt_failures_total: Counter<u64>,
    history_page_size: Histogram<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            sent_total: meter
                .u64_counter("parley_messages_sent_total")
                .with_description("Total message send attempts")
                .build(),
            decrypt_failures_total: meter
                .u64_counter("parley_decrypt_failures_total")
                .with_description("Stored bodies that no longer decrypt")
                .build(),
            history_page_size: meter
                .u64_histogram("parley_message_history_page_size")
                .with_description("Number of messages returned in a single history page")
                .build(),
        }
    }
}

/// Converts one-based paging into a store window, clamping the page size.
fn page_window(page: Option<u32>, page_size: Option<u32>) -> (i64, i64, u32, u32) {
    let page = page.filter(|p| *p >= 1).unwrap_or(1);
    let size = match page_size {
        Some(s) if s >= 1 => s.min(MAX_PAGE_SIZE),
        _ => DEFAULT_PAGE_SIZE,
    };
    let limit = i64::from(size);
    let offset = (i64::from(page) - 1) * limit;
    (limit, offset, page, size)
}

/// Everything a participant can do with direct messages. Owns the send
/// pipeline end to end, including the fan-out pushes, so handlers stay
/// transport-only.
#[derive(Clone, Debug)]
pub struct ChatService {
    directory: ConversationDirectory,
    messages: MessageStore,
    codec: MessageCodec,
    fanout: Arc<dyn EventFanout>,
    metrics: Metrics,
}

impl ChatService {
    #[must_use]
    pub fn new(
        directory: ConversationDirectory,
        messages: MessageStore,
        codec: MessageCodec,
        fanout: Arc<dyn EventFanout>,
    ) -> Self {
        Self { directory, messages, codec, fanout, metrics: Metrics::new() }
    }

    /// Sends a message. Text bodies are validated raw, sanitized, then
    /// encrypted; the receiver is only notified once every write has
    /// succeeded, so a push never references state that failed to land.
    ///
    /// # Errors
    /// Returns `AppError::ConversationBlocked` when the pair is blocked,
    /// `AppError::Validation`, `AppError::EmptyContent` or
    /// `AppError::TooLong` for bad input, and storage errors otherwise.
    #[tracing::instrument(
        err(level = "warn"),
        skip(self, outgoing),
        fields(receiver_id = %outgoing.receiver_id, kind = outgoing.kind.as_str())
    )]
    pub async fn send(&self, sender_id: Uuid, outgoing: OutgoingMessage) -> Result<Message> {
        let conversation =
            self.directory.resolve_or_create(sender_id, outgoing.receiver_id).await?;
        if conversation.is_blocked {
            self.metrics.sent_total.add(1, &[KeyValue::new("status", "blocked")]);
            return Err(AppError::ConversationBlocked);
        }

        outgoing.validate_shape()?;
        let sanitized_text = if outgoing.kind.is_text() {
            let raw = outgoing.text.as_deref().unwrap_or_default();
            codec::validate_content(raw)?;
            Some(codec::sanitize(raw))
        } else {
            None
        };
        let body = sanitized_text.as_deref().map(|text| self.codec.encrypt(text)).transpose()?;

        let payload = NewPayload { id: Uuid::now_v7(), body, media: outgoing.media.clone() };
        let delivery = NewDelivery {
            id: Uuid::now_v7(),
            conversation_id: conversation.id,
            sender_id,
            receiver_id: outgoing.receiver_id,
            kind: outgoing.kind,
            payload_ref: payload.id,
            reply_to: outgoing.reply_to,
        };

        let stored = match self.messages.create(&payload, &delivery).await {
            Ok(stored) => stored,
            Err(e) => {
                self.metrics.sent_total.add(1, &[KeyValue::new("status", "failure")]);
                return Err(e);
            }
        };

        let preview = preview_for(outgoing.kind, sanitized_text.as_deref());
        if let Err(e) = self.directory.update_preview(conversation.id, &preview, stored.created_at).await
        {
            self.metrics.sent_total.add(1, &[KeyValue::new("status", "preview_failed")]);
            return Err(e);
        }

        self.metrics.sent_total.add(1, &[KeyValue::new("status", "success")]);
        let message = assemble(stored, sanitized_text, outgoing.media);
        self.fanout
            .push_to_user(
                message.receiver_id,
                ServerEvent::NewMessage { message: message.clone().into() },
            )
            .await;
        tracing::debug!(message_id = %message.id, "Message stored and fanned out");
        Ok(message)
    }

    /// Pages a conversation's history, newest first. Each stored body is
    /// decrypted independently: one bad ciphertext turns into a placeholder
    /// without touching its neighbors, and deliveries whose payload row is
    /// gone are dropped from the page.
    ///
    /// # Errors
    /// Returns `AppError::Unauthorized` for non-participants and
    /// `AppError::NotFound` for unknown conversations.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn history(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> Result<MessagePage> {
        let conversation = self.directory.get(conversation_id).await?;
        if !conversation.involves(user_id) {
            return Err(AppError::Unauthorized);
        }

        let (limit, offset, page, page_size) = page_window(page, page_size);
        let (rows, total) = self.messages.page_with_payloads(conversation_id, limit, offset).await?;

        let mut messages = Vec::with_capacity(rows.len());
        for (delivery, payload) in rows {
            let Some(payload) = payload else {
                continue;
            };
            let (text, media) = if delivery.kind.is_text() {
                (Some(self.decrypt_or_placeholder(delivery.id, payload.body.as_deref())), None)
            } else {
                (None, payload.media)
            };
            messages.push(assemble(delivery, text, media).into());
        }

        self.metrics.history_page_size.record(messages.len() as u64, &[]);
        Ok(MessagePage { messages, total, page, page_size })
    }

    fn decrypt_or_placeholder(&self, message_id: Uuid, body: Option<&[u8]>) -> String {
        let decrypted = body.ok_or(AppError::DecryptionFailed).and_then(|b| self.codec.decrypt(b));
        match decrypted {
            Ok(plaintext) => plaintext,
            Err(_) => {
                self.metrics.decrypt_failures_total.add(1, &[]);
                tracing::warn!(message_id = %message_id, "Stored body no longer decrypts");
                DECRYPT_PLACEHOLDER.to_string()
            }
        }
    }

    /// Pages a user's conversations with per-conversation unread counts.
    /// Counts are best-effort: if the aggregate fails they read as zero
    /// rather than failing the listing.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn conversations(
        &self,
        user_id: Uuid,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> Result<ConversationPage> {
        let (limit, offset, page, page_size) = page_window(page, page_size);
        let (rows, total) = self.directory.list_for_user(user_id, limit, offset).await?;

        let ids: Vec<Uuid> = rows.iter().map(|c| c.id).collect();
        let counts = match self.messages.unread_counts(user_id, &ids).await {
            Ok(counts) => counts,
            Err(e) => {
                tracing::warn!(error = %e, "Unread counts unavailable, defaulting to zero");
                HashMap::new()
            }
        };

        let conversations = rows
            .iter()
            .map(|c| ConversationDto::for_viewer(c, user_id, counts.get(&c.id).copied().unwrap_or(0)))
            .collect();
        Ok(ConversationPage { conversations, total, page, page_size })
    }

    /// Marks messages read and tells each affected sender once, with the
    /// ids that actually transitioned. Re-reading already-read messages
    /// produces no notifications.
    #[tracing::instrument(err(level = "warn"), skip(self, message_ids), fields(count = message_ids.len()))]
    pub async fn mark_read(&self, reader_id: Uuid, message_ids: &[Uuid]) -> Result<u64> {
        if message_ids.is_empty() {
            return Ok(0);
        }

        let transitioned = self.messages.mark_read(message_ids).await?;
        let count = transitioned.len() as u64;

        let mut by_sender: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for delivery in transitioned {
            by_sender.entry(delivery.sender_id).or_default().push(delivery.id);
        }
        for (sender_id, ids) in by_sender {
            self.fanout
                .push_to_user(sender_id, ServerEvent::MessagesRead { reader_id, message_ids: ids })
                .await;
        }
        Ok(count)
    }

    /// Marks a message delivered and notifies the sender, once. A missing
    /// or unknown id is a silent no-op so late or duplicate receipts from
    /// reconnecting clients stay harmless.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn mark_delivered(&self, message_id: Option<Uuid>) -> Result<()> {
        let Some(id) = message_id else {
            return Ok(());
        };
        let Some(delivery) = self.messages.mark_delivered(id).await? else {
            return Ok(());
        };

        let delivered_at = delivery
            .delivered_at
            .map_or_else(|| OffsetDateTime::now_utc().unix_timestamp(), OffsetDateTime::unix_timestamp);
        self.fanout
            .push_to_user(
                delivery.sender_id,
                ServerEvent::MessageDelivered {
                    message_id: delivery.id,
                    conversation_id: delivery.conversation_id,
                    delivered_at,
                },
            )
            .await;
        Ok(())
    }

    /// # Errors
    /// Returns `AppError::Unauthorized` unless `user_id` sent the message.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn delete_message(&self, user_id: Uuid, message_id: Uuid) -> Result<()> {
        self.messages.soft_delete(message_id, user_id).await
    }

    /// # Errors
    /// Returns `AppError::Unauthorized` if `user_id` is not a participant.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn block(&self, user_id: Uuid, conversation_id: Uuid) -> Result<()> {
        self.directory.block(conversation_id, user_id).await
    }

    /// # Errors
    /// Returns `AppError::Unauthorized` if `user_id` is not a participant.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn unblock(&self, user_id: Uuid, conversation_id: Uuid) -> Result<()> {
        self.directory.unblock(conversation_id, user_id).await
    }

    /// Unread total for a user, optionally scoped to one conversation.
    /// Best-effort by contract: a failed count reads as zero.
    #[tracing::instrument(skip(self))]
    pub async fn unread_count(&self, user_id: Uuid, conversation_id: Option<Uuid>) -> i64 {
        match self.messages.unread_count(user_id, conversation_id).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, "Unread count unavailable, reporting zero");
                0
            }
        }
    }

    /// Everyone `user_id` shares a conversation with. Sessions use this to
    /// register presence interest at join time.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn partner_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.directory.partner_ids(user_id).await
    }
}

fn assemble(delivery: Delivery, text: Option<String>, media: Option<MediaRef>) -> Message {
    Message {
        id: delivery.id,
        conversation_id: delivery.conversation_id,
        sender_id: delivery.sender_id,
        receiver_id: delivery.receiver_id,
        kind: delivery.kind,
        text,
        media,
        reply_to: delivery.reply_to,
        is_delivered: delivery.is_delivered,
        delivered_at: delivery.delivered_at,
        is_read: delivery.is_read,
        read_at: delivery.read_at,
        created_at: delivery.created_at,
    }
}
