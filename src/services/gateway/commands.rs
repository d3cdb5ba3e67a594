use crate::domain::message::OutgoingMessage;
use crate::error::{AppError, Result};
use crate::protocol::{ClientCommand, ClientFrame, MessageDto, ServerEvent};
use crate::services::chat_service::ChatService;
use crate::services::gateway::Metrics;
use crate::services::presence_service::PresenceService;
use opentelemetry::KeyValue;
use serde_json::json;
use uuid::Uuid;

/// Executes client commands on behalf of one authenticated session.
pub(crate) struct CommandContext {
    user_id: Uuid,
    chat: ChatService,
    presence: PresenceService,
    metrics: Metrics,
}

impl CommandContext {
    pub(crate) fn new(
        user_id: Uuid,
        chat: ChatService,
        presence: PresenceService,
        metrics: Metrics,
    ) -> Self {
        Self { user_id, chat, presence, metrics }
    }

    /// Parses and runs one text frame. Returns the ack to send back, or
    /// `None` for frames carrying no sequence number.
    pub(crate) async fn handle_text(&self, raw: &str) -> Option<ServerEvent> {
        let frame = match serde_json::from_str::<ClientFrame>(raw) {
            Ok(frame) => frame,
            Err(parse_error) => return self.reject_malformed(raw, &parse_error),
        };

        let name = frame.command.name();
        match self.execute(frame.command).await {
            Ok(data) => {
                self.metrics.commands_total.add(
                    1,
                    &[KeyValue::new("command", name), KeyValue::new("status", "ok")],
                );
                frame.seq.map(|seq| ServerEvent::ack_ok(seq, data))
            }
            Err(e) => {
                self.metrics.commands_total.add(
                    1,
                    &[KeyValue::new("command", name), KeyValue::new("status", "error")],
                );
                tracing::debug!(command = name, error = %e, "Command failed");
                frame.seq.map(|seq| ServerEvent::ack_err(seq, e.client_message()))
            }
        }
    }

    /// A frame that fails typed parsing may still carry a usable `seq`;
    /// recover it so the client learns its command went nowhere instead of
    /// waiting on an ack forever.
    fn reject_malformed(&self, raw: &str, parse_error: &serde_json::Error) -> Option<ServerEvent> {
        self.metrics.commands_total.add(
            1,
            &[KeyValue::new("command", "malformed"), KeyValue::new("status", "rejected")],
        );

        let seq = serde_json::from_str::<serde_json::Value>(raw)
            .ok()
            .and_then(|value| value.get("seq")?.as_u64());
        match seq {
            Some(seq) => {
                tracing::debug!(error = %parse_error, "Rejecting malformed command");
                Some(ServerEvent::ack_err(seq, "Malformed command".to_string()))
            }
            None => {
                tracing::debug!(error = %parse_error, "Ignoring malformed frame without seq");
                None
            }
        }
    }

    async fn execute(&self, command: ClientCommand) -> Result<Option<serde_json::Value>> {
        match command {
            ClientCommand::SendMessage { receiver_id, kind, text, media, reply_to } => {
                let outgoing = OutgoingMessage {
                    receiver_id,
                    kind,
                    text,
                    media: media.map(Into::into),
                    reply_to,
                };
                let message = self.chat.send(self.user_id, outgoing).await?;
                ack_payload(&MessageDto::from(message))
            }
            ClientCommand::MessageDelivered { message_id } => {
                self.chat.mark_delivered(message_id).await?;
                Ok(None)
            }
            ClientCommand::MessagesRead { message_ids } => {
                let updated = self.chat.mark_read(self.user_id, &message_ids).await?;
                Ok(Some(json!({ "updated": updated })))
            }
            ClientCommand::FetchMessages { conversation_id, page, page_size } => {
                let messages =
                    self.chat.history(self.user_id, conversation_id, page, page_size).await?;
                ack_payload(&messages)
            }
            ClientCommand::FetchConversations { page, page_size } => {
                let conversations = self.chat.conversations(self.user_id, page, page_size).await?;
                ack_payload(&conversations)
            }
            ClientCommand::DeleteMessage { message_id } => {
                self.chat.delete_message(self.user_id, message_id).await?;
                Ok(None)
            }
            ClientCommand::GetUnreadCount { conversation_id } => {
                let count = self.chat.unread_count(self.user_id, conversation_id).await;
                Ok(Some(json!({ "unreadCount": count })))
            }
            ClientCommand::TypingStart { conversation_id, receiver_id } => {
                self.presence.typing_start(conversation_id, self.user_id, receiver_id).await?;
                Ok(None)
            }
            ClientCommand::TypingStop { conversation_id, receiver_id } => {
                self.presence.typing_stop(conversation_id, self.user_id, receiver_id).await?;
                Ok(None)
            }
            ClientCommand::CheckTyping { conversation_id, user_id } => {
                let typing = self.presence.is_typing(conversation_id, user_id).await?;
                Ok(Some(json!({ "typing": typing })))
            }
            ClientCommand::GetUserStatus { user_id } => {
                let status = self.presence.status_of(user_id).await?;
                ack_payload(&status)
            }
            ClientCommand::GetUsersStatus { user_ids } => {
                let statuses = self.presence.statuses(&user_ids).await?;
                Ok(Some(json!({ "statuses": statuses })))
            }
            ClientCommand::RefreshStatus => {
                self.presence.heartbeat(self.user_id).await?;
                Ok(None)
            }
        }
    }
}

fn ack_payload<T: serde::Serialize>(value: &T) -> Result<Option<serde_json::Value>> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| AppError::Internal(format!("Failed to encode ack payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        MemoryConversationStore, MemoryDeliveryStore, MemoryPayloadStore, MemoryPresenceStore,
        MemoryTypingStore,
    };
    use crate::domain::codec::MessageCodec;
    use crate::services::directory::ConversationDirectory;
    use crate::services::fanout::EventFanout;
    use crate::services::fanout::testing::RecordingFanout;
    use crate::services::message_store::MessageStore;
    use crate::stores::{ConversationStore, DeliveryStore, PayloadStore, PresenceStore, TypingStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn context(user_id: Uuid) -> (CommandContext, Arc<RecordingFanout>) {
        let fanout = Arc::new(RecordingFanout::default());
        let directory = ConversationDirectory::new(
            Arc::new(MemoryConversationStore::new()) as Arc<dyn ConversationStore>
        );
        let messages = MessageStore::new(
            Arc::new(MemoryPayloadStore::new()) as Arc<dyn PayloadStore>,
            Arc::new(MemoryDeliveryStore::new()) as Arc<dyn DeliveryStore>,
        );
        let chat = ChatService::new(
            directory,
            messages,
            MessageCodec::from_hex(&"cd".repeat(32)).unwrap(),
            Arc::clone(&fanout) as Arc<dyn EventFanout>,
        );
        let presence = PresenceService::new(
            Arc::new(MemoryPresenceStore::new()) as Arc<dyn PresenceStore>,
            Arc::new(MemoryTypingStore::new()) as Arc<dyn TypingStore>,
            Arc::clone(&fanout) as Arc<dyn EventFanout>,
            Duration::from_secs(300),
            Duration::from_secs(5),
        );
        (CommandContext::new(user_id, chat, presence, Metrics::new()), fanout)
    }

    fn ack_parts(event: Option<ServerEvent>) -> (u64, bool, Option<serde_json::Value>, Option<String>) {
        match event {
            Some(ServerEvent::Ack { seq, ok, data, error }) => (seq, ok, data, error),
            other => panic!("expected an ack, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_message_command_acks_with_message() {
        let user = Uuid::new_v4();
        let (context, _fanout) = context(user);
        let receiver = Uuid::new_v4();
        let raw = json!({
            "seq": 1,
            "type": "send_message",
            "receiverId": receiver,
            "kind": "text",
            "text": "hello there"
        })
        .to_string();

        let (seq, ok, data, error) = ack_parts(context.handle_text(&raw).await);

        assert_eq!(seq, 1);
        assert!(ok);
        assert_eq!(error, None);
        let data = data.unwrap();
        assert_eq!(data["text"], "hello there");
        assert_eq!(data["receiverId"], receiver.to_string());
    }

    #[tokio::test]
    async fn test_failed_command_acks_with_error() {
        let user = Uuid::new_v4();
        let (context, _fanout) = context(user);
        let raw = json!({
            "seq": 2,
            "type": "send_message",
            "receiverId": user,
            "kind": "text",
            "text": "talking to myself"
        })
        .to_string();

        let (seq, ok, data, error) = ack_parts(context.handle_text(&raw).await);

        assert_eq!(seq, 2);
        assert!(!ok);
        assert_eq!(data, None);
        assert_eq!(error.as_deref(), Some("Cannot start a conversation with yourself"));
    }

    #[tokio::test]
    async fn test_malformed_frame_with_seq_gets_failure_ack() {
        let (context, _fanout) = context(Uuid::new_v4());

        let unknown_type = json!({ "seq": 3, "type": "warp_drive" }).to_string();
        let (seq, ok, _, error) = ack_parts(context.handle_text(&unknown_type).await);
        assert_eq!(seq, 3);
        assert!(!ok);
        assert_eq!(error.as_deref(), Some("Malformed command"));

        let missing_field = json!({ "seq": 4, "type": "delete_message" }).to_string();
        let (seq, ok, _, _) = ack_parts(context.handle_text(&missing_field).await);
        assert_eq!(seq, 4);
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_malformed_frame_without_seq_is_dropped() {
        let (context, _fanout) = context(Uuid::new_v4());

        assert_eq!(context.handle_text("not json at all").await, None);
        assert_eq!(context.handle_text(r#"{"type": "warp_drive"}"#).await, None);
    }

    #[tokio::test]
    async fn test_command_without_seq_runs_but_stays_silent() {
        let user = Uuid::new_v4();
        let (context, fanout) = context(user);
        let receiver = Uuid::new_v4();
        let raw = json!({
            "type": "send_message",
            "receiverId": receiver,
            "kind": "text",
            "text": "fire and forget"
        })
        .to_string();

        let ack = context.handle_text(&raw).await;

        assert_eq!(ack, None);
        assert_eq!(fanout.user_events_for(receiver).len(), 1, "command still executed");
    }

    #[tokio::test]
    async fn test_message_delivered_without_id_is_acked_ok() {
        let (context, _fanout) = context(Uuid::new_v4());
        let raw = json!({ "seq": 5, "type": "message_delivered" }).to_string();

        let (seq, ok, _, error) = ack_parts(context.handle_text(&raw).await);

        assert_eq!(seq, 5);
        assert!(ok);
        assert_eq!(error, None);
    }

    #[tokio::test]
    async fn test_typing_and_status_commands_round_trip() {
        let user = Uuid::new_v4();
        let (context, _fanout) = context(user);
        let conversation = Uuid::new_v4();
        let receiver = Uuid::new_v4();

        let start = json!({
            "seq": 6,
            "type": "typing_start",
            "conversationId": conversation,
            "receiverId": receiver
        })
        .to_string();
        let (_, ok, _, _) = ack_parts(context.handle_text(&start).await);
        assert!(ok);

        let check = json!({
            "seq": 7,
            "type": "check_typing",
            "conversationId": conversation,
            "userId": user
        })
        .to_string();
        let (_, ok, data, _) = ack_parts(context.handle_text(&check).await);
        assert!(ok);
        assert_eq!(data.unwrap()["typing"], true);

        let status = json!({ "seq": 8, "type": "get_user_status", "userId": user }).to_string();
        let (_, ok, data, _) = ack_parts(context.handle_text(&status).await);
        assert!(ok);
        assert_eq!(data.unwrap()["online"], false);
    }

    #[tokio::test]
    async fn test_unread_count_command_reports_camel_case_payload() {
        let user = Uuid::new_v4();
        let (context, _fanout) = context(user);
        let raw = json!({ "seq": 9, "type": "get_unread_count" }).to_string();

        let (_, ok, data, _) = ack_parts(context.handle_text(&raw).await);

        assert!(ok);
        assert_eq!(data.unwrap()["unreadCount"], 0);
    }
}
