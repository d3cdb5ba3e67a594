//! Wire shapes shared by the realtime gateway and the REST surface. Every
//! client command and server push is a closed tagged variant; unknown types
//! and missing required fields fail deserialization at the boundary instead
//! of reaching business logic.

use crate::domain::conversation::Conversation;
use crate::domain::message::{MediaRef, Message, MessageKind};
use crate::domain::presence::PresenceRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One inbound text frame: an optional client-chosen sequence number plus
/// the command itself. Commands carrying a `seq` are acknowledged exactly
/// once with an [`ServerEvent::Ack`] echoing it.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub seq: Option<u64>,
    #[serde(flatten)]
    pub command: ClientCommand,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    #[serde(rename_all = "camelCase")]
    SendMessage {
        receiver_id: Uuid,
        kind: MessageKind,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        media: Option<MediaDto>,
        #[serde(default)]
        reply_to: Option<Uuid>,
    },
    /// A missing id is tolerated and acked as a no-op.
    #[serde(rename_all = "camelCase")]
    MessageDelivered {
        #[serde(default)]
        message_id: Option<Uuid>,
    },
    #[serde(rename_all = "camelCase")]
    MessagesRead { message_ids: Vec<Uuid> },
    #[serde(rename_all = "camelCase")]
    FetchMessages {
        conversation_id: Uuid,
        #[serde(default)]
        page: Option<u32>,
        #[serde(default)]
        page_size: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    FetchConversations {
        #[serde(default)]
        page: Option<u32>,
        #[serde(default)]
        page_size: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    DeleteMessage { message_id: Uuid },
    #[serde(rename_all = "camelCase")]
    GetUnreadCount {
        #[serde(default)]
        conversation_id: Option<Uuid>,
    },
    #[serde(rename_all = "camelCase")]
    TypingStart { conversation_id: Uuid, receiver_id: Uuid },
    #[serde(rename_all = "camelCase")]
    TypingStop { conversation_id: Uuid, receiver_id: Uuid },
    #[serde(rename_all = "camelCase")]
    CheckTyping { conversation_id: Uuid, user_id: Uuid },
    #[serde(rename_all = "camelCase")]
    GetUserStatus { user_id: Uuid },
    #[serde(rename_all = "camelCase")]
    GetUsersStatus { user_ids: Vec<Uuid> },
    RefreshStatus,
}

impl ClientCommand {
    /// Tag used in logs and ack metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "send_message",
            Self::MessageDelivered { .. } => "message_delivered",
            Self::MessagesRead { .. } => "messages_read",
            Self::FetchMessages { .. } => "fetch_messages",
            Self::FetchConversations { .. } => "fetch_conversations",
            Self::DeleteMessage { .. } => "delete_message",
            Self::GetUnreadCount { .. } => "get_unread_count",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
            Self::CheckTyping { .. } => "check_typing",
            Self::GetUserStatus { .. } => "get_user_status",
            Self::GetUsersStatus { .. } => "get_users_status",
            Self::RefreshStatus => "refresh_status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Ack {
        seq: u64,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    NewMessage { message: MessageDto },
    #[serde(rename_all = "camelCase")]
    MessageDelivered {
        message_id: Uuid,
        conversation_id: Uuid,
        delivered_at: i64,
    },
    #[serde(rename_all = "camelCase")]
    MessagesRead { reader_id: Uuid, message_ids: Vec<Uuid> },
    #[serde(rename_all = "camelCase")]
    UserTyping { conversation_id: Uuid, user_id: Uuid },
    #[serde(rename_all = "camelCase")]
    UserStoppedTyping { conversation_id: Uuid, user_id: Uuid },
    #[serde(rename_all = "camelCase")]
    UserOnline { user_id: Uuid, last_seen: i64 },
    #[serde(rename_all = "camelCase")]
    UserOffline { user_id: Uuid, last_seen: i64 },
}

impl ServerEvent {
    #[must_use]
    pub fn ack_ok(seq: u64, data: Option<serde_json::Value>) -> Self {
        Self::Ack { seq, ok: true, data, error: None }
    }

    #[must_use]
    pub fn ack_err(seq: u64, error: String) -> Self {
        Self::Ack { seq, ok: false, data: None, error: Some(error) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDto {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl From<MediaRef> for MediaDto {
    fn from(media: MediaRef) -> Self {
        Self {
            url: media.url,
            mime_type: media.mime_type,
            size_bytes: media.size_bytes,
            filename: media.filename,
            thumbnail_url: media.thumbnail_url,
        }
    }
}

impl From<MediaDto> for MediaRef {
    fn from(dto: MediaDto) -> Self {
        Self {
            url: dto.url,
            mime_type: dto.mime_type,
            size_bytes: dto.size_bytes,
            filename: dto.filename,
            thumbnail_url: dto.thumbnail_url,
        }
    }
}

/// Decrypted message view as it crosses the wire. Timestamps are unix
/// seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Uuid>,
    pub is_delivered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<i64>,
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<i64>,
    pub created_at: i64,
}

impl From<Message> for MessageDto {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            kind: message.kind,
            text: message.text,
            media: message.media.map(Into::into),
            reply_to: message.reply_to,
            is_delivered: message.is_delivered,
            delivered_at: message.delivered_at.map(|t| t.unix_timestamp()),
            is_read: message.is_read,
            read_at: message.read_at.map(|t| t.unix_timestamp()),
            created_at: message.created_at.unix_timestamp(),
        }
    }
}

/// A conversation as seen by one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDto {
    pub id: Uuid,
    pub partner_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<i64>,
    pub is_blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<Uuid>,
    pub unread_count: i64,
}

impl ConversationDto {
    #[must_use]
    pub fn for_viewer(conversation: &Conversation, viewer: Uuid, unread_count: i64) -> Self {
        Self {
            id: conversation.id,
            partner_id: conversation.partner_of(viewer),
            last_message_preview: conversation.last_message_preview.clone(),
            last_message_at: conversation.last_message_at.map(|t| t.unix_timestamp()),
            is_blocked: conversation.is_blocked,
            blocked_by: conversation.blocked_by,
            unread_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<MessageDto>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPage {
    pub conversations: Vec<ConversationDto>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusDto {
    pub user_id: Uuid,
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
}

impl UserStatusDto {
    /// A missing record reads as offline with no last-seen time.
    #[must_use]
    pub fn from_record(user_id: Uuid, record: Option<&PresenceRecord>) -> Self {
        record.map_or(
            Self { user_id, online: false, last_seen: None },
            |r| Self { user_id, online: r.online, last_seen: Some(r.last_seen) },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_frame_parses_tagged_command() {
        let raw = json!({
            "seq": 7,
            "type": "send_message",
            "receiverId": "0f8e8c50-44d4-4c2f-9f2b-7dc869ef1e5a",
            "kind": "text",
            "text": "hello"
        })
        .to_string();

        let frame: ClientFrame = serde_json::from_str(&raw).unwrap();
        assert_eq!(frame.seq, Some(7));
        assert!(matches!(
            frame.command,
            ClientCommand::SendMessage { text: Some(ref t), media: None, .. } if t == "hello"
        ));
    }

    #[test]
    fn test_unknown_command_type_is_rejected() {
        let raw = json!({ "seq": 1, "type": "launch_missiles" }).to_string();
        assert!(serde_json::from_str::<ClientFrame>(&raw).is_err());
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        // messages_read without its id array must not reach the handler.
        let raw = json!({ "seq": 2, "type": "messages_read" }).to_string();
        assert!(serde_json::from_str::<ClientFrame>(&raw).is_err());
    }

    #[test]
    fn test_message_delivered_tolerates_missing_id() {
        let raw = json!({ "seq": 3, "type": "message_delivered" }).to_string();
        let frame: ClientFrame = serde_json::from_str(&raw).unwrap();

        assert!(matches!(frame.command, ClientCommand::MessageDelivered { message_id: None }));
    }

    #[test]
    fn test_seq_is_optional() {
        let raw = json!({ "type": "refresh_status" }).to_string();
        let frame: ClientFrame = serde_json::from_str(&raw).unwrap();

        assert_eq!(frame.seq, None);
        assert!(matches!(frame.command, ClientCommand::RefreshStatus));
    }

    #[test]
    fn test_server_event_serializes_snake_case_tag() {
        let event = ServerEvent::UserOnline { user_id: Uuid::nil(), last_seen: 42 };
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "user_online");
        assert_eq!(value["userId"], Uuid::nil().to_string());
        assert_eq!(value["lastSeen"], 42);
    }

    #[test]
    fn test_ack_omits_empty_fields() {
        let value = serde_json::to_value(ServerEvent::ack_ok(5, None)).unwrap();

        assert_eq!(value["type"], "ack");
        assert_eq!(value["ok"], true);
        assert!(value.get("data").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_server_event_roundtrip() {
        let event = ServerEvent::MessagesRead {
            reader_id: Uuid::new_v4(),
            message_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
        };
        let raw = serde_json::to_string(&event).unwrap();

        assert_eq!(serde_json::from_str::<ServerEvent>(&raw).unwrap(), event);
    }
}
