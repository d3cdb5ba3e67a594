use crate::api::AppState;
use crate::api::middleware::AuthUser;
use crate::api::schemas::chat::{
    MarkReadRequest, OkResponse, PageParams, SendMessageRequest, UnreadResponse,
};
use crate::error::Result;
use crate::protocol::MessageDto;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

/// Sends a direct message over the request/response surface. Realtime
/// clients use the gateway command instead; both paths share the service.
///
/// # Errors
/// Returns `AppError::Validation` for malformed content,
/// `AppError::ConversationBlocked` if the pair is blocked.
pub async fn send_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> Result<impl IntoResponse> {
    let message = state.chat_service.send(auth_user.user_id, request.into()).await?;

    Ok((StatusCode::CREATED, Json(MessageDto::from(message))))
}

/// Lists the caller's conversations, most recently active first.
pub async fn list_conversations(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse> {
    let page = state.chat_service.conversations(auth_user.user_id, params.page, params.page_size).await?;

    Ok(Json(page))
}

/// Pages a conversation's message history.
///
/// # Errors
/// Returns `AppError::Unauthorized` if the caller is not a participant.
pub async fn conversation_messages(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse> {
    let page = state
        .chat_service
        .history(auth_user.user_id, conversation_id, params.page, params.page_size)
        .await?;

    Ok(Json(page))
}

/// Marks a batch of received messages read.
pub async fn mark_read(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Json(request): Json<MarkReadRequest>,
) -> Result<impl IntoResponse> {
    state.chat_service.mark_read(auth_user.user_id, &request.message_ids).await?;

    Ok(Json(OkResponse::new()))
}

/// Blocks the conversation for both participants.
pub async fn block_conversation(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.chat_service.block(auth_user.user_id, conversation_id).await?;

    Ok(Json(OkResponse::new()))
}

/// Lifts a block; either participant may unblock.
pub async fn unblock_conversation(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.chat_service.unblock(auth_user.user_id, conversation_id).await?;

    Ok(Json(OkResponse::new()))
}

/// Soft-deletes a message the caller sent.
///
/// # Errors
/// Returns `AppError::Unauthorized` if the caller is not the sender.
pub async fn delete_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.chat_service.delete_message(auth_user.user_id, message_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Unread count scoped to one conversation.
pub async fn unread_count(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let count = state.chat_service.unread_count(auth_user.user_id, Some(conversation_id)).await;

    Ok(Json(UnreadResponse { unread_count: count }))
}
