use crate::api::AppState;
use crate::api::middleware::AuthUser;
use crate::api::schemas::attachments::AttachmentResponse;
use crate::domain::message::MessageKind;
use crate::error::{AppError, Result};
use crate::services::attachment_service::MediaUpload;
use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
};
use bytes::Bytes;
use uuid::Uuid;

/// Accepts a multipart upload (`conversationId`, `kind`, `file`) and stores
/// the media for a subsequent send.
///
/// # Errors
/// Returns `AppError::Validation` for missing fields or media that fails
/// processing rules.
pub async fn upload_attachment(
    auth_user: AuthUser,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let mut conversation_id: Option<Uuid> = None;
    let mut kind: Option<MessageKind> = None;
    let mut file: Option<(String, String, Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "conversationId" => {
                let value = read_text(field).await?;
                conversation_id = Some(
                    Uuid::parse_str(&value)
                        .map_err(|_| AppError::Validation("conversationId is not a UUID".to_string()))?,
                );
            }
            "kind" => {
                let value = read_text(field).await?;
                kind = Some(
                    MessageKind::parse(&value)
                        .ok_or_else(|| AppError::Validation(format!("Unknown media kind: {value}")))?,
                );
            }
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type =
                    field.content_type().unwrap_or("application/octet-stream").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read upload: {e}")))?;
                file = Some((filename, content_type, bytes));
            }
            _ => {}
        }
    }

    let conversation_id =
        conversation_id.ok_or_else(|| AppError::Validation("Missing conversationId field".to_string()))?;
    let kind = kind.ok_or_else(|| AppError::Validation("Missing kind field".to_string()))?;
    let (filename, content_type, bytes) =
        file.ok_or_else(|| AppError::Validation("Missing file field".to_string()))?;

    let stored = state
        .attachment_service
        .upload(auth_user.user_id, conversation_id, MediaUpload { filename, content_type, kind, bytes })
        .await?;

    Ok((StatusCode::CREATED, Json(AttachmentResponse::from(stored))))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String> {
    field.text().await.map_err(|e| AppError::Validation(format!("Unreadable multipart field: {e}")))
}
