use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),
    #[error("Object storage error: {0}")]
    Storage(String),
    #[error("Authentication failed")]
    AuthError,
    #[error("Not found")]
    NotFound,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Conversation is blocked")]
    ConversationBlocked,
    #[error("Message content is empty")]
    EmptyContent,
    #[error("Message content exceeds {limit} characters")]
    TooLong { limit: usize },
    #[error("Message could not be decrypted")]
    DecryptionFailed,
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// The wording shared by HTTP error bodies and gateway failure acks, so
    /// both surfaces describe the same failure the same way.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::Database(_) | Self::Cache(_) | Self::Storage(_) | Self::Internal(_) => {
                "Internal server error".to_string()
            }
            Self::AuthError | Self::Unauthorized => "Unauthorized".to_string(),
            Self::NotFound => "Not found".to_string(),
            Self::ConversationBlocked => "Conversation is blocked".to_string(),
            Self::EmptyContent => "Message content is empty".to_string(),
            Self::TooLong { limit } => format!("Message content exceeds {limit} characters"),
            Self::DecryptionFailed => "Message could not be decrypted".to_string(),
            Self::Validation(msg) | Self::Conflict(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Cache(e) => {
                tracing::error!(error = %e, "Cache error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Storage(msg) => {
                tracing::error!(message = %msg, "Object storage error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::AuthError => {
                tracing::debug!("Authentication failed");
                StatusCode::UNAUTHORIZED
            }
            AppError::Unauthorized => {
                tracing::debug!("Unauthorized");
                StatusCode::FORBIDDEN
            }
            AppError::NotFound => {
                tracing::debug!("Resource not found");
                StatusCode::NOT_FOUND
            }
            AppError::ConversationBlocked => {
                tracing::debug!("Send rejected, conversation blocked");
                StatusCode::FORBIDDEN
            }
            AppError::EmptyContent | AppError::TooLong { .. } => {
                tracing::debug!("Content validation failed");
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::DecryptionFailed => {
                tracing::warn!("Decryption failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Validation(msg) => {
                tracing::debug!(message = %msg, "Bad request");
                StatusCode::BAD_REQUEST
            }
            AppError::Conflict(msg) => {
                tracing::debug!(message = %msg, "Conflict");
                StatusCode::CONFLICT
            }
            AppError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.client_message()
        }));

        (status, body).into_response()
    }
}
