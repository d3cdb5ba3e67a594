use crate::services::attachment_service::StoredMedia;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentResponse {
    pub url: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub filename: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl From<StoredMedia> for AttachmentResponse {
    fn from(stored: StoredMedia) -> Self {
        Self {
            url: stored.url,
            mime_type: stored.mime_type,
            size_bytes: stored.size_bytes,
            filename: stored.filename,
            width: stored.width,
            height: stored.height,
        }
    }
}
