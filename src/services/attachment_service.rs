use crate::adapters::storage::ObjectStorage;
use crate::domain::message::MessageKind;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
};
use std::sync::Arc;
use uuid::Uuid;

const MAX_FILENAME_CHARS: usize = 64;

#[derive(Clone, Debug)]
pub(crate) struct Metrics {
    pub(crate) uploaded_bytes: Counter<u64>,
    pub(crate) upload_size_bytes: Histogram<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("parley-server");
        Self {
            uploaded_bytes: meter
                .u64_counter("attachments_uploaded_bytes")
                .with_description("Total bytes of attachments uploaded")
                .build(),
            upload_size_bytes: meter
                .u64_histogram("attachments_upload_size_bytes")
                .with_description("Distribution of attachment upload sizes")
                .build(),
        }
    }
}

/// Raw upload as received from the multipart endpoint.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub filename: String,
    pub content_type: String,
    pub kind: MessageKind,
    pub bytes: Bytes,
}

/// What the processing seam hands back: possibly transformed bytes plus
/// dimensions when the processor could determine them.
#[derive(Debug, Clone)]
pub struct ProcessedMedia {
    pub bytes: Bytes,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Media stored and addressable; everything the client needs to reference
/// the upload in a subsequent send.
#[derive(Debug, Clone)]
pub struct StoredMedia {
    pub url: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub filename: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Validation/compression seam for uploaded media. A transcoder can slot
/// in behind this trait without touching the upload flow.
#[async_trait]
pub trait MediaProcessor: Send + Sync + std::fmt::Debug {
    async fn process(&self, upload: &MediaUpload) -> Result<ProcessedMedia>;
}

/// Default processor: enforces size and content-type rules, passes bytes
/// through untouched, and reports no dimensions.
#[derive(Debug, Clone)]
pub struct PassthroughProcessor {
    max_size_bytes: usize,
}

impl PassthroughProcessor {
    #[must_use]
    pub const fn new(max_size_bytes: usize) -> Self {
        Self { max_size_bytes }
    }
}

#[async_trait]
impl MediaProcessor for PassthroughProcessor {
    async fn process(&self, upload: &MediaUpload) -> Result<ProcessedMedia> {
        if upload.bytes.is_empty() {
            return Err(AppError::Validation("Attachment is empty".to_string()));
        }
        if upload.bytes.len() > self.max_size_bytes {
            return Err(AppError::Validation(format!(
                "Attachment exceeds {} bytes",
                self.max_size_bytes
            )));
        }
        if !kind_accepts(upload.kind, &upload.content_type) {
            return Err(AppError::Validation(format!(
                "Content type {} is not valid for {} uploads",
                upload.content_type,
                upload.kind.as_str()
            )));
        }

        Ok(ProcessedMedia { bytes: upload.bytes.clone(), width: None, height: None })
    }
}

fn kind_accepts(kind: MessageKind, content_type: &str) -> bool {
    match kind {
        // Text bodies travel in the message itself, never as attachments.
        MessageKind::Text => false,
        MessageKind::Image => content_type.starts_with("image/"),
        MessageKind::Video => content_type.starts_with("video/"),
        MessageKind::File => !content_type.is_empty(),
    }
}

#[derive(Clone, Debug)]
pub struct AttachmentService {
    storage: Arc<dyn ObjectStorage>,
    processor: Arc<dyn MediaProcessor>,
    metrics: Metrics,
}

impl AttachmentService {
    #[must_use]
    pub fn new(storage: Arc<dyn ObjectStorage>, processor: Arc<dyn MediaProcessor>) -> Self {
        Self { storage, processor, metrics: Metrics::new() }
    }

    /// Validates an upload, stores it, and returns the stored reference.
    ///
    /// # Errors
    /// Returns `AppError::Validation` if the upload fails processing rules,
    /// or `AppError::Storage` if the object store rejects the write.
    #[tracing::instrument(
        err(level = "warn"),
        skip(self, upload),
        fields(media_kind = upload.kind.as_str(), attachment_size = upload.bytes.len())
    )]
    pub async fn upload(
        &self,
        owner_id: Uuid,
        conversation_id: Uuid,
        upload: MediaUpload,
    ) -> Result<StoredMedia> {
        let processed = self.processor.process(&upload).await?;

        let size_bytes = processed.bytes.len();
        let key = object_key(conversation_id, owner_id, &upload.filename);
        let url = self.storage.put(&key, &upload.content_type, processed.bytes).await?;

        self.metrics.uploaded_bytes.add(size_bytes as u64, &[]);
        self.metrics.upload_size_bytes.record(size_bytes as u64, &[]);
        tracing::debug!(key = %key, "Attachment uploaded");

        Ok(StoredMedia {
            url,
            mime_type: upload.content_type,
            size_bytes: size_bytes as i64,
            filename: upload.filename,
            width: processed.width,
            height: processed.height,
        })
    }
}

/// Object keys are scoped by conversation and uploader, with a fresh UUID
/// so repeated filenames never collide.
fn object_key(conversation_id: Uuid, owner_id: Uuid, filename: &str) -> String {
    format!("{conversation_id}/{owner_id}/{}-{}", Uuid::new_v4(), sanitize_filename(filename))
}

/// Keeps a safe subset of the client's filename: ASCII alphanumerics plus
/// `.`, `-`, `_`, with dot runs collapsed so `..` can never appear in a key.
fn sanitize_filename(filename: &str) -> String {
    let mut cleaned = String::new();
    for c in filename.chars() {
        if !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')) {
            continue;
        }
        if c == '.' && (cleaned.is_empty() || cleaned.ends_with('.')) {
            continue;
        }
        cleaned.push(c);
        if cleaned.len() == MAX_FILENAME_CHARS {
            break;
        }
    }

    if cleaned.is_empty() { "upload".to_string() } else { cleaned }
}
