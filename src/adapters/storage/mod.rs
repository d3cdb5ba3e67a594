use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

pub mod s3;

pub use s3::S3Storage;

/// Object storage collaborator: bytes in, public URL out.
#[async_trait]
pub trait ObjectStorage: Send + Sync + std::fmt::Debug + 'static {
    /// Uploads an object and returns the URL clients use to fetch it.
    async fn put(&self, key: &str, content_type: &str, bytes: Bytes) -> Result<String>;

    /// Cheap connectivity probe for readiness checks.
    async fn check(&self) -> Result<()>;
}
