use crate::adapters::storage::ObjectStorage;
use crate::config::S3Config;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;

#[derive(Clone, Debug)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    region: String,
    endpoint: Option<String>,
    public_url_base: Option<String>,
}

impl S3Storage {
    #[must_use]
    pub fn new(client: Client, config: &S3Config) -> Self {
        Self {
            client,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
            public_url_base: config.public_url_base.clone(),
        }
    }

    fn public_url(&self, key: &str) -> String {
        if let Some(base) = &self.public_url_base {
            format!("{}/{key}", base.trim_end_matches('/'))
        } else if let Some(endpoint) = &self.endpoint {
            format!("{}/{}/{key}", endpoint.trim_end_matches('/'), self.bucket)
        } else {
            format!("https://{}.s3.{}.amazonaws.com/{key}", self.bucket, self.region)
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    #[tracing::instrument(level = "debug", skip(self, bytes), fields(size = bytes.len()))]
    async fn put(&self, key: &str, content_type: &str, bytes: Bytes) -> Result<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, key = %key, "S3 upload failed");
                AppError::Storage("Upload failed".to_string())
            })?;

        Ok(self.public_url(key))
    }

    async fn check(&self) -> Result<()> {
        self.client.head_bucket().bucket(&self.bucket).send().await.map_err(|e| {
            tracing::error!(error = ?e, "S3 health check failed");
            AppError::Storage("Bucket unreachable".to_string())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::Region;

    fn storage(config: &S3Config) -> S3Storage {
        let sdk_config = aws_sdk_s3::Config::builder()
            .region(Region::new(config.region.clone()))
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .build();
        S3Storage::new(Client::from_conf(sdk_config), config)
    }

    fn base_config() -> S3Config {
        S3Config {
            bucket: "media".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            force_path_style: false,
            public_url_base: None,
            attachment_max_size_bytes: 1024,
        }
    }

    #[test]
    fn test_public_url_prefers_configured_base() {
        let mut config = base_config();
        config.public_url_base = Some("https://cdn.example.com/".to_string());

        assert_eq!(storage(&config).public_url("a/b.jpg"), "https://cdn.example.com/a/b.jpg");
    }

    #[test]
    fn test_public_url_falls_back_to_endpoint() {
        let mut config = base_config();
        config.endpoint = Some("http://localhost:9000".to_string());

        assert_eq!(storage(&config).public_url("a.jpg"), "http://localhost:9000/media/a.jpg");
    }

    #[test]
    fn test_public_url_defaults_to_s3_form() {
        let config = base_config();

        assert_eq!(storage(&config).public_url("a.jpg"), "https://media.s3.us-east-1.amazonaws.com/a.jpg");
    }
}
