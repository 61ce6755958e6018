//! Object storage for finished artifacts.
//!
//! Objects are keyed `{job_id}/{filename}` and handed back as presigned GET
//! URLs, so callers never need bucket credentials.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use genrelay_core::config::BucketConfig;

use crate::error::StorageError;

/// Destination for materialized artifacts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `path` under the job's prefix and return a URL
    /// the caller can fetch it from.
    async fn upload_file(
        &self,
        job_id: &str,
        path: &Path,
        filename: &str,
    ) -> Result<String, StorageError>;
}

/// Object key for an artifact.
pub fn object_key(job_id: &str, filename: &str) -> String {
    format!("{job_id}/{filename}")
}

/// MIME type sent with the upload, by dotted lowercase extension.
pub fn content_type_for(extension: &str) -> &'static str {
    match extension {
        ".png" => "image/png",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".gif" => "image/gif",
        ".webp" => "image/webp",
        ".mp4" => "video/mp4",
        ".webm" => "video/webm",
        ".mov" => "video/quicktime",
        ".mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

/// S3-compatible bucket client.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    url_expiry: Duration,
}

impl S3Store {
    pub fn new(config: &BucketConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "bucket-env",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name.clone(),
            url_expiry: config.url_expiry,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Generate a presigned GET URL for `key`.
    async fn presign_get(&self, key: &str) -> Result<String, StorageError> {
        let presign_config = PresigningConfig::expires_in(self.url_expiry)
            .map_err(|e| StorageError::presign_failed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::presign_failed(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn upload_file(
        &self,
        job_id: &str,
        path: &Path,
        filename: &str,
    ) -> Result<String, StorageError> {
        let key = object_key(job_id, filename);
        let extension = genrelay_core::artifact::file_extension(filename);
        tracing::debug!(key = %key, path = %path.display(), "Uploading artifact");

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .content_type(content_type_for(&extension))
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        tracing::info!(key = %key, bucket = %self.bucket, "Uploaded artifact");
        self.presign_get(&key).await
    }
}
