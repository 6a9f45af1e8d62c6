use crate::config::S3Config;
use crate::upload::BlobStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, info, instrument};

/// S3-compatible object store holding the uploaded media blobs
pub struct ObjectStore {
    client: S3Client,
    bucket: String,
    public_base_url: String,
    multipart_threshold_bytes: usize,
    part_size_bytes: usize,
}

impl ObjectStore {
    /// Create a new object store client
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let s3_config = s3_config_builder.build();
        let client = S3Client::from_conf(s3_config);

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "Object store client initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            multipart_threshold_bytes: config.multipart_threshold_bytes,
            part_size_bytes: config.part_size_bytes,
        })
    }

    /// Write a blob under the given storage key
    #[instrument(skip(self, bytes), fields(key = %key, size_bytes = bytes.len()))]
    pub async fn put_object(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        if bytes.len() > self.multipart_threshold_bytes {
            self.multipart_upload(key, bytes, content_type).await?;
        } else {
            self.simple_upload(key, bytes, content_type).await?;
        }

        debug!(key = %key, size_bytes = bytes.len(), "Blob stored");
        metrics::counter!("gallery.bytes.uploaded").increment(bytes.len() as u64);

        Ok(())
    }

    /// Simple single-part upload for small files
    async fn simple_upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let body = ByteStream::from(bytes.to_vec());

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .context("Failed to upload blob")?;

        Ok(())
    }

    /// Multipart upload for large files (videos mostly)
    async fn multipart_upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .context("Failed to create multipart upload")?;

        let upload_id = create_response
            .upload_id()
            .context("No upload ID in response")?;

        let mut completed_parts = Vec::new();
        let mut part_number = 1;

        for chunk in bytes.chunks(self.part_size_bytes) {
            let body = ByteStream::from(chunk.to_vec());

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(body)
                .send()
                .await
                .context("Failed to upload part")?;

            let completed_part = aws_sdk_s3::types::CompletedPart::builder()
                .part_number(part_number)
                .e_tag(upload_part_response.e_tag().unwrap_or_default())
                .build();

            completed_parts.push(completed_part);
            part_number += 1;
        }

        let completed_upload = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .context("Failed to complete multipart upload")?;

        Ok(())
    }

    /// Fetch a blob's bytes; used only by the download action
    #[instrument(skip(self), fields(key = %key))]
    pub async fn fetch_object(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("Failed to fetch blob")?;

        let bytes = response
            .body
            .collect()
            .await
            .context("Failed to read blob body")?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }

    /// Publicly resolvable read URL for a stored blob, no authentication
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}

#[async_trait]
impl BlobStore for ObjectStore {
    async fn put_blob(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        self.put_object(key, bytes, content_type).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store(public_base_url: &str) -> ObjectStore {
        let config = S3Config {
            bucket: "event-media".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            force_path_style: false,
            public_base_url: public_base_url.to_string(),
            multipart_threshold_bytes: 5 * 1024 * 1024,
            part_size_bytes: 5 * 1024 * 1024,
        };

        ObjectStore::new(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_public_url_concatenates_base_and_key() {
        let store = test_store("https://cdn.example.com/event-media").await;
        assert_eq!(
            store.public_url("abc123.jpg"),
            "https://cdn.example.com/event-media/abc123.jpg"
        );
    }

    #[tokio::test]
    async fn test_public_url_tolerates_trailing_slash() {
        let store = test_store("https://cdn.example.com/event-media/").await;
        assert_eq!(
            store.public_url("abc123.jpg"),
            "https://cdn.example.com/event-media/abc123.jpg"
        );
    }
}
