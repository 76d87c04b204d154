// pgvault/src/storage/s3.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::primitives::ByteStream;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use super::{ArtifactStore, StoredArtifact};
use crate::config::S3StorageConfig;

/// Size of each ranged GET issued while downloading.
const DOWNLOAD_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// S3-compatible object storage (AWS, DigitalOcean Spaces, MinIO).
/// A folder is a key prefix inside the bucket and an artifact id is its key.
pub struct S3Store {
    client: s3::Client,
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
}

impl S3Store {
    pub async fn connect(config: &S3StorageConfig) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(s3::config::Credentials::new(
                key_id, secret, None, // session_token
                None, // expiry
                "Static",
            ));
        }
        let sdk_config = loader.load().await;

        // Custom endpoints are usually path-style only.
        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint_url.is_some())
            .build();

        tracing::debug!(bucket = %config.bucket_name, endpoint = ?config.endpoint_url, "S3 client configured");
        S3Store {
            client: s3::Client::from_conf(s3_config),
            bucket: config.bucket_name.clone(),
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
        }
    }

    async fn put(&self, local_path: &Path, key: &str) -> Result<()> {
        let body = ByteStream::from_path(local_path)
            .await
            .with_context(|| format!("Failed to create ByteStream from file: {}", local_path.display()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to upload file {} to S3 bucket {} with key {}",
                    local_path.display(),
                    self.bucket,
                    key
                )
            })?;
        tracing::debug!(bucket = %self.bucket, key, "upload finished");
        Ok(())
    }
}

fn folder_prefix(folder_id: &str) -> String {
    format!("{}/", folder_id.trim_end_matches('/'))
}

fn object_key(folder_id: &str, name: &str) -> String {
    format!("{}{}", folder_prefix(folder_id), name)
}

fn content_link(endpoint_url: Option<&str>, region: &str, bucket: &str, key: &str) -> String {
    match endpoint_url {
        Some(endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key),
        None => format!("https://{}.s3.{}.amazonaws.com/{}", bucket, region, key),
    }
}

#[async_trait]
impl ArtifactStore for S3Store {
    async fn list(&self, folder_id: &str) -> Result<Vec<StoredArtifact>> {
        let prefix = folder_prefix(folder_id);
        let mut artifacts = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .delimiter("/")
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .with_context(|| format!("Failed to list s3://{}/{}", self.bucket, prefix))?;

            for object in response.contents() {
                let key = object
                    .key()
                    .with_context(|| format!("S3 listing of s3://{}/{} returned an object without a key", self.bucket, prefix))?;
                let name = key.strip_prefix(&prefix).unwrap_or(key);
                if name.is_empty() {
                    // Folder placeholder object.
                    continue;
                }
                artifacts.push(StoredArtifact {
                    id: key.to_string(),
                    name: name.to_string(),
                    size_bytes: object.size().and_then(|size| u64::try_from(size).ok()),
                    content_link: Some(content_link(self.endpoint_url.as_deref(), &self.region, &self.bucket, key)),
                });
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        tracing::debug!(folder = folder_id, count = artifacts.len(), "listed S3 folder");
        Ok(artifacts)
    }

    async fn create(&self, local_path: &Path, name: &str, folder_id: &str) -> Result<String> {
        let key = object_key(folder_id, name);
        self.put(local_path, &key).await?;
        Ok(key)
    }

    async fn update(&self, artifact_id: &str, local_path: &Path) -> Result<String> {
        self.put(local_path, artifact_id).await?;
        Ok(artifact_id.to_string())
    }

    async fn download(&self, artifact_id: &str, local_path: &Path) -> Result<u64> {
        if let Some(parent_dir) = local_path.parent() {
            if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
                tokio::fs::create_dir_all(parent_dir)
                    .await
                    .with_context(|| format!("Failed to create directory for download: {}", parent_dir.display()))?;
            }
        }

        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(artifact_id)
            .send()
            .await
            .with_context(|| format!("Failed to read metadata of s3://{}/{}", self.bucket, artifact_id))?;
        let total_bytes = head
            .content_length()
            .and_then(|length| u64::try_from(length).ok())
            .unwrap_or(0);

        let mut output_file = File::create(local_path)
            .await
            .with_context(|| format!("Failed to create destination file: {}", local_path.display()))?;

        let mut downloaded: u64 = 0;
        while downloaded < total_bytes {
            let range_end = (downloaded + DOWNLOAD_CHUNK_SIZE).min(total_bytes) - 1;
            let mut object = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(artifact_id)
                .range(format!("bytes={}-{}", downloaded, range_end))
                .send()
                .await
                .with_context(|| format!("Failed to get object s3://{}/{}", self.bucket, artifact_id))?;

            let chunk_start = downloaded;
            while let Some(bytes_chunk) = object
                .body
                .try_next()
                .await
                .with_context(|| format!("Failed to read body of s3://{}/{}", self.bucket, artifact_id))?
            {
                output_file
                    .write_all(&bytes_chunk)
                    .await
                    .with_context(|| format!("Failed to write to destination file: {}", local_path.display()))?;
                downloaded += bytes_chunk.len() as u64;
            }
            if downloaded == chunk_start {
                anyhow::bail!(
                    "S3 returned no data for s3://{}/{} at offset {} of {}",
                    self.bucket,
                    artifact_id,
                    downloaded,
                    total_bytes
                );
            }
            tracing::debug!(downloaded, total_bytes, "download progress");
        }

        output_file
            .flush()
            .await
            .with_context(|| format!("Failed to flush destination file: {}", local_path.display()))?;
        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_keys() {
        assert_eq!(folder_prefix("nightly"), "nightly/");
        assert_eq!(folder_prefix("backups/nightly/"), "backups/nightly/");
        assert_eq!(
            object_key("nightly", "db-2024-03-05__10-00-00.sql.gz.enc"),
            "nightly/db-2024-03-05__10-00-00.sql.gz.enc"
        );
    }

    #[test]
    fn test_content_links() {
        assert_eq!(
            content_link(Some("https://fra1.digitaloceanspaces.com/"), "fra1", "backups", "nightly/db.enc"),
            "https://fra1.digitaloceanspaces.com/backups/nightly/db.enc"
        );
        assert_eq!(
            content_link(None, "eu-central-1", "backups", "nightly/db.enc"),
            "https://backups.s3.eu-central-1.amazonaws.com/nightly/db.enc"
        );
    }
}
