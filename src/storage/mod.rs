// pgvault/src/storage/mod.rs
pub(crate) mod local;
pub(crate) mod s3;

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use crate::config::StorageConfig;

/// Metadata for one object in a storage folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    /// Opaque identifier assigned by the store.
    pub id: String,
    pub name: String,
    pub size_bytes: Option<u64>,
    /// Direct link for operators, when the store can give one.
    pub content_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uploaded {
    pub id: String,
    /// An artifact with the same name already existed and was overwritten.
    pub replaced: bool,
}

/// Remote folder-scoped object store used by both flows.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Every artifact in the folder, with pagination already resolved.
    async fn list(&self, folder_id: &str) -> Result<Vec<StoredArtifact>>;

    async fn create(&self, local_path: &Path, name: &str, folder_id: &str) -> Result<String>;

    async fn update(&self, artifact_id: &str, local_path: &Path) -> Result<String>;

    /// Writes the whole object to `local_path` and returns the byte count.
    async fn download(&self, artifact_id: &str, local_path: &Path) -> Result<u64>;

    /// Create-or-update by name. Existence is checked against the folder
    /// itself, not local state.
    async fn upload(&self, local_path: &Path, name: &str, folder_id: &str) -> Result<Uploaded> {
        let existing = self
            .list(folder_id)
            .await?
            .into_iter()
            .find(|artifact| artifact.name == name);

        match existing {
            Some(artifact) => {
                tracing::debug!(id = %artifact.id, "artifact with this name exists, updating in place");
                let id = self.update(&artifact.id, local_path).await?;
                Ok(Uploaded { id, replaced: true })
            }
            None => {
                let id = self.create(local_path, name, folder_id).await?;
                Ok(Uploaded { id, replaced: false })
            }
        }
    }
}

/// Builds the configured store. Credentials and sessions stay behind this call.
pub async fn open_store(config: &StorageConfig) -> Result<Box<dyn ArtifactStore>> {
    match config {
        StorageConfig::S3(s3_config) => Ok(Box::new(s3::S3Store::connect(s3_config).await)),
        StorageConfig::Local { root } => Ok(Box::new(local::LocalStore::new(root.clone()))),
    }
}
