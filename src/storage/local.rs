use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use url::Url;

use super::{ArtifactStore, StoredArtifact};

/// Folders as subdirectories of a root directory, e.g. a mounted NAS share.
/// An artifact id is `<folder>/<name>` relative to the root.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: PathBuf) -> Self {
        LocalStore { root }
    }

    fn resolve(&self, artifact_id: &str) -> Result<PathBuf> {
        let relative = Path::new(artifact_id);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            anyhow::bail!("Artifact id escapes the storage root: {}", artifact_id);
        }
        Ok(self.root.join(relative))
    }

    async fn copy_into(&self, local_path: &Path, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create folder {}", parent.display()))?;
        }
        // Copy next to the target and rename, so readers never see a half-written file.
        let staging = destination.with_extension("partial");
        tokio::fs::copy(local_path, &staging)
            .await
            .with_context(|| format!("Failed to copy {} to {}", local_path.display(), staging.display()))?;
        tokio::fs::rename(&staging, destination)
            .await
            .with_context(|| format!("Failed to move {} into place", staging.display()))?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for LocalStore {
    async fn list(&self, folder_id: &str) -> Result<Vec<StoredArtifact>> {
        let folder = self.resolve(folder_id)?;
        let mut entries = tokio::fs::read_dir(&folder)
            .await
            .with_context(|| format!("Failed to read storage folder {}", folder.display()))?;

        let mut artifacts = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("Failed to read storage folder {}", folder.display()))?
        {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".partial") {
                continue;
            }
            let path = entry.path();
            artifacts.push(StoredArtifact {
                id: format!("{}/{}", folder_id.trim_end_matches('/'), name),
                name,
                size_bytes: Some(metadata.len()),
                content_link: Url::from_file_path(&path).ok().map(String::from),
            });
        }
        Ok(artifacts)
    }

    async fn create(&self, local_path: &Path, name: &str, folder_id: &str) -> Result<String> {
        let id = format!("{}/{}", folder_id.trim_end_matches('/'), name);
        let destination = self.resolve(&id)?;
        self.copy_into(local_path, &destination).await?;
        Ok(id)
    }

    async fn update(&self, artifact_id: &str, local_path: &Path) -> Result<String> {
        let destination = self.resolve(artifact_id)?;
        self.copy_into(local_path, &destination).await?;
        Ok(artifact_id.to_string())
    }

    async fn download(&self, artifact_id: &str, local_path: &Path) -> Result<u64> {
        let source = self.resolve(artifact_id)?;
        tokio::fs::copy(&source, local_path)
            .await
            .with_context(|| format!("Failed to copy {} to {}", source.display(), local_path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_creates_then_updates_by_name() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let work = tempfile::tempdir()?;
        std::fs::create_dir(root.path().join("nightly"))?;
        let store = LocalStore::new(root.path().to_path_buf());

        let first = work.path().join("first.enc");
        std::fs::write(&first, b"first")?;
        let created = store.upload(&first, "db-2024-01-01__00-00-00.sql.gz.enc", "nightly").await?;
        assert!(!created.replaced);
        assert_eq!(created.id, "nightly/db-2024-01-01__00-00-00.sql.gz.enc");

        let second = work.path().join("second.enc");
        std::fs::write(&second, b"second, longer")?;
        let updated = store.upload(&second, "db-2024-01-01__00-00-00.sql.gz.enc", "nightly").await?;
        assert!(updated.replaced);
        assert_eq!(updated.id, created.id);

        let listed = store.list("nightly").await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size_bytes, Some(14));
        assert!(listed[0].content_link.as_deref().is_some_and(|link| link.starts_with("file://")));
        Ok(())
    }

    #[tokio::test]
    async fn test_download_writes_full_object() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let work = tempfile::tempdir()?;
        std::fs::create_dir(root.path().join("nightly"))?;
        std::fs::write(root.path().join("nightly/db-2024-03-05__10-00-00.sql.gz.enc"), vec![7u8; 4096])?;
        let store = LocalStore::new(root.path().to_path_buf());

        let target = work.path().join("backup_db.sql.gz.enc");
        let bytes = store.download("nightly/db-2024-03-05__10-00-00.sql.gz.enc", &target).await?;
        assert_eq!(bytes, 4096);
        assert_eq!(std::fs::read(&target)?, vec![7u8; 4096]);
        Ok(())
    }

    #[tokio::test]
    async fn test_ids_cannot_escape_root() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = LocalStore::new(root.path().to_path_buf());
        let target = root.path().join("out");
        assert!(store.download("../etc/passwd", &target).await.is_err());
        assert!(store.download("/etc/passwd", &target).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_folder_is_an_error() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = LocalStore::new(root.path().to_path_buf());
        assert!(store.list("nope").await.is_err());
        Ok(())
    }
}
