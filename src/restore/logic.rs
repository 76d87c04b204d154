use anyhow::{Context, Result};
use sqlx::Connection;
use std::path::{Path, PathBuf};

use crate::config::RestoreConfig;
use crate::errors::ToolError;
use crate::restore::{archive, db_restore};
use crate::storage::{ArtifactStore, StoredArtifact};
use crate::utils::keyring::{self, KeyRef};
use crate::utils::setting::{self, DbSession};
use crate::utils::{format_megabytes, host, naming, remove_file_if_exists};

/// Local files a restore run works through, all inside the work directory.
#[derive(Debug, Clone)]
pub struct RestoreFiles {
    pub encrypted: PathBuf,
    pub compressed: PathBuf,
    pub sql: PathBuf,
}

impl RestoreFiles {
    pub fn in_dir(work_dir: &Path) -> Self {
        RestoreFiles {
            encrypted: work_dir.join("backup_db.sql.gz.enc"),
            compressed: work_dir.join("db.sql.gz"),
            sql: work_dir.join("db.sql"),
        }
    }

    /// Removes every intermediate. Only called after a successful load.
    pub fn remove_all(&self) -> Result<()> {
        for path in [&self.encrypted, &self.compressed, &self.sql] {
            remove_file_if_exists(path)?;
        }
        Ok(())
    }
}

/// Selects the newest artifact in the folder and downloads it.
pub async fn fetch_latest_artifact(
    store: &dyn ArtifactStore,
    folder_id: &str,
    destination: &Path,
) -> Result<StoredArtifact> {
    let artifacts = store
        .list(folder_id)
        .await
        .with_context(|| format!("Failed to list artifacts in folder {}", folder_id))?;
    let latest = naming::select_latest(folder_id, artifacts)?;

    let size = latest
        .size_bytes
        .map(format_megabytes)
        .unwrap_or_else(|| "unknown size".to_string());
    println!(
        "⏳ Last backup in storage is {},\nfile id {}, {}, downloading it",
        latest.name, latest.id, size
    );

    let downloaded = store
        .download(&latest.id, destination)
        .await
        .with_context(|| format!("Failed to download {}", latest.id))?;
    tracing::debug!(downloaded, path = %destination.display(), "artifact downloaded");
    println!(
        "🚀 Downloaded {}",
        latest.content_link.as_deref().unwrap_or(&latest.id)
    );
    Ok(latest)
}

/// Main restore flow. Every precondition is checked before the first table
/// is dropped; after the drop the load follows immediately.
pub async fn perform_restore_orchestration(config: &RestoreConfig, store: &dyn ArtifactStore) -> Result<()> {
    println!(
        "This tool will download the last database backup from object storage,\ndecrypt and decompress it, and then load it into {}.\n",
        config.database.database_name
    );

    if config.check_hostname {
        host::ensure_loader_host()?;
    }

    keyring::ensure_key(&KeyRef::secret(&config.key_id))?;

    let DbSession { mut connection, database } =
        setting::connect_with_password_retry(&config.database).await?;

    std::fs::create_dir_all(&config.work_dir)
        .with_context(|| format!("Failed to create work directory: {}", config.work_dir.display()))?;
    let files = RestoreFiles::in_dir(&config.work_dir);

    fetch_latest_artifact(store, &config.folder_id, &files.encrypted).await?;

    archive::decrypt_artifact(&files.encrypted, &files.compressed)?;
    println!("🔑 Database decrypted");

    let sql_size = archive::decompress_artifact(&files.compressed, &files.sql)?;
    println!("📤 Database decompressed ({})", format_megabytes(sql_size));

    if !files.sql.is_file() {
        return Err(ToolError::MissingSqlFile(files.sql.display().to_string()).into());
    }

    db_restore::clear_database(&mut connection).await?;

    println!("💤 Database load started");
    db_restore::load_sql_file(&database, &files.sql)
        .context("Database load failed; the target database is likely partially loaded")?;
    println!("🤖 Database loaded");

    connection.close().await.context("Failed to close database connection")?;
    files.remove_all()?;
    println!("👍 That's all!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::LocalStore;

    #[tokio::test]
    async fn test_fetch_latest_downloads_newest() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let work = tempfile::tempdir()?;
        let folder = root.path().join("nightly");
        std::fs::create_dir(&folder)?;
        std::fs::write(folder.join("db-2024-01-01__00-00-00.sql.gz.enc"), b"january")?;
        std::fs::write(folder.join("db-2024-03-05__10-00-00.sql.gz.enc"), b"march")?;
        let store = LocalStore::new(root.path().to_path_buf());

        let files = RestoreFiles::in_dir(work.path());
        let latest = fetch_latest_artifact(&store, "nightly", &files.encrypted).await?;

        assert_eq!(latest.name, "db-2024-03-05__10-00-00.sql.gz.enc");
        assert_eq!(std::fs::read(&files.encrypted)?, b"march");
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_latest_from_empty_folder_fails_cleanly() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let work = tempfile::tempdir()?;
        std::fs::create_dir(root.path().join("nightly"))?;
        let store = LocalStore::new(root.path().to_path_buf());

        let files = RestoreFiles::in_dir(work.path());
        let err = fetch_latest_artifact(&store, "nightly", &files.encrypted).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ToolError>(), Some(ToolError::NoArtifacts(_))));
        assert!(!files.encrypted.exists());
        Ok(())
    }

    #[test]
    fn test_remove_all_tolerates_missing_files() -> anyhow::Result<()> {
        let work = tempfile::tempdir()?;
        let files = RestoreFiles::in_dir(work.path());
        std::fs::write(&files.encrypted, b"enc")?;
        std::fs::write(&files.sql, b"select 1;")?;

        files.remove_all()?;
        assert!(!files.encrypted.exists());
        assert!(!files.compressed.exists());
        assert!(!files.sql.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_wrong_host_aborts_before_any_other_step() -> anyhow::Result<()> {
        let hostname = hostname::get()?.to_string_lossy().into_owned();
        if host::is_loader_host(&hostname) {
            // The gate passes on this machine; nothing to observe.
            return Ok(());
        }
        let root = tempfile::tempdir()?;
        let work = tempfile::tempdir()?;
        let config = RestoreConfig {
            database: crate::config::DbConfig {
                host: "127.0.0.1".to_string(),
                port: 1,
                database_name: "shop".to_string(),
                user: "loader".to_string(),
                password: None,
            },
            key_id: "ops@example.com".to_string(),
            folder_id: "nightly".to_string(),
            check_hostname: true,
            work_dir: work.path().join("restore"),
        };
        let store = LocalStore::new(root.path().to_path_buf());

        let err = perform_restore_orchestration(&config, &store).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<ToolError>(), Some(ToolError::HostNotAllowed(_))));
        // Nothing was created locally either.
        assert!(!config.work_dir.exists());
        Ok(())
    }
}
