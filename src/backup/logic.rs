use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::Connection;
use std::path::Path;

use crate::backup::db_dump;
use crate::config::BackupConfig;
use crate::storage::{ArtifactStore, Uploaded};
use crate::utils::keyring::{self, KeyRef};
use crate::utils::setting::{self, DbSession};
use crate::utils::{format_megabytes, naming, remove_file_if_exists};

/// Temporary artifact written by the dump pipeline.
pub const ENCRYPTED_ARTIFACT_FILE: &str = "backup_db.sql.gz.enc";

/// Main backup flow: key check, connection check, dump, upload, cleanup.
pub async fn perform_backup_orchestration(config: &BackupConfig, store: &dyn ArtifactStore) -> Result<()> {
    println!(
        "Hi! This tool will dump the PostgreSQL database {}, compress and encrypt it,\nand then send it to object storage.\n",
        config.database.database_name
    );

    keyring::ensure_key(&KeyRef::public(&config.key_id))?;

    // Validates the connection and resolves an interactively entered
    // password before any external tool runs.
    let DbSession { connection, database } = setting::connect_with_password_retry(&config.database).await?;
    connection.close().await.context("Failed to close validation connection")?;

    std::fs::create_dir_all(&config.work_dir)
        .with_context(|| format!("Failed to create work directory: {}", config.work_dir.display()))?;
    let local_path = config.work_dir.join(ENCRYPTED_ARTIFACT_FILE);

    println!("📦 Preparing database backup started");
    let artifact_size = db_dump::dump_compress_encrypt(&database, &config.key_id, &local_path)?;
    println!("🔐 DB dumped, compressed and encrypted ({})", format_megabytes(artifact_size));

    let name = naming::artifact_name(&Utc::now().with_timezone(&config.time_zone));
    publish_artifact(store, &local_path, &name, &config.folder_id).await?;

    println!("👍 That's all!");
    Ok(())
}

/// Uploads the artifact under `name` and removes the local copy.
/// On upload failure the local file is kept for diagnosis.
pub async fn publish_artifact(
    store: &dyn ArtifactStore,
    local_path: &Path,
    name: &str,
    folder_id: &str,
) -> Result<Uploaded> {
    println!("📂 Starting upload of {} to folder {}", name, folder_id);
    let uploaded = store.upload(local_path, name, folder_id).await.with_context(|| {
        format!(
            "Upload of {} failed; the local artifact is kept at {}",
            name,
            local_path.display()
        )
    })?;

    if uploaded.replaced {
        println!("⚠️ An artifact named {} already existed and was overwritten", name);
    }
    println!("🚀 Uploaded as {}", uploaded.id);

    remove_file_if_exists(local_path)?;
    tracing::debug!(path = %local_path.display(), "removed local artifact");
    Ok(uploaded)
}
