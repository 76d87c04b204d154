pub(crate) mod db_dump; // pg_dump | gzip | gpg pipeline
pub(crate) mod logic;

use anyhow::Result;
use crate::config::BackupConfig;
use crate::storage::ArtifactStore;

/// Public entry point for the backup process.
pub async fn run_backup_flow(backup_config: &BackupConfig, store: &dyn ArtifactStore) -> Result<()> {
    logic::perform_backup_orchestration(backup_config, store).await
}
