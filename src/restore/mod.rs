pub(crate) mod archive; // gpg decryption and gunzip
pub(crate) mod db_restore; // table clearing and psql load
pub(crate) mod logic;

use anyhow::Result;
use crate::config::RestoreConfig;
use crate::storage::ArtifactStore;

/// Public entry point for the restore process.
pub async fn run_restore_flow(restore_config: &RestoreConfig, store: &dyn ArtifactStore) -> Result<()> {
    logic::perform_restore_orchestration(restore_config, store).await
}
