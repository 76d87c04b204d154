// pgvault/src/restore/archive.rs
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::process::Command;

use crate::errors::ToolError;
use crate::utils::{find_executable, remove_file_if_exists};

/// Decrypts `encrypted_path` into `decrypted_path` with the local secret key.
///
/// gpg may ask for the key passphrase through its own pinentry, so stdio is
/// inherited rather than captured.
pub fn decrypt_artifact(encrypted_path: &Path, decrypted_path: &Path) -> Result<()> {
    let gpg_path = find_executable("gpg")?;
    remove_file_if_exists(decrypted_path)?;

    let status = Command::new(gpg_path)
        .arg("--yes")
        .arg("--output")
        .arg(decrypted_path)
        .arg("--decrypt")
        .arg(encrypted_path)
        .status()
        .with_context(|| format!("Failed to execute gpg --decrypt for {}", encrypted_path.display()))?;

    if !status.success() {
        return Err(ToolError::command("gpg --decrypt", status).into());
    }
    Ok(())
}

/// Gunzips `compressed_path` into `sql_path`, replacing any stale output
/// from an earlier attempt. Returns the decompressed size.
pub fn decompress_artifact(compressed_path: &Path, sql_path: &Path) -> Result<u64> {
    remove_file_if_exists(sql_path)?;

    let compressed = File::open(compressed_path)
        .with_context(|| format!("Failed to open compressed dump: {}", compressed_path.display()))?;
    let output = File::create(sql_path)
        .with_context(|| format!("Failed to create SQL file: {}", sql_path.display()))?;

    let mut decoder = GzDecoder::new(compressed);
    let mut writer = BufWriter::new(output);
    let written = io::copy(&mut decoder, &mut writer)
        .with_context(|| format!("Failed to decompress {}", compressed_path.display()))?;
    writer
        .flush()
        .with_context(|| format!("Failed to write SQL file: {}", sql_path.display()))?;
    Ok(written)
}
