pub mod host;
pub mod keyring;
pub mod naming;
pub mod setting;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use which::which;

/// Finds an external tool in the system PATH.
pub fn find_executable(name: &str) -> Result<PathBuf> {
    which(name).with_context(|| {
        format!(
            "{} executable not found in PATH. Please ensure it is installed and in your PATH.",
            name
        )
    })
}

/// Removes a file, treating "already gone" as success.
pub fn remove_file_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

/// Formats a byte count as megabytes with three decimals.
pub fn format_megabytes(bytes: u64) -> String {
    format!("{:.3} MB", bytes as f64 / (1024.0 * 1024.0))
}
