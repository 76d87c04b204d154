use anyhow::{Context, Result};

use crate::errors::ToolError;

const LOADER_PREFIX: &str = "loader-";
const LOCAL_SUFFIX: &str = ".local";

/// Hosts allowed to have their database replaced by a restore.
pub fn is_loader_host(hostname: &str) -> bool {
    hostname.starts_with(LOADER_PREFIX) || hostname.ends_with(LOCAL_SUFFIX)
}

/// Fails unless the current machine is a designated loader host.
pub fn ensure_loader_host() -> Result<String> {
    let hostname = hostname::get()
        .context("Failed to read the local hostname")?
        .to_string_lossy()
        .into_owned();
    check_hostname(&hostname)?;
    Ok(hostname)
}

fn check_hostname(hostname: &str) -> Result<(), ToolError> {
    if !is_loader_host(hostname) {
        return Err(ToolError::HostNotAllowed(hostname.to_string()));
    }
    println!("🏠 We are on a loader or local server ({}), ok", hostname);
    Ok(())
}
