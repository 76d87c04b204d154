use anyhow::{Context, Result};
use std::process::Command;

use crate::errors::ToolError;
use crate::utils::find_executable;

/// Reference to a key in the local gpg keyring. Keys are never created or
/// stored by this tool, only looked up.
#[derive(Debug, Clone)]
pub struct KeyRef {
    pub key_id: String,
    pub is_secret: bool,
}

impl KeyRef {
    pub fn public(key_id: &str) -> Self {
        KeyRef { key_id: key_id.to_string(), is_secret: false }
    }

    pub fn secret(key_id: &str) -> Self {
        KeyRef { key_id: key_id.to_string(), is_secret: true }
    }

    fn missing(&self) -> ToolError {
        if self.is_secret {
            ToolError::SecretKeyNotFound(self.key_id.clone())
        } else {
            ToolError::PublicKeyNotFound(self.key_id.clone())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyListing {
    pub fingerprint: Option<String>,
    pub user_id: Option<String>,
}

/// Checks that the key is present in the public or secret keyring and
/// returns its first user id for display.
pub fn ensure_key(key: &KeyRef) -> Result<KeyListing> {
    let gpg_path = find_executable("gpg")?;
    let list_flag = if key.is_secret { "--list-secret-keys" } else { "--list-keys" };

    let output = Command::new(gpg_path)
        .args(["--batch", "--with-colons", list_flag, "--", &key.key_id])
        .output()
        .with_context(|| format!("Failed to execute gpg {} for key {}", list_flag, key.key_id))?;

    if !output.status.success() {
        tracing::debug!(
            key_id = %key.key_id,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "gpg key lookup returned {}",
            output.status
        );
        return Err(key.missing().into());
    }

    let listing = parse_colon_listing(&String::from_utf8_lossy(&output.stdout), key.is_secret)
        .ok_or_else(|| key.missing())?;
    tracing::debug!(key_id = %key.key_id, fingerprint = ?listing.fingerprint, "gpg key found");
    println!(
        "🔑 Selected key - {}",
        listing.user_id.as_deref().unwrap_or(&key.key_id)
    );
    Ok(listing)
}

/// Reads the first key block out of `gpg --with-colons` output.
fn parse_colon_listing(output: &str, secret: bool) -> Option<KeyListing> {
    let key_record = if secret { "sec" } else { "pub" };
    let mut lines = output.lines().map(|line| line.split(':').collect::<Vec<_>>());

    lines.find(|fields| fields.first() == Some(&key_record))?;

    let mut listing = KeyListing { fingerprint: None, user_id: None };
    for fields in lines {
        match fields.first().copied() {
            Some("fpr") if listing.fingerprint.is_none() => {
                listing.fingerprint = fields.get(9).map(|s| s.to_string());
            }
            Some("uid") => {
                listing.user_id = fields.get(9).map(|s| unescape_colon_field(s));
                break;
            }
            Some("pub") | Some("sec") => break,
            _ => {}
        }
    }
    Some(listing)
}

/// gpg escapes ':' and other bytes in colon listings as `\xNN`.
fn unescape_colon_field(field: &str) -> String {
    let mut bytes = Vec::with_capacity(field.len());
    let raw = field.as_bytes();
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' && i + 3 < raw.len() && raw[i + 1] == b'x' {
            if let Ok(decoded) = hex::decode(&raw[i + 2..i + 4]) {
                bytes.extend_from_slice(&decoded);
                i += 4;
                continue;
            }
        }
        bytes.push(raw[i]);
        i += 1;
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
