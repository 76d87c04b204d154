//! Artifact naming shared by the backup and restore flows.
//!
//! Names look like `db-2024-03-05__10-00-00.sql.gz.enc`. The timestamp is
//! zero-padded and most-significant-first, so plain string order is
//! chronological order and "latest" never needs a date parse.

use chrono::{DateTime, NaiveDateTime, TimeZone};

use crate::errors::ToolError;
use crate::storage::StoredArtifact;

pub const ARTIFACT_PREFIX: &str = "db-";
pub const ARTIFACT_SUFFIX: &str = ".sql.gz.enc";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d__%H-%M-%S";

pub fn artifact_name<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}{}{}", ARTIFACT_PREFIX, at.format(TIMESTAMP_FORMAT), ARTIFACT_SUFFIX)
}

/// Local timestamp encoded in a conforming artifact name.
pub fn artifact_timestamp(name: &str) -> Option<NaiveDateTime> {
    let stamp = name.strip_prefix(ARTIFACT_PREFIX)?.strip_suffix(ARTIFACT_SUFFIX)?;
    // The format has no width-flexible fields, but chrono accepts unpadded
    // numbers, so the round trip guards the fixed-width invariant.
    let parsed = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
    (parsed.format(TIMESTAMP_FORMAT).to_string() == stamp).then_some(parsed)
}

pub fn is_artifact_name(name: &str) -> bool {
    artifact_timestamp(name).is_some()
}

/// Picks the most recent backup in a folder listing.
pub fn select_latest(folder_id: &str, artifacts: Vec<StoredArtifact>) -> Result<StoredArtifact, ToolError> {
    artifacts
        .into_iter()
        .filter(|artifact| is_artifact_name(&artifact.name))
        .max_by(|a, b| a.name.cmp(&b.name))
        .ok_or_else(|| ToolError::NoArtifacts(folder_id.to_string()))
}

/// Conforming artifacts first, newest to oldest; anything else after them by name.
pub fn sorted_newest_first(mut artifacts: Vec<StoredArtifact>) -> Vec<StoredArtifact> {
    artifacts.sort_by(|a, b| {
        is_artifact_name(&b.name)
            .cmp(&is_artifact_name(&a.name))
            .then_with(|| b.name.cmp(&a.name))
    });
    artifacts
}
