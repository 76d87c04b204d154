// pgvault/src/config/mod.rs
use anyhow::{Context, Result};
use chrono_tz::Tz;
use std::path::{Path, PathBuf};

use crate::errors::ToolError;

pub const DEFAULT_DB_HOSTNAME: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_TIME_ZONE: &str = "Europe/Moscow";
pub const DEFAULT_WORK_DIR: &str = "/tmp";
pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// Raw environment-style values, captured once before any validation.
/// Empty strings are stored as `None`.
#[derive(Debug, Clone, Default)]
pub struct RawEnvConfig {
    pub db_hostname: Option<String>,
    pub db_port: Option<String>,
    pub db_name: Option<String>,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    pub backup_key: Option<String>,
    pub time_zone: Option<String>,
    pub id_parent_folder: Option<String>,
    pub check_hostname: Option<String>,
    pub work_dir: Option<PathBuf>,
    pub storage_backend: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint_url: Option<String>,
    pub s3_access_key_id: Option<String>,
    pub s3_secret_access_key: Option<String>,
    pub local_storage_root: Option<PathBuf>,
}

// Application's internal configuration structs
#[derive(Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database_name: String,
    pub user: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_name", &self.database_name)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub database: DbConfig,
    pub key_id: String,
    pub time_zone: Tz,
    pub folder_id: String,
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RestoreConfig {
    pub database: DbConfig,
    pub key_id: String,
    pub folder_id: String,
    pub check_hostname: bool,
    pub work_dir: PathBuf,
}

#[derive(Clone)]
pub struct S3StorageConfig {
    pub bucket_name: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl std::fmt::Debug for S3StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3StorageConfig")
            .field("bucket_name", &self.bucket_name)
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("static_credentials", &self.access_key_id.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum StorageConfig {
    S3(S3StorageConfig),
    Local { root: PathBuf },
}

impl RawEnvConfig {
    /// Loads an optional env file and then reads the process environment.
    /// Variables already set in the environment take precedence over the file.
    pub fn load(env_file: Option<&Path>) -> Result<Self> {
        match env_file {
            Some(path) => {
                dotenv::from_path(path)
                    .with_context(|| format!("Failed to load env file {}", path.display()))?;
            }
            None => {
                // A missing .env in the working directory is fine.
                let _ = dotenv::dotenv();
            }
        }
        Ok(Self::from_lookup(|key| std::env::var(key).ok()))
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        RawEnvConfig {
            db_hostname: get("DB_HOSTNAME"),
            db_port: get("DB_PORT"),
            db_name: get("DB_NAME"),
            db_user: get("DB_USER"),
            // Passwords are taken verbatim, surrounding spaces included.
            db_password: lookup("DB_PASSWORD").filter(|v| !v.is_empty()),
            backup_key: get("BACKUP_KEY"),
            time_zone: get("TIME_ZONE"),
            id_parent_folder: get("ID_PARENT_FOLDER"),
            check_hostname: get("CHECK_HOSTNAME"),
            work_dir: get("WORK_DIR").map(PathBuf::from),
            storage_backend: get("STORAGE_BACKEND"),
            s3_bucket: get("S3_BUCKET"),
            s3_region: get("S3_REGION"),
            s3_endpoint_url: get("S3_ENDPOINT_URL"),
            s3_access_key_id: get("S3_ACCESS_KEY_ID"),
            s3_secret_access_key: get("S3_SECRET_ACCESS_KEY"),
            local_storage_root: get("LOCAL_STORAGE_ROOT").map(PathBuf::from),
        }
    }
}

fn required(value: &Option<String>, key: &str, operation: &str) -> Result<String> {
    value
        .clone()
        .ok_or_else(|| ToolError::InvalidConfig(format!("{} must be set for {}", key, operation)).into())
}

pub fn load_db_config(raw: &RawEnvConfig, operation: &str) -> Result<DbConfig> {
    let port = match &raw.db_port {
        Some(port) => port.parse::<u16>().map_err(|_| {
            ToolError::InvalidConfig(format!("DB_PORT must be a port number, got '{}'", port))
        })?,
        None => DEFAULT_DB_PORT,
    };

    Ok(DbConfig {
        host: raw.db_hostname.clone().unwrap_or_else(|| DEFAULT_DB_HOSTNAME.to_string()),
        port,
        database_name: required(&raw.db_name, "DB_NAME", operation)?,
        user: required(&raw.db_user, "DB_USER", operation)?,
        password: raw.db_password.clone(),
    })
}

pub fn load_backup_config(raw: &RawEnvConfig) -> Result<BackupConfig> {
    let zone_name = raw.time_zone.as_deref().unwrap_or(DEFAULT_TIME_ZONE);
    let time_zone = zone_name.parse::<Tz>().map_err(|_| {
        ToolError::InvalidConfig(format!("TIME_ZONE '{}' is not a known IANA time zone", zone_name))
    })?;

    Ok(BackupConfig {
        database: load_db_config(raw, "backup")?,
        key_id: required(&raw.backup_key, "BACKUP_KEY", "backup")?,
        time_zone,
        folder_id: required(&raw.id_parent_folder, "ID_PARENT_FOLDER", "backup")?,
        work_dir: work_dir(raw),
    })
}

pub fn load_restore_config(raw: &RawEnvConfig) -> Result<RestoreConfig> {
    Ok(RestoreConfig {
        database: load_db_config(raw, "restore")?,
        key_id: required(&raw.backup_key, "BACKUP_KEY", "restore")?,
        folder_id: required(&raw.id_parent_folder, "ID_PARENT_FOLDER", "restore")?,
        check_hostname: raw.check_hostname.as_deref().is_some_and(flag_enabled),
        work_dir: work_dir(raw),
    })
}

/// Only the folder is needed to list artifacts.
pub fn load_folder_id(raw: &RawEnvConfig) -> Result<String> {
    required(&raw.id_parent_folder, "ID_PARENT_FOLDER", "list")
}

pub fn load_storage_config(raw: &RawEnvConfig) -> Result<StorageConfig> {
    match raw.storage_backend.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("s3") => {
            let access_key_id = raw.s3_access_key_id.clone();
            let secret_access_key = raw.s3_secret_access_key.clone();
            if access_key_id.is_some() != secret_access_key.is_some() {
                return Err(ToolError::InvalidConfig(
                    "S3_ACCESS_KEY_ID and S3_SECRET_ACCESS_KEY must be set together".to_string(),
                )
                .into());
            }
            Ok(StorageConfig::S3(S3StorageConfig {
                bucket_name: required(&raw.s3_bucket, "S3_BUCKET", "s3 storage")?,
                region: raw.s3_region.clone().unwrap_or_else(|| DEFAULT_S3_REGION.to_string()),
                endpoint_url: raw.s3_endpoint_url.clone(),
                access_key_id,
                secret_access_key,
            }))
        }
        Some("local") => {
            let root = raw.local_storage_root.clone().ok_or_else(|| {
                ToolError::InvalidConfig("LOCAL_STORAGE_ROOT must be set for local storage".to_string())
            })?;
            Ok(StorageConfig::Local { root })
        }
        Some(other) => Err(ToolError::InvalidConfig(format!(
            "STORAGE_BACKEND must be 's3' or 'local', got '{}'",
            other
        ))
        .into()),
    }
}

fn work_dir(raw: &RawEnvConfig) -> PathBuf {
    raw.work_dir.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR))
}

/// Any non-empty value enables a flag, except the usual spellings of "off".
fn flag_enabled(value: &str) -> bool {
    !matches!(
        value.to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}
