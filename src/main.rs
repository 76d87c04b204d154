//! PostgreSQL Backup/Restore Tool
//!
//! Dumps a database into a compressed, gpg-encrypted artifact in object
//! storage, and restores the newest artifact on a designated loader host.

// pgvault/src/main.rs
mod backup;
mod config;
mod errors;
mod restore;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use config::{RawEnvConfig, load_backup_config, load_folder_id, load_restore_config, load_storage_config};
use utils::{format_megabytes, naming};

#[derive(Debug, Parser)]
#[command(name = "pgvault", version, about = "Encrypted PostgreSQL backups to object storage")]
struct Cli {
    /// Env file with DB_*, BACKUP_KEY, ID_PARENT_FOLDER and storage settings.
    /// Defaults to `.env` in the working directory when present.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Operation>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Operation {
    /// Dump, compress, encrypt and upload the database
    Backup,
    /// Download the newest backup and replace all tables with it
    Restore,
    /// Show the backups in the storage folder, newest first
    List,
}

/// Main entry point for the backup/restore tool
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run_app(cli).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(errors::exit_code_for(&e))
        }
    }
}

async fn run_app(cli: Cli) -> Result<()> {
    let raw_config = RawEnvConfig::load(cli.env_file.as_deref())?;

    let operation = match cli.command {
        Some(operation) => operation,
        None => prompt_choice()?,
    };

    match operation {
        Operation::Backup => {
            let backup_config = load_backup_config(&raw_config).context("Failed to load backup configuration")?;
            let store = storage::open_store(&load_storage_config(&raw_config)?).await?;
            backup::run_backup_flow(&backup_config, store.as_ref())
                .await
                .context("Backup process failed")?;
        }
        Operation::Restore => {
            let restore_config = load_restore_config(&raw_config).context("Failed to load restore configuration")?;
            // The host gate runs inside the flow before anything else; building
            // the store client makes no network call.
            let store = storage::open_store(&load_storage_config(&raw_config)?).await?;
            restore::run_restore_flow(&restore_config, store.as_ref())
                .await
                .context("Restore process failed")?;
        }
        Operation::List => {
            let folder_id = load_folder_id(&raw_config)?;
            let store = storage::open_store(&load_storage_config(&raw_config)?).await?;
            let artifacts = store
                .list(&folder_id)
                .await
                .with_context(|| format!("Failed to list folder {}", folder_id))?;
            if artifacts.is_empty() {
                println!("Folder {} is empty.", folder_id);
            }
            for artifact in naming::sorted_newest_first(artifacts) {
                let marker = if naming::is_artifact_name(&artifact.name) { " " } else { "?" };
                let size = artifact.size_bytes.map(format_megabytes).unwrap_or_default();
                println!("{} {:<40} {:>14}  {}", marker, artifact.name, size, artifact.id);
            }
        }
    }
    Ok(())
}

/// Prompts user to select an operation when none was given on the command line
fn prompt_choice() -> Result<Operation> {
    use std::io::{Write, stdin, stdout};

    println!("Select an operation:");
    println!("1. Take Backup (or type 'backup')");
    println!("2. Restore Latest Backup (or type 'restore')");
    println!("3. List Backups (or type 'list')");
    print!("Enter your choice: ");
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    parse_choice(&input)
}

fn parse_choice(input: &str) -> Result<Operation> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "backup" => Ok(Operation::Backup),
        "2" | "restore" => Ok(Operation::Restore),
        "3" | "list" => Ok(Operation::List),
        other => anyhow::bail!(
            "Invalid choice '{}'. Please enter '1' (backup), '2' (restore), or '3' (list).",
            other
        ),
    }
}
