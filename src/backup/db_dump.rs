// pgvault/src/backup/db_dump.rs
use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::config::DbConfig;
use crate::errors::ToolError;
use crate::utils::find_executable;

/// Streams `pg_dump | gzip --best | gpg --encrypt` into `output_path`.
///
/// The three stages run concurrently through pipes; gzip runs in-process
/// between the two child processes. If any stage fails the whole pipeline
/// fails, reporting the last failing stage (gpg, then gzip, then pg_dump).
/// Returns the size of the encrypted artifact.
pub fn dump_compress_encrypt(database: &DbConfig, key_id: &str, output_path: &Path) -> Result<u64> {
    tracing::debug!(
        database = %database.redacted_url(),
        output = %output_path.display(),
        "starting dump pipeline"
    );
    run_pipeline(&mut pg_dump_command(database)?, &mut encrypt_command(key_id)?, output_path)
}

fn pg_dump_command(database: &DbConfig) -> Result<Command> {
    let pg_dump_path = find_executable("pg_dump")?;
    let db_url = database.connection_url()?;
    let mut command = Command::new(pg_dump_path);
    command.arg("--no-password").arg("--dbname").arg(db_url.as_str());
    Ok(command)
}

/// Batch mode: no prompts and no network key lookups for the recipient,
/// which was already checked against the local keyring.
fn encrypt_command(key_id: &str) -> Result<Command> {
    let gpg_path = find_executable("gpg")?;
    let mut command = Command::new(gpg_path);
    command.args([
        "--batch",
        "--no-auto-key-locate",
        "--trust-model",
        "always",
        "--yes",
        "--encrypt",
        "--recipient",
        key_id,
    ]);
    Ok(command)
}

/// Runs `dump | gzip | encrypt > output_path`. Stage failures are reported
/// as `pg_dump` and `gpg --encrypt`; the encrypt stage wins over gzip,
/// which wins over the dump.
fn run_pipeline(dump: &mut Command, encrypt: &mut Command, output_path: &Path) -> Result<u64> {
    let output_file = File::create(output_path)
        .with_context(|| format!("Failed to create artifact file: {}", output_path.display()))?;

    let mut dump = dump.stdout(Stdio::piped()).spawn().context("Failed to start pg_dump")?;

    let mut encrypt = match encrypt.stdin(Stdio::piped()).stdout(Stdio::from(output_file)).spawn() {
        Ok(child) => child,
        Err(e) => {
            let _ = dump.kill();
            let _ = dump.wait();
            return Err(e).context("Failed to start gpg --encrypt");
        }
    };

    let dump_stdout = dump.stdout.take().context("Failed to capture pg_dump stdout")?;
    let encrypt_stdin = encrypt.stdin.take().context("Failed to open gpg stdin")?;

    // Both pipe ends are dropped when this returns, so a failed stage
    // unblocks its neighbours instead of hanging them.
    let compressed = gzip_stream(dump_stdout, encrypt_stdin);

    let dump_status = dump.wait().context("Failed to wait for pg_dump")?;
    let encrypt_status = encrypt.wait().context("Failed to wait for gpg --encrypt")?;

    if !encrypt_status.success() {
        return Err(ToolError::command("gpg --encrypt", encrypt_status).into());
    }
    let dumped_bytes = compressed.context("gzip compression of the dump stream failed")?;
    if !dump_status.success() {
        return Err(ToolError::command("pg_dump", dump_status).into());
    }

    let artifact_size = std::fs::metadata(output_path)
        .with_context(|| format!("Failed to stat artifact file: {}", output_path.display()))?
        .len();
    if dumped_bytes == 0 || artifact_size == 0 {
        return Err(ToolError::EmptyArtifact(output_path.display().to_string()).into());
    }

    tracing::debug!(dumped_bytes, artifact_size, "dump pipeline finished");
    Ok(artifact_size)
}

/// Gzip-compresses everything from `source` into `sink` at the best level.
/// Returns the number of uncompressed bytes read.
pub fn gzip_stream<R: Read, W: Write>(mut source: R, sink: W) -> io::Result<u64> {
    let mut encoder = GzEncoder::new(sink, Compression::best());
    let copied = io::copy(&mut source, &mut encoder)?;
    let mut sink = encoder.finish()?;
    sink.flush()?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::exit_code_for;
    use flate2::read::GzDecoder;

    fn shell(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    fn failed_stage(err: &anyhow::Error) -> Option<(String, Option<i32>)> {
        match err.downcast_ref::<ToolError>() {
            Some(ToolError::Command { stage, code }) => Some((stage.clone(), *code)),
            _ => None,
        }
    }

    #[test]
    fn test_pipeline_writes_encrypted_stream() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("backup_db.sql.gz.enc");

        // `cat` stands in for gpg, so the artifact is the bare gzip stream.
        let size = run_pipeline(&mut shell("printf 'CREATE TABLE a (id int);\\n'"), &mut Command::new("cat"), &output)?;
        assert_eq!(size, std::fs::metadata(&output)?.len());

        let mut decoded = String::new();
        GzDecoder::new(File::open(&output)?).read_to_string(&mut decoded)?;
        assert_eq!(decoded, "CREATE TABLE a (id int);\n");
        Ok(())
    }

    #[test]
    fn test_failed_dump_reports_its_status() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("backup_db.sql.gz.enc");

        let err = run_pipeline(&mut shell("echo 'CREATE TABLE a (id int);'; exit 4"), &mut Command::new("cat"), &output)
            .unwrap_err();
        assert_eq!(failed_stage(&err), Some(("pg_dump".to_string(), Some(4))));
        assert_eq!(exit_code_for(&err), 4);
        Ok(())
    }

    #[test]
    fn test_encrypt_failure_wins_over_dump_failure() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("backup_db.sql.gz.enc");

        let err = run_pipeline(&mut shell("echo partial; exit 1"), &mut shell("cat > /dev/null; exit 2"), &output)
            .unwrap_err();
        assert_eq!(failed_stage(&err), Some(("gpg --encrypt".to_string(), Some(2))));

        // An encrypt stage that never reads breaks the gzip pipe too; still reported as gpg.
        let err = run_pipeline(&mut shell("echo partial; exit 1"), &mut shell("exit 2"), &output).unwrap_err();
        assert_eq!(failed_stage(&err), Some(("gpg --encrypt".to_string(), Some(2))));
        assert_eq!(exit_code_for(&err), 2);
        Ok(())
    }

    #[test]
    fn test_empty_dump_is_not_an_artifact() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("backup_db.sql.gz.enc");

        let err = run_pipeline(&mut shell("true"), &mut Command::new("cat"), &output).unwrap_err();
        assert!(matches!(err.downcast_ref::<ToolError>(), Some(ToolError::EmptyArtifact(_))));
        Ok(())
    }

    #[test]
    fn test_encrypt_command_never_prompts_or_fetches_keys() -> anyhow::Result<()> {
        let Ok(command) = encrypt_command("ops@example.com") else {
            // gpg is not installed here.
            return Ok(());
        };
        let args: Vec<_> = command.get_args().map(|arg| arg.to_string_lossy().into_owned()).collect();
        assert!(args.contains(&"--batch".to_string()));
        assert!(args.contains(&"--no-auto-key-locate".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("ops@example.com"));
        Ok(())
    }

    fn live_database() -> anyhow::Result<DbConfig> {
        let url = std::env::var("TEST_DATABASE_URL").context("TEST_DATABASE_URL must point at a scratch database")?;
        DbConfig::from_url(&url)
    }

    #[test]
    #[ignore = "requires pg_dump and a PostgreSQL server in TEST_DATABASE_URL"]
    fn test_missing_database_fails_the_dump_stage() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut database = live_database()?;
        database.database_name = "pgvault_no_such_database".to_string();

        let err = run_pipeline(&mut pg_dump_command(&database)?, &mut Command::new("cat"), &dir.path().join("out.enc"))
            .unwrap_err();
        assert_eq!(failed_stage(&err), Some(("pg_dump".to_string(), Some(1))));
        Ok(())
    }

    #[test]
    #[ignore = "requires pg_dump, gpg and a PostgreSQL server in TEST_DATABASE_URL"]
    fn test_unknown_recipient_fails_the_encrypt_stage() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("out.enc");

        let err = dump_compress_encrypt(&live_database()?, "nobody@pgvault.invalid", &output).unwrap_err();
        assert_eq!(failed_stage(&err), Some(("gpg --encrypt".to_string(), Some(2))));

        let mut database = live_database()?;
        database.database_name = "pgvault_no_such_database".to_string();
        let err = dump_compress_encrypt(&database, "nobody@pgvault.invalid", &output).unwrap_err();
        assert_eq!(failed_stage(&err), Some(("gpg --encrypt".to_string(), Some(2))));
        assert_eq!(exit_code_for(&err), 2);
        Ok(())
    }

    #[test]
    fn test_gzip_stream_output_decodes_to_input() -> anyhow::Result<()> {
        let dump = "CREATE TABLE a (id int);\nINSERT INTO a VALUES (1);\n".repeat(200);
        let mut compressed = Vec::new();

        let read = gzip_stream(dump.as_bytes(), &mut compressed)?;
        assert_eq!(read, dump.len() as u64);
        assert!(compressed.len() < dump.len());

        let mut decoded = String::new();
        GzDecoder::new(compressed.as_slice()).read_to_string(&mut decoded)?;
        assert_eq!(decoded, dump);
        Ok(())
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "reader went away"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_gzip_stream_reports_sink_failure() {
        let dump = vec![b'x'; 256 * 1024];
        let err = gzip_stream(dump.as_slice(), BrokenPipe).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
