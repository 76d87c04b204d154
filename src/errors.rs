use std::process::ExitStatus;
use thiserror::Error;

/// Fatal conditions the pipelines classify explicitly.
///
/// Everything else travels as a plain `anyhow` error with context and maps
/// to exit status 1.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("Public encrypt key ({0}) not found. If you have no key, you need to generate it (gpg --full-generate-key).")]
    PublicKeyNotFound(String),

    #[error("Private decrypt key ({0}) not found.")]
    SecretKeyNotFound(String),

    #[error("It seems this is not a loader server ({0}), refusing to restore.")]
    HostNotAllowed(String),

    #[error("No backup artifacts found in folder {0}")]
    NoArtifacts(String),

    #[error("Dump pipeline produced an empty artifact at {0}, refusing to upload")]
    EmptyArtifact(String),

    #[error("Decompressed SQL file not found: {0}")]
    MissingSqlFile(String),

    #[error("Password authentication failed for user \"{0}\"")]
    AuthenticationFailed(String),

    #[error("{stage} exited with status {}", describe_code(.code))]
    Command { stage: String, code: Option<i32> },
}

impl ToolError {
    pub fn command(stage: &str, status: ExitStatus) -> Self {
        ToolError::Command {
            stage: stage.to_string(),
            code: status.code(),
        }
    }

    /// Process exit status for this failure. Subprocess failures propagate
    /// the tool's own status; everything else is 1.
    pub fn exit_code(&self) -> u8 {
        match self {
            ToolError::Command { code: Some(code), .. } => (*code).clamp(1, 255) as u8,
            _ => 1,
        }
    }
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "unknown (killed by signal)".to_string(),
    }
}

/// Picks the exit status for an error chain produced by the pipelines.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ToolError>())
        .map_or(1, ToolError::exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_command_failure_propagates_status() {
        let err = ToolError::Command { stage: "pg_dump".to_string(), code: Some(2) };
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.to_string(), "pg_dump exited with status 2");
    }

    #[test]
    fn test_out_of_range_status_is_clamped() {
        let high = ToolError::Command { stage: "psql".to_string(), code: Some(300) };
        assert_eq!(high.exit_code(), 255);
        let signal = ToolError::Command { stage: "gpg".to_string(), code: None };
        assert_eq!(signal.exit_code(), 1);
        assert!(signal.to_string().contains("killed by signal"));
    }

    #[test]
    fn test_exit_code_found_through_context() {
        let result: anyhow::Result<()> = Err(ToolError::Command {
            stage: "gpg --decrypt".to_string(),
            code: Some(4),
        })
        .context("Restore process failed");
        let err = result.unwrap_err();
        assert_eq!(exit_code_for(&err), 4);

        let plain = anyhow::anyhow!("something else");
        assert_eq!(exit_code_for(&plain), 1);
        assert_eq!(exit_code_for(&ToolError::NoArtifacts("f".into()).into()), 1);
    }
}
