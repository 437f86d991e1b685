//! External compiler toolchains and process helpers

use crate::{
    artifacts::ArtifactKind,
    error::{Error, Result},
};
use async_trait::async_trait;
use serde_json::Value;
use std::{
    path::{Path, PathBuf},
    process::Output,
    time::Duration,
};
use tokio::process::Command;

/// Version probes should answer almost instantly
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Name and reported version of one toolchain component
pub type ToolVersion = (String, String);

/// Result of the cheap pre-build source check
#[derive(Debug, Clone, PartialEq)]
pub struct SourceCheck {
    pub contract_name: String,
    pub warnings: Vec<String>,
}

/// Narrow interface over an external compiler so the backend can be substituted
#[async_trait]
pub trait Toolchain: Send + Sync {
    fn kind(&self) -> ArtifactKind;

    /// Syntactic preconditions checked before any process is started
    fn check_source(&self, source: &str, contract_name: Option<&str>) -> Result<SourceCheck>;

    /// Probes every required binary, failing with the first missing component
    async fn check_available(&self) -> Result<Vec<ToolVersion>>;

    /// Writes the build manifest and source into the sandbox
    fn materialize(&self, dir: &Path, contract_name: &str, source: &str) -> Result<()>;

    /// Runs the build and returns the path of the compiled binary
    async fn build(&self, dir: &Path, contract_name: &str, timeout: Duration) -> Result<PathBuf>;

    /// Extracts the ABI with a second, separate invocation
    async fn inspect(&self, dir: &Path, contract_name: &str, binary: &Path) -> Result<Value>;
}

/// Runs a command to completion, treating timeouts and nonzero exits as build failures
pub(crate) async fn run_command(
    mut cmd: Command,
    timeout: Duration,
    description: &str,
) -> Result<Output> {
    cmd.kill_on_drop(true);
    tracing::debug!("Running {}: {:?}", description, cmd.as_std());

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Err(_) => {
            return Err(Error::BuildFailure(format!(
                "{description} timed out after {}s",
                timeout.as_secs()
            )))
        }
        Ok(Err(e)) => {
            return Err(Error::BuildFailure(format!(
                "Failed to execute {description}: {e}"
            )))
        }
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::BuildFailure(format!(
            "{description} exited with code {:?}: {}",
            output.status.code(),
            stderr.trim()
        )));
    }

    Ok(output)
}

/// Runs `<program> <args>` and returns the first line of its output
pub(crate) async fn probe_version(component: &str, program: &Path, args: &[&str]) -> Result<String> {
    let mut cmd = Command::new(program);
    cmd.args(args);

    let unavailable = |reason: String| Error::ToolchainUnavailable {
        component: component.to_string(),
        reason,
    };

    let output = run_command(cmd, VERSION_PROBE_TIMEOUT, component)
        .await
        .map_err(|e| unavailable(e.to_string()))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let version = stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| unavailable("empty version output".to_string()))?;

    tracing::debug!("{} version: {}", component, version);
    Ok(version.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let err = probe_version(
            "solc",
            Path::new("/nonexistent/chainsmith-solc"),
            &["--version"],
        )
        .await
        .unwrap_err();

        match err {
            Error::ToolchainUnavailable { component, .. } => assert_eq!(component, "solc"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_build_failure() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let err = run_command(cmd, Duration::from_millis(50), "sleep")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BuildFailure(ref m) if m.contains("timed out")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_build_failure() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo broken >&2; exit 3"]);
        let err = run_command(cmd, Duration::from_secs(5), "sh")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BuildFailure(ref m) if m.contains("broken")));
    }
}
