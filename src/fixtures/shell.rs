use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::FixtureError;

/// Something that can execute a rendered fixture script.
#[async_trait]
pub trait ShellRunner: Send + Sync {
    async fn run(&self, script: &str) -> Result<(), FixtureError>;
}

/// Runs scripts through `mongosh --nodb --quiet --eval`. The script opens
/// its own connections.
#[derive(Debug, Clone)]
pub struct MongoShell {
    pub binary: PathBuf,
}

impl MongoShell {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, script: &str) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(["--nodb", "--quiet", "--eval", script]);
        command
    }
}

impl Default for MongoShell {
    fn default() -> Self {
        Self::new("mongosh")
    }
}

#[async_trait]
impl ShellRunner for MongoShell {
    #[instrument(skip_all, fields(shell = %self.binary.display()))]
    async fn run(&self, script: &str) -> Result<(), FixtureError> {
        let shell = self.binary.display().to_string();
        let output = self
            .command(script)
            .output()
            .await
            .map_err(|source| FixtureError::Spawn {
                shell: shell.clone(),
                source,
            })?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!(target: "evergreen_tools::fixtures::shell::stdout", "{line}");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(status = %output.status, "shell script failed");
            return Err(FixtureError::ShellFailed {
                shell,
                status: output.status.to_string(),
                stderr,
            });
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// A stand-in shell that writes its arguments to a file and exits with
    /// the given status.
    fn fake_shell(dir: &TempDir, exit_code: i32) -> PathBuf {
        let path = dir.path().join("fake-mongosh");
        let log = dir.path().join("args.log");
        let body = format!(
            "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{}'\necho 'boom' >&2\nexit {exit_code}\n",
            log.display()
        );
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_passes_script_to_eval() {
        let dir = TempDir::new().unwrap();
        let shell = MongoShell::new(fake_shell(&dir, 0));

        shell.run("print(1);").await.unwrap();

        let args = std::fs::read_to_string(dir.path().join("args.log")).unwrap();
        let args: Vec<&str> = args.lines().collect();
        assert_eq!(args, vec!["--nodb", "--quiet", "--eval", "print(1);"]);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let dir = TempDir::new().unwrap();
        let shell = MongoShell::new(fake_shell(&dir, 3));

        let err = shell.run("print(1);").await.unwrap_err();
        match err {
            FixtureError::ShellFailed { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let shell = MongoShell::new("/nonexistent/mongosh");
        assert!(matches!(
            shell.run("print(1);").await,
            Err(FixtureError::Spawn { .. })
        ));
    }
}
