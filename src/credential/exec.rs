//! Command-backed credentials
//!
//! A credential helper prints the secret on stdout and exits 0. Exit code 2
//! means "no credential available" and maps to `NotFound`. Writes invoke the
//! same command with `--write` prepended and the value on stdin.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::CredentialError;
use crate::types::ExecCommand;

/// Exit code a helper uses to say it has no credential
pub const EXIT_NOT_FOUND: i32 = 2;

/// Flag prepended to the arguments when writing
pub const WRITE_FLAG: &str = "--write";

/// Run the helper and return its trimmed stdout.
pub(crate) async fn read(cmd: &ExecCommand) -> Result<String, CredentialError> {
    let output = run(cmd, None).await?;
    match output.status.code() {
        Some(0) => {
            let stdout = String::from_utf8(output.stdout).map_err(|_| {
                CredentialError::Invalid(format!(
                    "command {} printed non UTF-8 output",
                    cmd.command
                ))
            })?;
            Ok(stdout.trim().to_string())
        }
        Some(EXIT_NOT_FOUND) => Err(CredentialError::NotFound(format!("command {}", cmd.command))),
        _ => Err(failure(cmd, &output)),
    }
}

/// Run the helper in write mode with `value` on stdin.
pub(crate) async fn write(cmd: &ExecCommand, value: &str) -> Result<(), CredentialError> {
    let output = run(cmd, Some(value)).await?;
    if output.status.success() {
        Ok(())
    } else {
        Err(failure(cmd, &output))
    }
}

async fn run(
    cmd: &ExecCommand,
    stdin_value: Option<&str>,
) -> Result<std::process::Output, CredentialError> {
    let program = which::which(&cmd.command)
        .map_err(|e| CredentialError::exec(&cmd.command, format!("cannot locate command: {e}")))?;

    let mut command = Command::new(&program);
    if stdin_value.is_some() {
        command.arg(WRITE_FLAG);
    }
    command
        .args(&cmd.args)
        .envs(&cmd.env)
        .stdin(if stdin_value.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!(
        command = %program.display(),
        write = stdin_value.is_some(),
        "Running credential helper"
    );

    let mut child = command
        .spawn()
        .map_err(|e| CredentialError::exec(&cmd.command, format!("failed to start: {e}")))?;

    if let Some(value) = stdin_value {
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(value.as_bytes())
                .await
                .map_err(|e| {
                    CredentialError::exec(&cmd.command, format!("failed to write stdin: {e}"))
                })?;
            // Dropping stdin closes the pipe so the helper sees EOF
        }
    }

    let timeout = cmd.timeout();
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(CredentialError::exec(&cmd.command, e.to_string())),
        // The child was dropped with the future and is killed
        Err(_) => Err(CredentialError::Timeout {
            command: cmd.command.clone(),
            after: timeout,
        }),
    }
}

fn failure(cmd: &ExecCommand, output: &std::process::Output) -> CredentialError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    let status = output
        .status
        .code()
        .map_or_else(|| "a signal".to_string(), |code| format!("status {code}"));

    if stderr.is_empty() {
        CredentialError::exec(&cmd.command, format!("exited with {status}"))
    } else {
        CredentialError::exec(&cmd.command, format!("exited with {status}: {stderr}"))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    fn script(dir: &Path, name: &str, body: &str) -> ExecCommand {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        ExecCommand::new(path.to_str().unwrap())
    }

    #[tokio::test]
    async fn test_read_trims_stdout() {
        let dir = TempDir::new().unwrap();
        let cmd = script(dir.path(), "helper", "printf '  secret-value \\n'");

        assert_eq!(read(&cmd).await.unwrap(), "secret-value");
    }

    #[tokio::test]
    async fn test_exit_two_is_not_found() {
        let dir = TempDir::new().unwrap();
        let cmd = script(dir.path(), "helper", "exit 2");

        let err = read(&cmd).await.unwrap_err();
        assert!(err.is_not_found(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_other_exit_is_failure() {
        let dir = TempDir::new().unwrap();
        let cmd = script(dir.path(), "helper", "echo boom >&2; exit 1");

        let err = read(&cmd).await.unwrap_err();
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("boom"), "got {err}");
    }

    #[tokio::test]
    async fn test_args_and_env_are_passed() {
        let dir = TempDir::new().unwrap();
        let mut cmd = script(dir.path(), "helper", "printf '%s-%s' \"$1\" \"$HELPER_SUFFIX\"");
        cmd.args.push("first".to_string());
        cmd.env.insert("HELPER_SUFFIX".to_string(), "suffix".to_string());

        assert_eq!(read(&cmd).await.unwrap(), "first-suffix");
    }

    #[tokio::test]
    async fn test_write_prepends_flag_and_feeds_stdin() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("store");
        let body = format!(
            r#"if [ "$1" = "--write" ]; then
    cat > '{0}'
else
    cat '{0}' 2>/dev/null || exit 2
fi"#,
            store.display()
        );
        let cmd = script(dir.path(), "helper", &body);

        assert!(read(&cmd).await.unwrap_err().is_not_found());
        write(&cmd, "stored").await.unwrap();
        assert_eq!(read(&cmd).await.unwrap(), "stored");
    }

    #[tokio::test]
    async fn test_timeout_kills_helper() {
        let dir = TempDir::new().unwrap();
        let mut cmd = script(dir.path(), "helper", "sleep 30");
        cmd.timeout = Some(1);

        let start = std::time::Instant::now();
        let err = read(&cmd).await.unwrap_err();
        assert!(matches!(err, CredentialError::Timeout { .. }), "got {err:?}");
        assert!(start.elapsed() < std::time::Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_command_is_failure() {
        let cmd = ExecCommand::new("api-credentials-no-such-helper");

        let err = read(&cmd).await.unwrap_err();
        assert!(matches!(err, CredentialError::Exec { .. }), "got {err:?}");
    }
}
