//! Shell dispatch over `tokio::process` with timeout enforcement and
//! output capture.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use wizard_core::{CommandError, CommandOutcome, CommandRequest, CommandRunner};

/// Runs commands through a shell (`sh -c` unless the request names
/// another shell). The child is isolated with kill-on-drop so an aborted
/// run does not leave strays behind.
#[derive(Debug, Clone, Default)]
pub struct ShellCommandRunner;

impl ShellCommandRunner {
    pub fn new() -> Self {
        Self
    }

    fn build_command(request: &CommandRequest) -> Command {
        let shell = request.shell.as_deref().unwrap_or("sh");
        let mut command = Command::new(shell);
        command.arg("-c").arg(&request.command);
        if let Some(cwd) = &request.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &request.env {
            command.env(key, value);
        }
        command.stdin(std::process::Stdio::null());
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::piped());
        command.kill_on_drop(true);
        command
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, request: &CommandRequest) -> Result<CommandOutcome, CommandError> {
        let mut command = Self::build_command(request);
        let started = Instant::now();

        let child = command.spawn().map_err(|err| CommandError::Spawn {
            command: request.command.clone(),
            message: err.to_string(),
        })?;

        debug!(command = %request.command, "spawned command");

        let waited = match request.timeout_ms {
            Some(timeout_ms) => {
                match tokio::time::timeout(
                    Duration::from_millis(timeout_ms),
                    child.wait_with_output(),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        // The child is dropped by the timeout branch;
                        // kill_on_drop reaps it.
                        warn!(
                            command = %request.command,
                            timeout_ms,
                            "command timed out"
                        );
                        return Ok(CommandOutcome {
                            exit_code: None,
                            success: false,
                            stdout: String::new(),
                            stderr: String::new(),
                            duration_ms: started.elapsed().as_millis() as u64,
                            timed_out: true,
                        });
                    }
                }
            }
            None => child.wait_with_output().await,
        };

        let output = waited.map_err(|err| CommandError::Io(err.to_string()))?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let stdout = if request.capture_stdout {
            String::from_utf8_lossy(&output.stdout).into_owned()
        } else {
            String::new()
        };
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        Ok(CommandOutcome {
            exit_code: output.status.code(),
            success: output.status.success(),
            stdout,
            stderr,
            duration_ms,
            timed_out: false,
        })
    }
}
