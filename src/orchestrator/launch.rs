use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::ExecutionMode;
use crate::error::RunError;
use crate::exec::{combine_output, describe_status};

use super::compile::CommandLine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Synchronous run that ran to completion.
    Exited {
        success: bool,
        exit_code: Option<i32>,
        status: String,
        output: String,
    },
    /// Synchronous run killed after exceeding the configured timeout.
    TimedOut { timeout: Duration },
    /// Detached run; the child's exit is never observed here.
    Detached { pid: Option<u32> },
}

/// Spawns the load generator and supervises it according to the run mode.
#[derive(Debug, Clone, Default)]
pub struct Launcher {
    timeout: Option<Duration>,
}

impl Launcher {
    #[must_use]
    pub const fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Starts `command`. Generator output always ends up in `output_log`.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Launch`] when the process cannot be spawned, and an
    /// I/O error when the output log cannot be written or the wait fails.
    pub async fn launch(
        &self,
        command: &CommandLine,
        mode: ExecutionMode,
        output_log: &Path,
    ) -> Result<ExecutionOutcome, RunError> {
        match mode {
            ExecutionMode::Synchronous => self.run_to_completion(command, output_log).await,
            ExecutionMode::Detached => spawn_detached(command, output_log).await,
        }
    }

    async fn run_to_completion(
        &self,
        command: &CommandLine,
        output_log: &Path,
    ) -> Result<ExecutionOutcome, RunError> {
        let program = command.program.display().to_string();
        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunError::Launch {
                program: program.clone(),
                source,
            })?;
        debug!(program = %program, pid = ?child.id(), "Generator started");

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(waited) => waited,
                Err(_elapsed) => {
                    // Dropping the wait future drops the child, which kills it.
                    warn!(program = %program, timeout = ?limit, "Generator timed out");
                    write_log(
                        output_log,
                        format!("killed after exceeding timeout of {:?}\n", limit),
                    )
                    .await?;
                    return Ok(ExecutionOutcome::TimedOut { timeout: limit });
                }
            },
            None => child.wait_with_output().await,
        };
        let output = waited.map_err(|source| RunError::Wait {
            program: program.clone(),
            source,
        })?;

        let combined = combine_output(&output.stdout, &output.stderr);
        write_log(output_log, combined.clone()).await?;
        Ok(ExecutionOutcome::Exited {
            success: output.status.success(),
            exit_code: output.status.code(),
            status: describe_status(output.status),
            output: combined,
        })
    }
}

async fn write_log(path: &Path, body: String) -> Result<(), RunError> {
    tokio::fs::write(path, body)
        .await
        .map_err(|source| RunError::OpenOutputLog {
            path: path.to_path_buf(),
            source,
        })
}

async fn spawn_detached(
    command: &CommandLine,
    output_log: &Path,
) -> Result<ExecutionOutcome, RunError> {
    let open_error = |source| RunError::OpenOutputLog {
        path: output_log.to_path_buf(),
        source,
    };
    let stdout = tokio::fs::File::create(output_log)
        .await
        .map_err(open_error)?
        .into_std()
        .await;
    let stderr = stdout.try_clone().map_err(open_error)?;

    let program = command.program.display().to_string();
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .spawn()
        .map_err(|source| RunError::Launch {
            program: program.clone(),
            source,
        })?;
    let pid = child.id();
    debug!(program = %program, pid = ?pid, "Generator detached");
    // Reap the child so it does not linger as a zombie; its status is not
    // reported anywhere.
    tokio::spawn(async move {
        if let Err(err) = child.wait().await {
            debug!("Detached generator wait failed: {}", err);
        }
    });
    Ok(ExecutionOutcome::Detached { pid })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh(script: &str) -> CommandLine {
        CommandLine {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_owned(), script.to_owned()],
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn synchronous_launch_captures_output_and_status() -> Result<(), String> {
        let dir = tempfile::tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
        let log = dir.path().join("out.log");
        let outcome = Launcher::default()
            .launch(
                &sh("echo sampling; echo broken >&2; exit 4"),
                ExecutionMode::Synchronous,
                &log,
            )
            .await
            .map_err(|err| format!("launch failed: {}", err))?;
        match outcome {
            ExecutionOutcome::Exited {
                success: false,
                exit_code: Some(4),
                ref output,
                ..
            } if output == "sampling\nbroken" => {}
            other => return Err(format!("Unexpected outcome: {:?}", other)),
        }
        let logged = tokio::fs::read_to_string(&log)
            .await
            .map_err(|err| format!("read log failed: {}", err))?;
        if logged != "sampling\nbroken" {
            return Err(format!("Unexpected log: {:?}", logged));
        }
        Ok(())
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_binary_is_a_launch_error() -> Result<(), String> {
        let dir = tempfile::tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
        let command = CommandLine {
            program: dir.path().join("no-such-generator"),
            args: Vec::new(),
        };
        for mode in [ExecutionMode::Synchronous, ExecutionMode::Detached] {
            match Launcher::default()
                .launch(&command, mode, &dir.path().join("out.log"))
                .await
            {
                Err(RunError::Launch { .. }) => {}
                other => return Err(format!("Expected launch error, got {:?}", other)),
            }
        }
        Ok(())
    }

    #[tokio::test(flavor = "current_thread")]
    async fn timeout_kills_the_generator() -> Result<(), String> {
        let dir = tempfile::tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
        let started = std::time::Instant::now();
        let outcome = Launcher::new(Some(Duration::from_millis(200)))
            .launch(
                &sh("sleep 5"),
                ExecutionMode::Synchronous,
                &dir.path().join("out.log"),
            )
            .await
            .map_err(|err| format!("launch failed: {}", err))?;
        if !matches!(outcome, ExecutionOutcome::TimedOut { .. }) {
            return Err(format!("Unexpected outcome: {:?}", outcome));
        }
        if started.elapsed() >= Duration::from_secs(4) {
            return Err("Timeout did not cut the run short".to_owned());
        }
        Ok(())
    }
}
