use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::AgentHost;

use super::{CommandOutput, CommandRunner, ScriptInvocation, describe_status};

/// Runs scripts with `bash` on this machine; the host only labels logs.
#[derive(Debug, Clone, Default)]
pub struct LocalShell;

impl LocalShell {
    fn command(invocation: &ScriptInvocation) -> Command {
        let mut command = Command::new("bash");
        command
            .arg(&invocation.script)
            .envs(invocation.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null());
        command
    }
}

#[async_trait]
impl CommandRunner for LocalShell {
    async fn run(
        &self,
        host: &AgentHost,
        invocation: &ScriptInvocation,
    ) -> std::io::Result<CommandOutput> {
        debug!(
            host = %host.hostname,
            script = %invocation.script.display(),
            "Running local script"
        );
        let output = Self::command(invocation).output().await?;
        Ok(CommandOutput::from_process(&output))
    }

    async fn dispatch(
        &self,
        host: &AgentHost,
        invocation: &ScriptInvocation,
    ) -> std::io::Result<()> {
        let mut child = Self::command(invocation)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let hostname = host.hostname.clone();
        let script = invocation.script.display().to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    debug!(host = %hostname, script = %script, "Dispatched script finished");
                }
                Ok(status) => warn!(
                    host = %hostname,
                    script = %script,
                    status = %describe_status(status),
                    "Dispatched script failed"
                ),
                Err(err) => warn!(host = %hostname, script = %script, "Dispatched script lost: {}", err),
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn host() -> AgentHost {
        AgentHost {
            hostname: "localhost".to_owned(),
            username: "tester".to_owned(),
            ssh_key: None,
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_passes_environment_and_captures_output() -> Result<(), String> {
        let dir = tempfile::tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
        let script = dir.path().join("echo.sh");
        let mut file =
            std::fs::File::create(&script).map_err(|err| format!("create failed: {}", err))?;
        writeln!(file, "echo \"port=$TCP_PORT\"\necho oops >&2\nexit 3")
            .map_err(|err| format!("write failed: {}", err))?;

        let invocation = ScriptInvocation::new(script).env("TCP_PORT", "4444");
        let output = LocalShell
            .run(&host(), &invocation)
            .await
            .map_err(|err| format!("run failed: {}", err))?;
        if output.success || output.status != "exit code 3" {
            return Err(format!("Unexpected status: {:?}", output));
        }
        if output.output != "port=4444\noops" {
            return Err(format!("Unexpected output: {:?}", output.output));
        }
        Ok(())
    }
}
