use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::domain::AgentHost;

use super::{CommandOutput, CommandRunner, ScriptInvocation, describe_status, shell_quote};

/// Pipes scripts into `bash -s` on the agent host over `ssh`.
#[derive(Debug, Clone)]
pub struct SshShell {
    port: u16,
    default_key: Option<PathBuf>,
}

impl SshShell {
    #[must_use]
    pub const fn new(port: u16, default_key: Option<PathBuf>) -> Self {
        Self { port, default_key }
    }

    pub(crate) fn args(&self, host: &AgentHost, invocation: &ScriptInvocation) -> Vec<String> {
        let mut args = vec![
            "-o".to_owned(),
            "BatchMode=yes".to_owned(),
            "-o".to_owned(),
            "StrictHostKeyChecking=accept-new".to_owned(),
        ];
        let key = host
            .ssh_key
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| self.default_key.clone());
        if let Some(key) = key {
            args.push("-i".to_owned());
            args.push(key.display().to_string());
        }
        args.push("-p".to_owned());
        args.push(self.port.to_string());
        args.push("--".to_owned());
        args.push(format!("{}@{}", host.username, host.hostname));
        args.push(remote_command(invocation));
        args
    }

    async fn start(
        &self,
        host: &AgentHost,
        invocation: &ScriptInvocation,
    ) -> std::io::Result<Child> {
        let body = tokio::fs::read(&invocation.script).await?;
        let mut child = Command::new("ssh")
            .args(self.args(host, invocation))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&body).await?;
            stdin.shutdown().await?;
        }
        Ok(child)
    }
}

fn remote_command(invocation: &ScriptInvocation) -> String {
    let mut command = String::new();
    for (key, value) in &invocation.env {
        command.push_str(key);
        command.push('=');
        command.push_str(&shell_quote(value));
        command.push(' ');
    }
    command.push_str("bash -s");
    command
}

#[async_trait]
impl CommandRunner for SshShell {
    async fn run(
        &self,
        host: &AgentHost,
        invocation: &ScriptInvocation,
    ) -> std::io::Result<CommandOutput> {
        debug!(
            host = %host.hostname,
            user = %host.username,
            script = %invocation.script.display(),
            "Running remote script"
        );
        let output = self.start(host, invocation).await?.wait_with_output().await?;
        Ok(CommandOutput::from_process(&output))
    }

    async fn dispatch(
        &self,
        host: &AgentHost,
        invocation: &ScriptInvocation,
    ) -> std::io::Result<()> {
        let child = self.start(host, invocation).await?;
        let hostname = host.hostname.clone();
        tokio::spawn(async move {
            match child.wait_with_output().await {
                Ok(output) if output.status.success() => {
                    debug!(host = %hostname, "Dispatched remote script finished");
                }
                Ok(output) => warn!(
                    host = %hostname,
                    status = %describe_status(output.status),
                    "Dispatched remote script failed"
                ),
                Err(err) => warn!(host = %hostname, "Dispatched remote script lost: {}", err),
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_args_carry_key_port_and_environment() -> Result<(), String> {
        let shell = SshShell::new(2222, Some(PathBuf::from("/keys/default")));
        let host = AgentHost {
            hostname: "10.0.0.7".to_owned(),
            username: "ubuntu".to_owned(),
            ssh_key: Some("/keys/agent".to_owned()),
        };
        let invocation = ScriptInvocation::new(PathBuf::from("script/start-server-agent.sh"))
            .env("AGENT_WORK_DIR", "/opt/perfmon-agent")
            .env("AUTO_SHUTDOWN", "");
        let args = shell.args(&host, &invocation);
        let expected = [
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=accept-new",
            "-i",
            "/keys/agent",
            "-p",
            "2222",
            "--",
            "ubuntu@10.0.0.7",
            "AGENT_WORK_DIR=/opt/perfmon-agent AUTO_SHUTDOWN='' bash -s",
        ];
        if args != expected {
            return Err(format!("Unexpected ssh args: {:?}", args));
        }
        Ok(())
    }

    #[test]
    fn destination_is_never_read_as_an_option() -> Result<(), String> {
        let shell = SshShell::new(22, None);
        let host = AgentHost {
            hostname: "10.255.255.1".to_owned(),
            username: "-oProxyCommand=touch /tmp/x".to_owned(),
            ssh_key: None,
        };
        let args = shell.args(&host, &ScriptInvocation::new(PathBuf::from("s.sh")));
        let separator = args
            .iter()
            .position(|arg| arg == "--")
            .ok_or_else(|| format!("Missing separator: {:?}", args))?;
        let destination = args
            .iter()
            .position(|arg| arg.starts_with("-oProxyCommand"))
            .ok_or_else(|| format!("Missing destination: {:?}", args))?;
        if destination != separator.saturating_add(1) {
            return Err(format!("Destination not after separator: {:?}", args));
        }
        Ok(())
    }
}
