use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::domain::{AgentHost, AgentOperation};
use crate::error::AgentError;
use crate::exec::{CommandRunner, ScriptInvocation};

pub const INSTALL_SCRIPT: &str = "install-server-agent.sh";
pub const START_SCRIPT: &str = "start-server-agent.sh";
pub const STOP_SCRIPT: &str = "stop-server-agent.sh";
pub const REMOVE_SCRIPT: &str = "remove-server-agent.sh";
pub const AUTO_SHUTDOWN_FLAG: &str = "--auto-shutdown";

/// Remote capabilities the lifecycle manager drives. Implementations only
/// report success or failure; state bookkeeping stays with the manager.
#[async_trait]
pub trait AgentControl: Send + Sync {
    /// # Errors
    ///
    /// Returns [`AgentError::Remote`] or [`AgentError::Transport`].
    async fn install_on(&self, host: &AgentHost) -> Result<(), AgentError>;

    /// Dispatches the start procedure without waiting for the agent to listen.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Transport`] when the dispatch itself fails.
    async fn start_on(
        &self,
        host: &AgentHost,
        control_port: u16,
        auto_shutdown: bool,
    ) -> Result<(), AgentError>;

    /// # Errors
    ///
    /// Returns [`AgentError::Remote`] or [`AgentError::Transport`].
    async fn stop_on(&self, host: &AgentHost, control_port: u16) -> Result<(), AgentError>;

    /// # Errors
    ///
    /// Returns [`AgentError::Remote`] or [`AgentError::Transport`].
    async fn remove_on(&self, host: &AgentHost) -> Result<(), AgentError>;
}

/// Where the lifecycle scripts live and which directory the agent owns on
/// the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentScripts {
    pub script_dir: PathBuf,
    pub work_dir: String,
}

/// [`AgentControl`] backed by the four `*-server-agent.sh` scripts.
pub struct ScriptAgentControl {
    runner: Arc<dyn CommandRunner>,
    scripts: AgentScripts,
}

impl std::fmt::Debug for ScriptAgentControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptAgentControl")
            .field("scripts", &self.scripts)
            .finish_non_exhaustive()
    }
}

impl ScriptAgentControl {
    #[must_use]
    pub const fn new(runner: Arc<dyn CommandRunner>, scripts: AgentScripts) -> Self {
        Self { runner, scripts }
    }

    fn invocation(&self, script: &str) -> ScriptInvocation {
        ScriptInvocation::new(self.scripts.script_dir.join(script))
            .env("AGENT_WORK_DIR", self.scripts.work_dir.clone())
    }

    async fn run(
        &self,
        operation: AgentOperation,
        host: &AgentHost,
        invocation: &ScriptInvocation,
    ) -> Result<(), AgentError> {
        let output = self
            .runner
            .run(host, invocation)
            .await
            .map_err(|source| AgentError::Transport {
                operation,
                host: host.hostname.clone(),
                source,
            })?;
        if !output.success {
            return Err(AgentError::Remote {
                operation,
                host: host.hostname.clone(),
                status: output.status,
                output: output.output,
            });
        }
        info!(host = %host.hostname, operation = %operation, "Agent script succeeded");
        Ok(())
    }
}

#[async_trait]
impl AgentControl for ScriptAgentControl {
    async fn install_on(&self, host: &AgentHost) -> Result<(), AgentError> {
        let invocation = self.invocation(INSTALL_SCRIPT);
        self.run(AgentOperation::Install, host, &invocation).await
    }

    async fn start_on(
        &self,
        host: &AgentHost,
        control_port: u16,
        auto_shutdown: bool,
    ) -> Result<(), AgentError> {
        let invocation = self
            .invocation(START_SCRIPT)
            .env("TCP_PORT", control_port.to_string())
            .env(
                "AUTO_SHUTDOWN",
                if auto_shutdown { AUTO_SHUTDOWN_FLAG } else { "" },
            );
        self.runner
            .dispatch(host, &invocation)
            .await
            .map_err(|source| AgentError::Transport {
                operation: AgentOperation::Start,
                host: host.hostname.clone(),
                source,
            })?;
        info!(host = %host.hostname, port = control_port, "Agent start dispatched");
        Ok(())
    }

    async fn stop_on(&self, host: &AgentHost, control_port: u16) -> Result<(), AgentError> {
        let invocation = self
            .invocation(STOP_SCRIPT)
            .env("TCP_PORT", control_port.to_string());
        self.run(AgentOperation::Stop, host, &invocation).await
    }

    async fn remove_on(&self, host: &AgentHost) -> Result<(), AgentError> {
        let invocation = self.invocation(REMOVE_SCRIPT);
        self.run(AgentOperation::Remove, host, &invocation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use std::sync::{Mutex, PoisonError};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, ScriptInvocation)>>,
        fail_with: Option<i32>,
    }

    #[async_trait]
    impl CommandRunner for Recorder {
        async fn run(
            &self,
            _host: &AgentHost,
            invocation: &ScriptInvocation,
        ) -> std::io::Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(("run".to_owned(), invocation.clone()));
            Ok(match self.fail_with {
                Some(code) => CommandOutput {
                    success: false,
                    status: format!("exit code {}", code),
                    output: "permission denied".to_owned(),
                },
                None => CommandOutput {
                    success: true,
                    status: "exit code 0".to_owned(),
                    output: String::new(),
                },
            })
        }

        async fn dispatch(
            &self,
            _host: &AgentHost,
            invocation: &ScriptInvocation,
        ) -> std::io::Result<()> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(("dispatch".to_owned(), invocation.clone()));
            Ok(())
        }
    }

    fn scripts() -> AgentScripts {
        AgentScripts {
            script_dir: PathBuf::from("script"),
            work_dir: "/opt/perfmon-agent".to_owned(),
        }
    }

    fn host() -> AgentHost {
        AgentHost {
            hostname: "10.0.0.9".to_owned(),
            username: "ubuntu".to_owned(),
            ssh_key: None,
        }
    }

    fn env_pairs(invocation: &ScriptInvocation) -> Vec<(&str, &str)> {
        invocation
            .env
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect()
    }

    #[tokio::test(flavor = "current_thread")]
    async fn start_is_dispatched_with_port_and_shutdown_flag() -> Result<(), String> {
        let recorder = Arc::new(Recorder::default());
        let control = ScriptAgentControl::new(recorder.clone(), scripts());
        control
            .start_on(&host(), 4444, true)
            .await
            .map_err(|err| err.to_string())?;
        control
            .stop_on(&host(), 4444)
            .await
            .map_err(|err| err.to_string())?;

        let calls = recorder
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let [(start_kind, start), (stop_kind, stop)] = calls.as_slice() else {
            return Err(format!("Unexpected calls: {:?}", calls));
        };
        if start_kind != "dispatch" || stop_kind != "run" {
            return Err("Start must be dispatched, stop must run".to_owned());
        }
        if start.script != PathBuf::from("script/start-server-agent.sh") {
            return Err(format!("Unexpected script: {:?}", start.script));
        }
        if env_pairs(start)
            != [
                ("AGENT_WORK_DIR", "/opt/perfmon-agent"),
                ("TCP_PORT", "4444"),
                ("AUTO_SHUTDOWN", "--auto-shutdown"),
            ]
        {
            return Err(format!("Unexpected start env: {:?}", start.env));
        }
        if env_pairs(stop) != [("AGENT_WORK_DIR", "/opt/perfmon-agent"), ("TCP_PORT", "4444")] {
            return Err(format!("Unexpected stop env: {:?}", stop.env));
        }
        Ok(())
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failing_script_is_a_remote_error() -> Result<(), String> {
        let recorder = Arc::new(Recorder {
            fail_with: Some(2),
            ..Recorder::default()
        });
        let control = ScriptAgentControl::new(recorder, scripts());
        match control.install_on(&host()).await {
            Err(AgentError::Remote {
                operation: AgentOperation::Install,
                ref status,
                ..
            }) if status == "exit code 2" => Ok(()),
            other => Err(format!("Expected remote error, got {:?}", other)),
        }
    }
}
