//! Script execution transports used by the agent lifecycle scripts.
mod local;
mod ssh;

use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;

use crate::domain::AgentHost;

pub use local::LocalShell;
pub use ssh::SshShell;

/// A shell script plus the environment it expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInvocation {
    pub script: PathBuf,
    pub env: Vec<(String, String)>,
}

impl ScriptInvocation {
    #[must_use]
    pub fn new(script: PathBuf) -> Self {
        Self {
            script,
            env: Vec::new(),
        }
    }

    #[must_use]
    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_owned(), value.into()));
        self
    }
}

/// Exit status and combined stdout/stderr of a finished script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub status: String,
    pub output: String,
}

impl CommandOutput {
    pub(crate) fn from_process(output: &Output) -> Self {
        Self {
            success: output.status.success(),
            status: describe_status(output.status),
            output: combine_output(&output.stdout, &output.stderr),
        }
    }
}

pub(crate) fn describe_status(status: std::process::ExitStatus) -> String {
    status
        .code()
        .map_or_else(|| "terminated by signal".to_owned(), |code| format!("exit code {}", code))
}

/// Stdout followed by stderr, lossily decoded and trimmed.
pub(crate) fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut combined = String::from_utf8_lossy(stdout).into_owned();
    let stderr = String::from_utf8_lossy(stderr);
    if !stderr.trim().is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&stderr);
    }
    combined.trim().to_owned()
}

/// Runs lifecycle scripts against a host.
///
/// `run` blocks until the script exits; `dispatch` returns as soon as the
/// script has been handed to the transport and never observes its exit.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the transport cannot start or talk to the process.
    async fn run(
        &self,
        host: &AgentHost,
        invocation: &ScriptInvocation,
    ) -> std::io::Result<CommandOutput>;

    /// # Errors
    ///
    /// Returns an error when the process cannot be started.
    async fn dispatch(&self, host: &AgentHost, invocation: &ScriptInvocation)
    -> std::io::Result<()>;
}

/// Quotes a value for a POSIX shell command line.
pub(crate) fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':' | '='))
    {
        return value.to_owned();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_escapes_single_quotes() -> Result<(), String> {
        let cases = [
            ("/opt/perfmon-agent", "/opt/perfmon-agent"),
            ("", "''"),
            ("--auto-shutdown", "--auto-shutdown"),
            ("a b", "'a b'"),
            ("it's", r"'it'\''s'"),
        ];
        for (input, expected) in cases {
            let quoted = shell_quote(input);
            if quoted != expected {
                return Err(format!("{} quoted as {}", input, quoted));
            }
        }
        Ok(())
    }

    #[test]
    fn combine_output_appends_stderr() -> Result<(), String> {
        let combined = combine_output(b"started\n", b"warning: slow\n");
        if combined != "started\nwarning: slow" {
            return Err(format!("Unexpected output: {:?}", combined));
        }
        if combine_output(b"only\n", b"  \n") != "only" {
            return Err("Blank stderr should be dropped".to_owned());
        }
        Ok(())
    }
}
