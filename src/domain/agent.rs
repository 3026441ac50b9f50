use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use url::Host;

use crate::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self(format!(
            "agent-{:016x}{:08x}",
            rng.r#gen::<u64>(),
            rng.r#gen::<u32>()
        ))
    }

    /// # Errors
    ///
    /// Returns an error when the value is empty or contains characters outside
    /// `[A-Za-z0-9_-]`.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let trimmed = value.trim();
        if trimmed.is_empty()
            || !trimmed
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        {
            return Err(ValidationError::InvalidAgentId {
                value: value.to_owned(),
            });
        }
        Ok(Self(trimmed.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    NotInstalled,
    Installed,
    Running,
}

impl AgentState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            AgentState::NotInstalled => "not installed",
            AgentState::Installed => "installed",
            AgentState::Running => "running",
        }
    }

    /// Outcome of `operation` from this state, or `None` when it is illegal.
    #[must_use]
    pub const fn next(self, operation: AgentOperation) -> Option<Transition> {
        match (self, operation) {
            (AgentState::NotInstalled, AgentOperation::Install) => {
                Some(Transition::To(AgentState::Installed))
            }
            (AgentState::Installed, AgentOperation::Start) => {
                Some(Transition::To(AgentState::Running))
            }
            (AgentState::Running, AgentOperation::Stop) => {
                Some(Transition::To(AgentState::Installed))
            }
            (AgentState::Installed, AgentOperation::Remove) => Some(Transition::Deleted),
            (
                AgentState::NotInstalled,
                AgentOperation::Start | AgentOperation::Stop | AgentOperation::Remove,
            )
            | (
                AgentState::Installed,
                AgentOperation::Install | AgentOperation::Stop,
            )
            | (
                AgentState::Running,
                AgentOperation::Install | AgentOperation::Start | AgentOperation::Remove,
            ) => None,
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    To(AgentState),
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentOperation {
    Install,
    Start,
    Stop,
    Remove,
}

impl AgentOperation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            AgentOperation::Install => "install",
            AgentOperation::Start => "start",
            AgentOperation::Stop => "stop",
            AgentOperation::Remove => "remove",
        }
    }
}

impl fmt::Display for AgentOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to install the monitoring agent on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInstallRequest {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub username: String,
    /// Start the agent with `--auto-shutdown`.
    #[serde(default)]
    pub shutdown: bool,
    #[serde(default)]
    pub ssh_key: Option<String>,
}

impl AgentInstallRequest {
    /// # Errors
    ///
    /// Returns an error when hostname or username is blank, or when either
    /// could be read by `ssh` as something other than a destination.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.hostname.trim().is_empty() {
            return Err(ValidationError::AgentHostnameMissing);
        }
        if self.username.trim().is_empty() {
            return Err(ValidationError::AgentUsernameMissing);
        }
        if !is_plain_host(&self.hostname) {
            return Err(ValidationError::AgentHostnameInvalid {
                value: self.hostname.clone(),
            });
        }
        if !is_login_name(&self.username) {
            return Err(ValidationError::AgentUsernameInvalid {
                value: self.username.clone(),
            });
        }
        Ok(())
    }
}

/// A single hostname or IP literal. Anything that would split or extend a
/// `-R` entry or an `ssh` destination is refused.
#[must_use]
pub fn is_plain_host(host: &str) -> bool {
    !host.starts_with('-')
        && !host.starts_with('[')
        && !host
            .chars()
            .any(|ch| ch.is_whitespace() || matches!(ch, ',' | '@' | '%'))
        && Host::parse(host).is_ok()
}

fn is_login_name(user: &str) -> bool {
    !user.starts_with('-')
        && user
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'))
}

/// Where remote scripts are executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentHost {
    pub hostname: String,
    pub username: String,
    #[serde(default)]
    pub ssh_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub id: AgentId,
    pub host: AgentHost,
    pub control_port: u16,
    pub auto_shutdown: bool,
    pub state: AgentState,
    pub installed_at_ms: u64,
    pub updated_at_ms: u64,
}
