use std::fmt;
use std::path::PathBuf;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{RunError, ValidationError};

/// Hex digits of random suffix appended to the creation timestamp.
const RUN_ID_SUFFIX_LEN: usize = 16;
/// Milliseconds are zero-padded so lexical order matches creation order.
const RUN_ID_MILLIS_WIDTH: usize = 13;

/// Time-ordered run identifier: `<unix millis, 13 digits>-<16 hex digits>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    #[must_use]
    pub fn generate() -> Self {
        Self::from_parts(super::now_ms(), rand::thread_rng().r#gen::<u64>())
    }

    #[must_use]
    pub fn from_parts(created_at_ms: u64, suffix: u64) -> Self {
        Self(format!(
            "{:0width$}-{:0suffix$x}",
            created_at_ms,
            suffix,
            width = RUN_ID_MILLIS_WIDTH,
            suffix = RUN_ID_SUFFIX_LEN
        ))
    }

    /// Parses an externally supplied id, rejecting anything that could escape
    /// the workspace root.
    ///
    /// # Errors
    ///
    /// Returns an error when the value is not `<digits>-<hex>`.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidRunId {
            value: value.to_owned(),
        };
        let (millis, suffix) = value.split_once('-').ok_or_else(invalid)?;
        if millis.is_empty()
            || suffix.is_empty()
            || !millis.chars().all(|ch| ch.is_ascii_digit())
            || !suffix.chars().all(|ch| ch.is_ascii_hexdigit())
        {
            return Err(invalid());
        }
        Ok(Self(value.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creation time embedded in the id, in unix milliseconds.
    #[must_use]
    pub fn created_at_ms(&self) -> Option<u64> {
        self.0
            .split_once('-')
            .and_then(|(millis, _)| millis.parse::<u64>().ok())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One `{agentHost, agentPort}` pair designating a distributed execution node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTarget {
    #[serde(default)]
    pub agent_host: String,
    #[serde(default)]
    pub agent_port: String,
}

/// Inbound load-test request. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub body_data: String,
    #[serde(default = "default_one")]
    pub threads: u32,
    #[serde(default)]
    pub ramp_time: u32,
    #[serde(default = "default_one")]
    pub loop_count: u32,
    #[serde(default)]
    pub scheduled: bool,
    #[serde(default)]
    pub infinite: bool,
    /// Run duration in seconds, only meaningful for scheduled runs.
    #[serde(default)]
    pub duration: u32,
    #[serde(default)]
    pub agents: Vec<AgentTarget>,
}

fn default_protocol() -> String {
    "http".to_owned()
}

const fn default_one() -> u32 {
    1
}

impl RunRequest {
    #[must_use]
    pub fn is_distributed(&self) -> bool {
        !self.agents.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Created,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RunStatus::Created => "created",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    const fn can_move_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (RunStatus::Created, RunStatus::Running)
                | (RunStatus::Created, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Succeeded)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Synchronous,
    Detached,
}

/// Persisted state of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: RunId,
    pub status: RunStatus,
    pub mode: ExecutionMode,
    pub workspace: PathBuf,
    pub report_dir: PathBuf,
    pub result_file: PathBuf,
    pub output_log: PathBuf,
    #[serde(default)]
    pub remote_hosts: Vec<String>,
    pub created_at_ms: u64,
    #[serde(default)]
    pub started_at_ms: Option<u64>,
    #[serde(default)]
    pub finished_at_ms: Option<u64>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Captured generator output kept as diagnostic payload for failed runs.
    #[serde(default)]
    pub diagnostic: Option<String>,
}

impl RunRecord {
    fn transition(&mut self, next: RunStatus) -> Result<(), RunError> {
        if !self.status.can_move_to(next) {
            return Err(RunError::IllegalTransition {
                run_id: self.id.to_string(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error unless the run is `Created`.
    pub fn mark_running(&mut self, now_ms: u64) -> Result<(), RunError> {
        self.transition(RunStatus::Running)?;
        self.started_at_ms = Some(now_ms);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error unless the run is `Running`.
    pub fn mark_succeeded(&mut self, now_ms: u64, exit_code: Option<i32>) -> Result<(), RunError> {
        self.transition(RunStatus::Succeeded)?;
        self.finished_at_ms = Some(now_ms);
        self.exit_code = exit_code;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error when the run already reached a terminal status.
    pub fn mark_failed(
        &mut self,
        now_ms: u64,
        exit_code: Option<i32>,
        diagnostic: String,
    ) -> Result<(), RunError> {
        self.transition(RunStatus::Failed)?;
        self.finished_at_ms = Some(now_ms);
        self.exit_code = exit_code;
        self.diagnostic = Some(diagnostic);
        Ok(())
    }
}
