//! Records and requests shared by the run orchestrator and the agent manager.
mod agent;
mod run;

pub use agent::{
    AgentHost, AgentId, AgentInstallRequest, AgentOperation, AgentRecord, AgentState, Transition,
    is_plain_host,
};
pub use run::{AgentTarget, ExecutionMode, RunId, RunRecord, RunRequest, RunStatus};

/// Wall-clock time in unix milliseconds.
#[must_use]
pub fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
