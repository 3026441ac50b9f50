use std::time::Duration;

use thiserror::Error;

use crate::domain::{AgentOperation, AgentState};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent '{agent_id}' not found.")]
    NotFound { agent_id: String },
    #[error("Cannot {operation} agent '{agent_id}' while it is {state}.")]
    IllegalTransition {
        agent_id: String,
        state: AgentState,
        operation: AgentOperation,
    },
    #[error("Agent '{agent_id}' is {state}, not running.")]
    NotRunning { agent_id: String, state: AgentState },
    #[error("No running agent registered for distributed host '{host}'.")]
    HostNotRunning { host: String },
    #[error("Failed to run {operation} script on {host}: {source}")]
    Transport {
        operation: AgentOperation,
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{operation} script failed on {host} ({status}): {output}")]
    Remote {
        operation: AgentOperation,
        host: String,
        status: String,
        output: String,
    },
    #[error("Agent '{agent_id}' did not accept connections on {addr} within {timeout:?}.")]
    ReadinessTimeout {
        agent_id: String,
        addr: String,
        timeout: Duration,
    },
}
