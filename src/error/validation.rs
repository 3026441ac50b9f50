use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing target hostname.")]
    MissingHostname,
    #[error("Missing target path.")]
    MissingPath,
    #[error("Unsupported protocol '{value}'. Use http or https.")]
    UnsupportedProtocol { value: String },
    #[error("Invalid target '{target}': {source}")]
    InvalidTarget {
        target: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Thread count must be >= 1.")]
    ThreadsZero,
    #[error("Loop count must be >= 1 unless the run is infinite or scheduled.")]
    LoopCountZero,
    #[error("Scheduled runs require a duration > 0.")]
    ScheduledWithoutDuration,
    #[error("Distributed host entry #{index} is missing agentHost.")]
    AgentHostMissing { index: usize },
    #[error("Distributed host entry #{index} has invalid agentHost '{value}'.")]
    AgentHostInvalid { index: usize, value: String },
    #[error("Distributed host entry #{index} has invalid agentPort '{value}'.")]
    AgentPortInvalid { index: usize, value: String },
    #[error("Invalid run id '{value}'.")]
    InvalidRunId { value: String },
    #[error("Invalid agent id '{value}'.")]
    InvalidAgentId { value: String },
    #[error("Agent install requires a hostname.")]
    AgentHostnameMissing,
    #[error("Agent install requires a username.")]
    AgentUsernameMissing,
    #[error("Invalid agent hostname '{value}'.")]
    AgentHostnameInvalid { value: String },
    #[error("Invalid agent username '{value}'.")]
    AgentUsernameInvalid { value: String },
    #[error("Duration must not be empty.")]
    DurationEmpty,
    #[error("Invalid duration '{value}'.")]
    InvalidDurationFormat { value: String },
    #[error("Invalid duration '{value}': {source}")]
    InvalidDurationNumber {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("Duration overflow.")]
    DurationOverflow,
    #[error("Invalid duration unit '{unit}'.")]
    InvalidDurationUnit { unit: String },
    #[error("Duration must be > 0.")]
    DurationZero,
    #[error("Invalid listen address '{value}': {source}")]
    InvalidListenAddr {
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("Failed to read request file '{path}': {source}")]
    ReadRequestFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid request JSON: {source}")]
    InvalidRequestJson {
        #[source]
        source: serde_json::Error,
    },
}
