use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use url::Url;

use crate::domain::{RunId, RunRequest, is_plain_host};
use crate::error::{AppError, AppResult, RunError, ValidationError};

use super::workspace::Workspace;

/// Load-generator binary plus the test plan every run executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generator {
    pub binary: PathBuf,
    pub test_plan: PathBuf,
}

/// Program and argument vector; never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandLine {
    /// Value passed to `-R`, when the run is distributed.
    #[must_use]
    pub fn remote_hosts(&self) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == "-R")
            .and_then(|idx| self.args.get(idx.saturating_add(1)))
            .map(String::as_str)
    }
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CompiledRun {
    pub properties_file: PathBuf,
    pub result_file: PathBuf,
    pub remote_hosts: Vec<String>,
    pub command: CommandLine,
}

/// Checks the request and returns the `host:port` entries of its agents.
///
/// # Errors
///
/// Returns a [`ValidationError`] for a missing target, an unsupported
/// protocol, impossible concurrency parameters, or a malformed agent entry.
pub fn validate(request: &RunRequest) -> Result<Vec<String>, ValidationError> {
    let protocol = request.protocol.trim().to_ascii_lowercase();
    if protocol != "http" && protocol != "https" {
        return Err(ValidationError::UnsupportedProtocol {
            value: request.protocol.clone(),
        });
    }
    let hostname = request.hostname.trim();
    if hostname.is_empty() {
        return Err(ValidationError::MissingHostname);
    }
    if request.path.trim().is_empty() {
        return Err(ValidationError::MissingPath);
    }
    let target = match request.port {
        Some(port) => format!("{}://{}:{}", protocol, hostname, port),
        None => format!("{}://{}", protocol, hostname),
    };
    Url::parse(&target).map_err(|source| ValidationError::InvalidTarget {
        target: target.clone(),
        source,
    })?;

    if request.threads == 0 {
        return Err(ValidationError::ThreadsZero);
    }
    if request.scheduled && request.duration == 0 {
        return Err(ValidationError::ScheduledWithoutDuration);
    }
    if request.loop_count == 0 && !request.infinite && !request.scheduled {
        return Err(ValidationError::LoopCountZero);
    }

    request
        .agents
        .iter()
        .enumerate()
        .map(|(index, agent)| {
            let host = agent.agent_host.trim();
            if host.is_empty() {
                return Err(ValidationError::AgentHostMissing { index });
            }
            if !is_plain_host(host) {
                return Err(ValidationError::AgentHostInvalid {
                    index,
                    value: agent.agent_host.clone(),
                });
            }
            let port = agent
                .agent_port
                .trim()
                .parse::<u16>()
                .ok()
                .filter(|port| *port > 0)
                .ok_or_else(|| ValidationError::AgentPortInvalid {
                    index,
                    value: agent.agent_port.clone(),
                })?;
            Ok(format!("{}:{}", host, port))
        })
        .collect()
}

/// Flattens a request into generator properties.
///
/// With `omit_empty`, empty strings and zero numbers are dropped; flags are
/// always written so the test plan never falls back to its own defaults for
/// them.
#[must_use]
pub fn properties(
    request: &RunRequest,
    run_id: &RunId,
    omit_empty: bool,
) -> BTreeMap<&'static str, String> {
    let text = [
        ("testId", run_id.to_string()),
        ("protocol", request.protocol.trim().to_ascii_lowercase()),
        ("hostname", request.hostname.trim().to_owned()),
        ("path", request.path.clone()),
        ("bodyData", request.body_data.clone()),
    ];
    let numbers = [
        ("port", request.port.map_or(0, u32::from)),
        ("threads", request.threads),
        ("rampTime", request.ramp_time),
        ("loopCount", request.loop_count),
        ("duration", request.duration),
    ];
    let flags = [
        ("scheduled", request.scheduled),
        ("infinite", request.infinite),
    ];

    let mut props = BTreeMap::new();
    for (key, value) in text {
        if !(omit_empty && value.is_empty()) {
            props.insert(key, value);
        }
    }
    for (key, value) in numbers {
        if !(omit_empty && value == 0) {
            props.insert(key, value.to_string());
        }
    }
    for (key, value) in flags {
        props.insert(key, value.to_string());
    }
    props
}

/// Renders `key=value` lines in key order.
#[must_use]
pub fn render_properties(props: &BTreeMap<&'static str, String>) -> String {
    props
        .iter()
        .map(|(key, value)| format!("{}={}\n", key, escape_property_value(value)))
        .collect()
}

fn escape_property_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for (idx, ch) in value.chars().enumerate() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            ' ' if idx == 0 => escaped.push_str("\\ "),
            other => escaped.push(other),
        }
    }
    escaped
}

#[must_use]
pub fn command_line(
    generator: &Generator,
    properties_file: &Path,
    result_file: &Path,
    report_dir: &Path,
    remote_hosts: &[String],
) -> CommandLine {
    let mut args = vec![
        "-n".to_owned(),
        "-p".to_owned(),
        properties_file.display().to_string(),
        "-t".to_owned(),
        generator.test_plan.display().to_string(),
        "-l".to_owned(),
        result_file.display().to_string(),
        "-e".to_owned(),
        "-o".to_owned(),
        report_dir.display().to_string(),
    ];
    if !remote_hosts.is_empty() {
        args.push("-R".to_owned());
        args.push(remote_hosts.join(","));
    }
    CommandLine {
        program: generator.binary.clone(),
        args,
    }
}

/// Validates the request, writes its properties file into the workspace and
/// builds the generator command line. Agents are not contacted here.
///
/// # Errors
///
/// Returns a validation error for a bad request and a run error when the
/// properties file cannot be written.
pub async fn compile(
    request: &RunRequest,
    run_id: &RunId,
    workspace: &Workspace,
    generator: &Generator,
) -> AppResult<CompiledRun> {
    let remote_hosts = validate(request)?;
    let properties_file = workspace.properties_file(run_id);
    let mut props = properties(request, run_id, true);
    props.insert(
        "metricsPrefix",
        workspace.metrics_prefix(run_id).display().to_string(),
    );
    let body = render_properties(&props);
    tokio::fs::write(&properties_file, body)
        .await
        .map_err(|source| {
            AppError::run(RunError::WriteProperties {
                path: properties_file.clone(),
                source,
            })
        })?;

    let result_file = workspace.result_file(run_id);
    let command = command_line(
        generator,
        &properties_file,
        &result_file,
        &workspace.report_dir,
        &remote_hosts,
    );
    Ok(CompiledRun {
        properties_file,
        result_file,
        remote_hosts,
        command,
    })
}
