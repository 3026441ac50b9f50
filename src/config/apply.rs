use std::path::PathBuf;

use crate::error::ConfigError;

use super::parse::parse_listen_addr;
use super::types::{ConfigFile, DurationValue, Settings};

fn duration(
    field: &'static str,
    value: Option<&DurationValue>,
) -> Result<Option<std::time::Duration>, ConfigError> {
    value
        .map(DurationValue::to_duration)
        .transpose()
        .map_err(|source| ConfigError::InvalidDuration { field, source })
}

/// Layers config file values over `settings`.
///
/// # Errors
///
/// Returns an error when a value is out of range or fails to parse.
pub fn apply_config(settings: &mut Settings, config: &ConfigFile) -> Result<(), ConfigError> {
    if let Some(server) = config.server.as_ref()
        && let Some(listen) = server.listen.as_deref()
    {
        settings.listen = parse_listen_addr(listen).map_err(|source| {
            ConfigError::InvalidField {
                field: "server.listen",
                source,
            }
        })?;
    }

    if let Some(workspace) = config.workspace.as_ref() {
        if let Some(root) = workspace.root.as_deref() {
            settings.workspace.root = PathBuf::from(root);
        }
        if let Some(retention) = duration("workspace.retention", workspace.retention.as_ref())? {
            settings.workspace.retention = retention;
        }
        if let Some(interval) =
            duration("workspace.sweep_interval", workspace.sweep_interval.as_ref())?
        {
            settings.workspace.sweep_interval = interval;
        }
    }

    if let Some(generator) = config.generator.as_ref() {
        if let Some(binary) = generator.binary.as_deref() {
            settings.generator.binary = PathBuf::from(binary);
        }
        if let Some(plan) = generator.test_plan.as_deref() {
            settings.generator.test_plan = PathBuf::from(plan);
        }
        if let Some(timeout) = duration("generator.run_timeout", generator.run_timeout.as_ref())? {
            settings.generator.run_timeout = Some(timeout);
        }
    }

    if let Some(agent) = config.agent.as_ref() {
        if let Some(dir) = agent.script_dir.as_deref() {
            settings.agent.script_dir = PathBuf::from(dir);
        }
        if let Some(work_dir) = agent.work_dir.as_deref() {
            settings.agent.work_dir = work_dir.to_owned();
        }
        if let Some(port) = agent.control_port {
            if port == 0 {
                return Err(ConfigError::ControlPortZero);
            }
            settings.agent.control_port = port;
        }
        if let Some(transport) = agent.transport {
            settings.agent.transport = transport;
        }
        if let Some(key) = agent.ssh_key.as_deref() {
            settings.agent.ssh_key = Some(PathBuf::from(key));
        }
        if let Some(port) = agent.ssh_port {
            settings.agent.ssh_port = port;
        }
        if let Some(timeout) =
            duration("agent.readiness_timeout", agent.readiness_timeout.as_ref())?
        {
            settings.agent.readiness_timeout = timeout;
        }
        if let Some(interval) =
            duration("agent.readiness_interval", agent.readiness_interval.as_ref())?
        {
            settings.agent.readiness_interval = interval;
        }
    }

    if let Some(store) = config.store.as_ref() {
        if let Some(backend) = store.backend {
            settings.store.backend = backend;
        }
        if let Some(path) = store.path.as_deref() {
            settings.store.path = PathBuf::from(path);
        }
    }

    Ok(())
}

/// Applies command-line overrides on top of file settings.
///
/// # Errors
///
/// Returns an error when `listen` is not a socket address.
pub fn apply_overrides(
    settings: &mut Settings,
    listen: Option<&str>,
    workspace: Option<&str>,
) -> Result<(), ConfigError> {
    if let Some(listen) = listen {
        settings.listen = parse_listen_addr(listen).map_err(|source| ConfigError::InvalidField {
            field: "--listen",
            source,
        })?;
    }
    if let Some(root) = workspace {
        settings.workspace.root = PathBuf::from(root);
    }
    Ok(())
}
