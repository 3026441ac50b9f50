use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ValidationError;

/// On-disk configuration. Every section and key is optional.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    pub server: Option<ServerConfig>,
    pub workspace: Option<WorkspaceConfig>,
    pub generator: Option<GeneratorConfig>,
    pub agent: Option<AgentConfig>,
    pub store: Option<StoreConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    pub listen: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WorkspaceConfig {
    pub root: Option<String>,
    pub retention: Option<DurationValue>,
    pub sweep_interval: Option<DurationValue>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GeneratorConfig {
    pub binary: Option<String>,
    pub test_plan: Option<String>,
    pub run_timeout: Option<DurationValue>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AgentConfig {
    pub script_dir: Option<String>,
    pub work_dir: Option<String>,
    pub control_port: Option<u16>,
    pub transport: Option<AgentTransport>,
    pub ssh_key: Option<String>,
    pub ssh_port: Option<u16>,
    pub readiness_timeout: Option<DurationValue>,
    pub readiness_interval: Option<DurationValue>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StoreConfig {
    pub backend: Option<StoreBackend>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentTransport {
    #[default]
    Local,
    Ssh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    pub(crate) fn to_duration(&self) -> Result<Duration, ValidationError> {
        match self {
            DurationValue::Seconds(secs) => {
                if *secs == 0 {
                    Err(ValidationError::DurationZero)
                } else {
                    Ok(Duration::from_secs(*secs))
                }
            }
            DurationValue::Text(text) => super::parse_duration_value(text),
        }
    }
}

/// Fully resolved settings: defaults, then the config file, then CLI flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub listen: SocketAddr,
    pub workspace: WorkspaceSettings,
    pub generator: GeneratorSettings,
    pub agent: AgentSettings,
    pub store: StoreSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceSettings {
    pub root: PathBuf,
    pub retention: Duration,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorSettings {
    pub binary: PathBuf,
    pub test_plan: PathBuf,
    pub run_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    pub script_dir: PathBuf,
    pub work_dir: String,
    pub control_port: u16,
    pub transport: AgentTransport,
    pub ssh_key: Option<PathBuf>,
    pub ssh_port: u16,
    pub readiness_timeout: Duration,
    pub readiness_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub path: PathBuf,
}

pub const DEFAULT_CONTROL_PORT: u16 = 4444;
pub const DEFAULT_AGENT_WORK_DIR: &str = "/opt/perfmon-agent";

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8880)),
            workspace: WorkspaceSettings {
                root: PathBuf::from("workspace"),
                retention: Duration::from_secs(30 * 60),
                sweep_interval: Duration::from_secs(60),
            },
            generator: GeneratorSettings {
                binary: PathBuf::from("third_party/jmeter/bin/jmeter"),
                test_plan: PathBuf::from("test_plan/default_perf_test.jmx"),
                run_timeout: None,
            },
            agent: AgentSettings {
                script_dir: PathBuf::from("script"),
                work_dir: DEFAULT_AGENT_WORK_DIR.to_owned(),
                control_port: DEFAULT_CONTROL_PORT,
                transport: AgentTransport::Local,
                ssh_key: None,
                ssh_port: 22,
                readiness_timeout: Duration::from_secs(30),
                readiness_interval: Duration::from_millis(500),
            },
            store: StoreSettings {
                backend: StoreBackend::Sqlite,
                path: PathBuf::from("loadctl.db"),
            },
        }
    }
}
