//! Configuration loading and resolution.
mod apply;
mod loader;
mod parse;
pub mod types;


pub use apply::{apply_config, apply_overrides};
pub use loader::{load_config, load_settings};
pub use types::{
    AgentSettings, AgentTransport, ConfigFile, GeneratorSettings, Settings, StoreBackend,
    StoreSettings, WorkspaceSettings,
};

#[cfg(test)]
pub(crate) use loader::load_config_file;
pub(crate) use parse::parse_duration_value;
