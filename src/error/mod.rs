mod agent;
mod app;
mod config;
mod run;
mod store;
mod validation;

pub use agent::AgentError;
pub use app::{AppError, AppResult, ErrorKind};
pub use config::ConfigError;
pub use run::RunError;
pub use store::StoreError;
pub use validation::ValidationError;
