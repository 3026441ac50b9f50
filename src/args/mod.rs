//! CLI argument types and parsing helpers.
mod cli;
mod parsers;


pub use cli::{
    AgentCommand, AgentIdArg, AgentInstallArgs, AgentWaitArgs, CleanupArgs, Command,
    LoadctlArgs, ResultArgs, RunArgs, RunIdArg, ServeArgs,
};
