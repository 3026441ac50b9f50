use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use super::parsers::parse_duration_arg;

#[derive(Debug, Parser, Clone)]
#[clap(
    version,
    about = "Load-test run orchestration and monitoring-agent lifecycle control."
)]
pub struct LoadctlArgs {
    /// Path to a TOML or JSON config file (defaults to ./loadctl.toml or ./loadctl.json)
    #[arg(long = "config", short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long = "verbose", short = 'v', global = true)]
    pub verbose: bool,

    /// Disable ANSI colors in log output
    #[arg(long = "no-color", global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve the HTTP surface and run the retention reaper
    Serve(ServeArgs),
    /// Submit one run request and print the resulting record
    Run(RunArgs),
    /// Print the current record of a run
    Status(RunIdArg),
    /// Print result rows or the per-label summary of a run
    Result(ResultArgs),
    /// Manage monitoring agents
    #[command(subcommand)]
    Agent(AgentCommand),
    /// Remove expired run workspaces once
    Cleanup(CleanupArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ServeArgs {
    /// Listen address (e.g., 127.0.0.1:8880)
    #[arg(long = "listen")]
    pub listen: Option<String>,

    /// Workspace root directory
    #[arg(long = "workspace")]
    pub workspace: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Run request JSON file
    #[arg(long = "request", short = 'r')]
    pub request: PathBuf,

    /// Return as soon as the generator is spawned
    #[arg(long = "detached")]
    pub detached: bool,

    /// Workspace root directory
    #[arg(long = "workspace")]
    pub workspace: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct RunIdArg {
    pub run_id: String,
}

#[derive(Debug, Args, Clone)]
pub struct ResultArgs {
    pub run_id: String,

    /// Print per-label statistics as JSON instead of raw rows
    #[arg(long = "summary", conflicts_with = "metrics")]
    pub summary: bool,

    /// Print host resource samples recorded by the agents
    #[arg(long = "metrics")]
    pub metrics: bool,
}

#[derive(Debug, Subcommand, Clone)]
pub enum AgentCommand {
    /// Install the agent on a host
    Install(AgentInstallArgs),
    /// Start an installed agent
    Start(AgentIdArg),
    /// Stop a running agent
    Stop(AgentIdArg),
    /// Uninstall a stopped agent
    Remove(AgentIdArg),
    /// Print an agent record
    Show(AgentIdArg),
    /// List all agent records
    List,
    /// Wait until a running agent accepts connections
    Wait(AgentWaitArgs),
}

#[derive(Debug, Args, Clone)]
pub struct AgentInstallArgs {
    /// Target hostname
    #[arg(long = "host")]
    pub host: String,

    /// Remote user
    #[arg(long = "user")]
    pub user: String,

    /// Start the agent with auto-shutdown enabled
    #[arg(long = "auto-shutdown")]
    pub auto_shutdown: bool,

    /// SSH private key used for this host
    #[arg(long = "ssh-key")]
    pub ssh_key: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct AgentIdArg {
    pub agent_id: String,
}

#[derive(Debug, Args, Clone)]
pub struct AgentWaitArgs {
    pub agent_id: String,

    /// How long to wait (supports ms/s/m/h; defaults to the configured readiness timeout)
    #[arg(long = "timeout", value_parser = parse_duration_arg)]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Args, Clone)]
pub struct CleanupArgs {
    /// Only remove workspaces older than this duration (supports ms/s/m/h)
    #[arg(long = "older-than", value_parser = parse_duration_arg)]
    pub older_than: Option<Duration>,

    /// Show what would be removed without deleting anything
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Workspace root directory
    #[arg(long = "workspace")]
    pub workspace: Option<String>,
}
