use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::info;

use crate::args::{AgentCommand, Command, LoadctlArgs};
use crate::config::{Settings, apply_overrides, load_settings};
use crate::domain::{AgentId, AgentInstallRequest, ExecutionMode, RunId, RunRequest};
use crate::engine::Engine;
use crate::error::{AppError, AppResult, ValidationError};

/// Binary entry point: parse arguments, set up logging and run one command
/// on a multi-thread runtime.
///
/// # Errors
///
/// Returns the first error raised by argument parsing, configuration or the
/// selected command.
pub fn run() -> AppResult<()> {
    let args = LoadctlArgs::parse();
    crate::logger::init_logging(args.verbose, args.no_color);

    let settings = build_settings(&args)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_async(args.command, settings))
}

fn build_settings(args: &LoadctlArgs) -> AppResult<Settings> {
    let mut settings = load_settings(args.config.as_deref())?;
    let (listen, workspace) = match &args.command {
        Command::Serve(serve) => (serve.listen.as_deref(), serve.workspace.as_deref()),
        Command::Run(run) => (None, run.workspace.as_deref()),
        Command::Cleanup(cleanup) => (None, cleanup.workspace.as_deref()),
        Command::Status(_) | Command::Result(_) | Command::Agent(_) => (None, None),
    };
    apply_overrides(&mut settings, listen, workspace)?;
    Ok(settings)
}

async fn run_async(command: Command, settings: Settings) -> AppResult<()> {
    let engine = Engine::from_settings(settings).await?;
    match command {
        Command::Serve(_) => serve(Arc::new(engine)).await,
        Command::Run(run) => {
            let request = read_request(&run.request).await?;
            let mode = if run.detached {
                ExecutionMode::Detached
            } else {
                ExecutionMode::Synchronous
            };
            print_json(&engine.submit_run(&request, mode).await?)
        }
        Command::Status(status) => {
            let run_id = RunId::parse(&status.run_id)?;
            print_json(&engine.run_status(&run_id).await?)
        }
        Command::Result(result) => {
            let run_id = RunId::parse(&result.run_id)?;
            if result.metrics {
                print_json(&engine.run_metrics(&run_id).await?)
            } else if result.summary {
                print_json(&engine.run_summary(&run_id).await?)
            } else {
                print_rows(&engine, &run_id).await
            }
        }
        Command::Agent(agent) => run_agent_command(&engine, agent).await,
        Command::Cleanup(cleanup) => {
            let report = engine.cleanup(cleanup.older_than, cleanup.dry_run).await?;
            print_json(&report)
        }
    }
}

async fn run_agent_command(engine: &Engine, command: AgentCommand) -> AppResult<()> {
    match command {
        AgentCommand::Install(install) => {
            let request = AgentInstallRequest {
                hostname: install.host,
                username: install.user,
                shutdown: install.auto_shutdown,
                ssh_key: install.ssh_key,
            };
            print_json(&engine.install_agent(&request).await?)
        }
        AgentCommand::Start(target) => {
            print_json(&engine.start_agent(&AgentId::parse(&target.agent_id)?).await?)
        }
        AgentCommand::Stop(target) => {
            print_json(&engine.stop_agent(&AgentId::parse(&target.agent_id)?).await?)
        }
        AgentCommand::Remove(target) => {
            let agent_id = AgentId::parse(&target.agent_id)?;
            engine.remove_agent(&agent_id).await?;
            info!(agent_id = %agent_id, "Agent removed");
            Ok(())
        }
        AgentCommand::Show(target) => {
            print_json(&engine.agent(&AgentId::parse(&target.agent_id)?).await?)
        }
        AgentCommand::List => print_json(&engine.list_agents().await?),
        AgentCommand::Wait(wait) => {
            let agent_id = AgentId::parse(&wait.agent_id)?;
            engine.wait_agent_ready(&agent_id, wait.timeout).await?;
            info!(agent_id = %agent_id, "Agent is ready");
            Ok(())
        }
    }
}

async fn serve(engine: Arc<Engine>) -> AppResult<()> {
    let listener = crate::api::bind(engine.settings().listen).await?;
    let (shutdown_tx, shutdown_rx) = crate::shutdown::shutdown_channel();
    let signal_task = crate::shutdown::setup_signal_shutdown_handler(&shutdown_tx);
    let reaper = engine.start_reaper();

    let served = crate::api::serve(Arc::clone(&engine), listener, shutdown_rx).await;

    drop(shutdown_tx.send(()));
    reaper.shutdown().await?;
    signal_task.await?;
    served
}

async fn read_request(path: &Path) -> AppResult<RunRequest> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ValidationError::ReadRequestFile {
            path: path.display().to_string(),
            source,
        })?;
    let request: RunRequest = serde_json::from_str(&content)
        .map_err(|source| ValidationError::InvalidRequestJson { source })?;
    Ok(request)
}

async fn print_rows(engine: &Engine, run_id: &RunId) -> AppResult<()> {
    let mut reader = engine.open_results(run_id).await?;
    let stdout = std::io::stdout();
    while let Some(row) = reader.next_row().await.map_err(AppError::from)? {
        let mut out = stdout.lock();
        writeln!(out, "{}", row.join("\t"))?;
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> AppResult<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{}", rendered)?;
    Ok(())
}
