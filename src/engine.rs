//! Service facade wiring settings to the orchestrator and the agent manager.
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::agent::{AgentControl, AgentLifecycleManager, AgentScripts, ScriptAgentControl};
use crate::config::{AgentTransport, Settings, StoreBackend};
use crate::domain::{
    AgentId, AgentInstallRequest, AgentRecord, ExecutionMode, RunId, RunRecord, RunRequest,
};
use crate::error::AppResult;
use crate::exec::{CommandRunner, LocalShell, SshShell};
use crate::orchestrator::{
    Generator, LabelSummary, Launcher, Reaper, ReaperHandle, ResultReader, ResultRow,
    RunMetrics, RunOrchestrator, SweepReport, WorkspaceAllocator, validate,
};
use crate::store::{MemoryStore, RecordStore, SqliteStore};

pub struct Engine {
    settings: Settings,
    runs: RunOrchestrator,
    agents: AgentLifecycleManager,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Builds the store and transport selected by `settings`.
    ///
    /// # Errors
    ///
    /// Returns an error when the SQLite store cannot be opened.
    pub async fn from_settings(settings: Settings) -> AppResult<Self> {
        let (run_store, agent_store): (
            Arc<dyn RecordStore<RunRecord>>,
            Arc<dyn RecordStore<AgentRecord>>,
        ) = match settings.store.backend {
            StoreBackend::Sqlite => {
                let store = SqliteStore::open(&settings.store.path).await?;
                (Arc::new(store.clone()), Arc::new(store))
            }
            StoreBackend::Memory => (
                Arc::new(MemoryStore::<RunRecord>::new()),
                Arc::new(MemoryStore::<AgentRecord>::new()),
            ),
        };
        let runner: Arc<dyn CommandRunner> = match settings.agent.transport {
            AgentTransport::Local => Arc::new(LocalShell),
            AgentTransport::Ssh => Arc::new(SshShell::new(
                settings.agent.ssh_port,
                settings.agent.ssh_key.clone(),
            )),
        };
        let control = Arc::new(ScriptAgentControl::new(
            runner,
            AgentScripts {
                script_dir: settings.agent.script_dir.clone(),
                work_dir: settings.agent.work_dir.clone(),
            },
        ));
        info!(
            store = ?settings.store.backend,
            transport = ?settings.agent.transport,
            workspace = %settings.workspace.root.display(),
            "Engine ready"
        );
        Ok(Self::with_components(settings, run_store, agent_store, control))
    }

    #[must_use]
    pub fn with_components(
        settings: Settings,
        run_store: Arc<dyn RecordStore<RunRecord>>,
        agent_store: Arc<dyn RecordStore<AgentRecord>>,
        control: Arc<dyn AgentControl>,
    ) -> Self {
        let runs = RunOrchestrator::new(
            WorkspaceAllocator::new(settings.workspace.root.clone()),
            Generator {
                binary: settings.generator.binary.clone(),
                test_plan: settings.generator.test_plan.clone(),
            },
            Launcher::new(settings.generator.run_timeout),
            run_store,
        );
        let agents = AgentLifecycleManager::new(
            control,
            agent_store,
            settings.agent.control_port,
            settings.agent.readiness_interval,
        );
        Self {
            settings,
            runs,
            agents,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Submits a run; distributed runs require a running agent on every host.
    ///
    /// # Errors
    ///
    /// Returns validation, state, workspace, launch or store errors.
    pub async fn submit_run(
        &self,
        request: &RunRequest,
        mode: ExecutionMode,
    ) -> AppResult<RunRecord> {
        validate(request)?;
        if request.is_distributed() {
            self.agents
                .ensure_running_hosts(request.agents.iter().map(|agent| agent.agent_host.as_str()))
                .await?;
        }
        self.runs.submit(request, mode).await
    }

    /// # Errors
    ///
    /// Returns a not-found error for an unknown run.
    pub async fn run_status(&self, run_id: &RunId) -> AppResult<RunRecord> {
        self.runs.status(run_id).await
    }

    /// # Errors
    ///
    /// Returns not-found or parse errors.
    pub async fn run_results(&self, run_id: &RunId) -> AppResult<Vec<ResultRow>> {
        self.runs.read_results(run_id).await
    }

    /// # Errors
    ///
    /// Returns a not-found error for an unknown run or missing artifact.
    pub async fn open_results(&self, run_id: &RunId) -> AppResult<ResultReader> {
        self.runs.open_results(run_id).await
    }

    /// # Errors
    ///
    /// Returns not-found or parse errors.
    pub async fn run_summary(&self, run_id: &RunId) -> AppResult<Vec<LabelSummary>> {
        self.runs.summary(run_id).await
    }

    /// # Errors
    ///
    /// Returns not-found or parse errors.
    pub async fn run_metrics(&self, run_id: &RunId) -> AppResult<RunMetrics> {
        self.runs.metrics(run_id).await
    }

    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub async fn list_runs(&self) -> AppResult<Vec<RunRecord>> {
        self.runs.list().await
    }

    /// # Errors
    ///
    /// Returns validation or remote errors.
    pub async fn install_agent(&self, request: &AgentInstallRequest) -> AppResult<AgentRecord> {
        self.agents.install(request).await
    }

    /// # Errors
    ///
    /// Returns not-found, state or remote errors.
    pub async fn start_agent(&self, agent_id: &AgentId) -> AppResult<AgentRecord> {
        self.agents.start(agent_id).await
    }

    /// # Errors
    ///
    /// Returns not-found, state or remote errors.
    pub async fn stop_agent(&self, agent_id: &AgentId) -> AppResult<AgentRecord> {
        self.agents.stop(agent_id).await
    }

    /// # Errors
    ///
    /// Returns not-found, state or remote errors.
    pub async fn remove_agent(&self, agent_id: &AgentId) -> AppResult<()> {
        self.agents.remove(agent_id).await
    }

    /// # Errors
    ///
    /// Returns a not-found error for an unknown agent.
    pub async fn agent(&self, agent_id: &AgentId) -> AppResult<AgentRecord> {
        self.agents.get(agent_id).await
    }

    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub async fn list_agents(&self) -> AppResult<Vec<AgentRecord>> {
        self.agents.list().await
    }

    /// # Errors
    ///
    /// Returns a state error unless the agent is running.
    pub async fn probe_agent(&self, agent_id: &AgentId) -> AppResult<bool> {
        self.agents.probe_ready(agent_id).await
    }

    /// Waits up to `timeout` (or the configured readiness timeout).
    ///
    /// # Errors
    ///
    /// Returns a state error unless the agent is running, or a readiness
    /// timeout.
    pub async fn wait_agent_ready(
        &self,
        agent_id: &AgentId,
        timeout: Option<Duration>,
    ) -> AppResult<()> {
        let timeout = timeout.unwrap_or(self.settings.agent.readiness_timeout);
        self.agents.wait_ready(agent_id, timeout).await
    }

    #[must_use]
    pub fn reaper(&self) -> Reaper {
        self.runs.reaper(self.settings.workspace.retention)
    }

    #[must_use]
    pub fn start_reaper(&self) -> ReaperHandle {
        self.reaper().spawn(self.settings.workspace.sweep_interval)
    }

    /// Runs one retention sweep right away.
    ///
    /// # Errors
    ///
    /// Returns an error when the workspace root cannot be listed or the store
    /// fails.
    pub async fn cleanup(
        &self,
        older_than: Option<Duration>,
        dry_run: bool,
    ) -> AppResult<SweepReport> {
        let mut reaper = self.reaper();
        if let Some(retention) = older_than {
            reaper = reaper.with_retention(retention);
        }
        reaper.sweep_once(crate::domain::now_ms(), dry_run).await
    }
}
