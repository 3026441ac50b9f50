//! Agent lifecycle: the per-agent state machine and the remote procedures
//! behind each transition.
mod control;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::domain::{
    AgentHost, AgentId, AgentInstallRequest, AgentOperation, AgentRecord, AgentState, Transition,
    now_ms,
};
use crate::error::{AgentError, AppError, AppResult};
use crate::store::{KeyedLocks, RecordStore};

pub use control::{
    AUTO_SHUTDOWN_FLAG, AgentControl, AgentScripts, INSTALL_SCRIPT, REMOVE_SCRIPT, START_SCRIPT,
    STOP_SCRIPT, ScriptAgentControl,
};

/// Upper bound for a single readiness connection attempt.
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

pub struct AgentLifecycleManager {
    control: Arc<dyn AgentControl>,
    agents: Arc<dyn RecordStore<AgentRecord>>,
    locks: KeyedLocks,
    control_port: u16,
    readiness_interval: Duration,
}

impl std::fmt::Debug for AgentLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLifecycleManager")
            .field("control_port", &self.control_port)
            .field("readiness_interval", &self.readiness_interval)
            .finish_non_exhaustive()
    }
}

fn ensure_legal(record: &AgentRecord, operation: AgentOperation) -> Result<Transition, AgentError> {
    record
        .state
        .next(operation)
        .ok_or_else(|| AgentError::IllegalTransition {
            agent_id: record.id.to_string(),
            state: record.state,
            operation,
        })
}

impl AgentLifecycleManager {
    #[must_use]
    pub fn new(
        control: Arc<dyn AgentControl>,
        agents: Arc<dyn RecordStore<AgentRecord>>,
        control_port: u16,
        readiness_interval: Duration,
    ) -> Self {
        Self {
            control,
            agents,
            locks: KeyedLocks::new(),
            control_port,
            readiness_interval,
        }
    }

    async fn find(&self, agent_id: &AgentId) -> AppResult<AgentRecord> {
        self.agents
            .find_by_id(agent_id.as_str())
            .await?
            .ok_or_else(|| {
                AppError::agent(AgentError::NotFound {
                    agent_id: agent_id.to_string(),
                })
            })
    }

    /// Installs the agent and records it as `Installed`. Nothing is stored
    /// when the install script fails.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad request and a remote error when
    /// the install script fails.
    pub async fn install(&self, request: &AgentInstallRequest) -> AppResult<AgentRecord> {
        request.validate()?;
        let host = AgentHost {
            hostname: request.hostname.trim().to_owned(),
            username: request.username.trim().to_owned(),
            ssh_key: request.ssh_key.clone(),
        };
        let agent_id = AgentId::generate();
        let _guard = self.locks.lock(agent_id.as_str()).await;

        self.control.install_on(&host).await?;
        let now = now_ms();
        let record = AgentRecord {
            id: agent_id,
            host,
            control_port: self.control_port,
            auto_shutdown: request.shutdown,
            state: AgentState::Installed,
            installed_at_ms: now,
            updated_at_ms: now,
        };
        self.agents.insert(&record).await?;
        info!(agent_id = %record.id, host = %record.host.hostname, "Agent installed");
        Ok(record)
    }

    /// Dispatches the start script and marks the agent `Running` without
    /// waiting for it to listen; see [`Self::wait_ready`].
    ///
    /// # Errors
    ///
    /// Returns not-found, state or remote errors.
    pub async fn start(&self, agent_id: &AgentId) -> AppResult<AgentRecord> {
        let _guard = self.locks.lock(agent_id.as_str()).await;
        let mut record = self.find(agent_id).await?;
        let transition = ensure_legal(&record, AgentOperation::Start)?;
        self.control
            .start_on(&record.host, record.control_port, record.auto_shutdown)
            .await?;
        self.apply(&mut record, transition).await?;
        Ok(record)
    }

    /// # Errors
    ///
    /// Returns not-found, state or remote errors.
    pub async fn stop(&self, agent_id: &AgentId) -> AppResult<AgentRecord> {
        let _guard = self.locks.lock(agent_id.as_str()).await;
        let mut record = self.find(agent_id).await?;
        let transition = ensure_legal(&record, AgentOperation::Stop)?;
        self.control
            .stop_on(&record.host, record.control_port)
            .await?;
        self.apply(&mut record, transition).await?;
        Ok(record)
    }

    /// Removes the agent from its host and forgets it. A running agent must
    /// be stopped first.
    ///
    /// # Errors
    ///
    /// Returns not-found, state or remote errors.
    pub async fn remove(&self, agent_id: &AgentId) -> AppResult<()> {
        let _guard = self.locks.lock(agent_id.as_str()).await;
        let mut record = self.find(agent_id).await?;
        let transition = ensure_legal(&record, AgentOperation::Remove)?;
        self.control.remove_on(&record.host).await?;
        self.apply(&mut record, transition).await
    }

    async fn apply(&self, record: &mut AgentRecord, transition: Transition) -> AppResult<()> {
        match transition {
            Transition::To(state) => {
                let previous = record.state;
                record.state = state;
                record.updated_at_ms = now_ms();
                self.agents.update(record).await?;
                info!(
                    agent_id = %record.id,
                    host = %record.host.hostname,
                    from = %previous,
                    to = %state,
                    "Agent state changed"
                );
            }
            Transition::Deleted => {
                self.agents.delete_by_id(record.id.as_str()).await?;
                info!(agent_id = %record.id, host = %record.host.hostname, "Agent removed");
            }
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns a not-found error for an unknown id.
    pub async fn get(&self, agent_id: &AgentId) -> AppResult<AgentRecord> {
        self.find(agent_id).await
    }

    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub async fn list(&self) -> AppResult<Vec<AgentRecord>> {
        Ok(self.agents.list().await?)
    }

    async fn running(&self, agent_id: &AgentId) -> AppResult<AgentRecord> {
        let record = self.find(agent_id).await?;
        if record.state != AgentState::Running {
            return Err(AppError::agent(AgentError::NotRunning {
                agent_id: agent_id.to_string(),
                state: record.state,
            }));
        }
        Ok(record)
    }

    /// One connection attempt against the agent's control port.
    ///
    /// # Errors
    ///
    /// Returns a state error unless the agent is `Running`.
    pub async fn probe_ready(&self, agent_id: &AgentId) -> AppResult<bool> {
        let record = self.running(agent_id).await?;
        Ok(probe(&record).await)
    }

    /// Polls the control port until it accepts a connection.
    ///
    /// # Errors
    ///
    /// Returns a state error unless the agent is `Running`, and
    /// [`AgentError::ReadinessTimeout`] when `timeout` elapses first.
    pub async fn wait_ready(&self, agent_id: &AgentId, timeout: Duration) -> AppResult<()> {
        let record = self.running(agent_id).await?;
        let interval = self.readiness_interval;
        let polled = tokio::time::timeout(timeout, async {
            while !probe(&record).await {
                tokio::time::sleep(interval).await;
            }
        })
        .await;
        if polled.is_err() {
            return Err(AppError::agent(AgentError::ReadinessTimeout {
                agent_id: agent_id.to_string(),
                addr: control_addr(&record),
                timeout,
            }));
        }
        info!(agent_id = %agent_id, addr = %control_addr(&record), "Agent is accepting connections");
        Ok(())
    }

    /// Checks that every distributed host has a `Running` agent.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::HostNotRunning`] for the first host without one.
    pub async fn ensure_running_hosts<'host>(
        &self,
        hosts: impl IntoIterator<Item = &'host str>,
    ) -> AppResult<()> {
        let agents = self.agents.list().await?;
        for host in hosts {
            let host = host.trim();
            let running = agents
                .iter()
                .any(|agent| agent.host.hostname == host && agent.state == AgentState::Running);
            if !running {
                return Err(AppError::agent(AgentError::HostNotRunning {
                    host: host.to_owned(),
                }));
            }
        }
        Ok(())
    }
}

fn control_addr(record: &AgentRecord) -> String {
    format!("{}:{}", record.host.hostname, record.control_port)
}

async fn probe(record: &AgentRecord) -> bool {
    let addr = control_addr(record);
    match tokio::time::timeout(PROBE_CONNECT_TIMEOUT, TcpStream::connect(&addr)).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(err)) => {
            debug!(addr = %addr, "Agent not reachable yet: {}", err);
            false
        }
        Err(_elapsed) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeControl {
        remote_calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl FakeControl {
        fn outcome(&self, operation: AgentOperation, host: &AgentHost) -> Result<(), AgentError> {
            self.remote_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(AgentError::Remote {
                    operation,
                    host: host.hostname.clone(),
                    status: "exit code 1".to_owned(),
                    output: "boom".to_owned(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl AgentControl for FakeControl {
        async fn install_on(&self, host: &AgentHost) -> Result<(), AgentError> {
            self.outcome(AgentOperation::Install, host)
        }

        async fn start_on(&self, host: &AgentHost, _port: u16, _auto: bool) -> Result<(), AgentError> {
            self.outcome(AgentOperation::Start, host)
        }

        async fn stop_on(&self, host: &AgentHost, _port: u16) -> Result<(), AgentError> {
            self.outcome(AgentOperation::Stop, host)
        }

        async fn remove_on(&self, host: &AgentHost) -> Result<(), AgentError> {
            self.outcome(AgentOperation::Remove, host)
        }
    }

    fn manager(control: Arc<FakeControl>) -> (AgentLifecycleManager, Arc<MemoryStore<AgentRecord>>) {
        let store = Arc::new(MemoryStore::<AgentRecord>::new());
        let manager =
            AgentLifecycleManager::new(control, store.clone(), 4444, Duration::from_millis(20));
        (manager, store)
    }

    fn request() -> AgentInstallRequest {
        AgentInstallRequest {
            hostname: "127.0.0.1".to_owned(),
            username: "ubuntu".to_owned(),
            shutdown: true,
            ssh_key: None,
        }
    }

    fn expect_state_error(result: AppResult<impl std::fmt::Debug>) -> Result<(), String> {
        match result {
            Err(AppError::Agent(AgentError::IllegalTransition { .. })) => Ok(()),
            other => Err(format!("Expected state error, got {:?}", other)),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn install_then_start_then_stop_then_remove() -> Result<(), String> {
        let control = Arc::new(FakeControl::default());
        let (manager, store) = manager(control.clone());
        let record = manager
            .install(&request())
            .await
            .map_err(|err| err.to_string())?;
        if record.state != AgentState::Installed || !record.auto_shutdown {
            return Err(format!("Unexpected install record: {:?}", record));
        }

        let started = manager
            .start(&record.id)
            .await
            .map_err(|err| err.to_string())?;
        if started.state != AgentState::Running {
            return Err("Expected Running after start".to_owned());
        }
        let calls_before = control.remote_calls.load(Ordering::SeqCst);
        expect_state_error(manager.start(&record.id).await)?;
        expect_state_error(manager.remove(&record.id).await)?;
        if control.remote_calls.load(Ordering::SeqCst) != calls_before {
            return Err("Illegal transitions must not reach the host".to_owned());
        }

        manager
            .stop(&record.id)
            .await
            .map_err(|err| err.to_string())?;
        manager
            .remove(&record.id)
            .await
            .map_err(|err| err.to_string())?;
        let gone = store
            .find_by_id(record.id.as_str())
            .await
            .map_err(|err| err.to_string())?;
        if gone.is_some() {
            return Err("Record survived remove".to_owned());
        }
        match manager.start(&record.id).await {
            Err(AppError::Agent(AgentError::NotFound { .. })) => Ok(()),
            other => Err(format!("Expected not found, got {:?}", other)),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn install_then_remove_without_start() -> Result<(), String> {
        let (manager, _store) = manager(Arc::new(FakeControl::default()));
        let record = manager
            .install(&request())
            .await
            .map_err(|err| err.to_string())?;
        manager
            .remove(&record.id)
            .await
            .map_err(|err| err.to_string())?;
        let remaining = manager.list().await.map_err(|err| err.to_string())?;
        if !remaining.is_empty() {
            return Err("Expected no agents".to_owned());
        }
        Ok(())
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failed_install_persists_nothing_and_failed_stop_keeps_state() -> Result<(), String> {
        let control = Arc::new(FakeControl::default());
        let (manager, _store) = manager(control.clone());
        control.fail.store(true, Ordering::SeqCst);
        if manager.install(&request()).await.is_ok() {
            return Err("Expected install failure".to_owned());
        }
        if !manager
            .list()
            .await
            .map_err(|err| err.to_string())?
            .is_empty()
        {
            return Err("Failed install left a record".to_owned());
        }

        control.fail.store(false, Ordering::SeqCst);
        let record = manager
            .install(&request())
            .await
            .map_err(|err| err.to_string())?;
        manager
            .start(&record.id)
            .await
            .map_err(|err| err.to_string())?;
        control.fail.store(true, Ordering::SeqCst);
        match manager.stop(&record.id).await {
            Err(AppError::Agent(AgentError::Remote { .. })) => {}
            other => return Err(format!("Expected remote error, got {:?}", other)),
        }
        let current = manager
            .get(&record.id)
            .await
            .map_err(|err| err.to_string())?;
        if current.state != AgentState::Running {
            return Err("Failed stop must not change state".to_owned());
        }
        Ok(())
    }

    #[tokio::test(flavor = "current_thread")]
    async fn readiness_and_running_host_checks() -> Result<(), String> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|err| format!("bind failed: {}", err))?;
        let port = listener
            .local_addr()
            .map_err(|err| format!("addr failed: {}", err))?
            .port();
        let store = Arc::new(MemoryStore::<AgentRecord>::new());
        let manager = AgentLifecycleManager::new(
            Arc::new(FakeControl::default()),
            store.clone(),
            port,
            Duration::from_millis(20),
        );
        let record = manager
            .install(&request())
            .await
            .map_err(|err| err.to_string())?;
        match manager.probe_ready(&record.id).await {
            Err(err) if err.kind() == crate::error::ErrorKind::State => {}
            other => return Err(format!("Expected state error, got {:?}", other)),
        }
        if manager.ensure_running_hosts(["127.0.0.1"]).await.is_ok() {
            return Err("Installed agent must not count as running".to_owned());
        }

        manager
            .start(&record.id)
            .await
            .map_err(|err| err.to_string())?;
        manager
            .wait_ready(&record.id, Duration::from_secs(2))
            .await
            .map_err(|err| err.to_string())?;
        manager
            .ensure_running_hosts(["127.0.0.1"])
            .await
            .map_err(|err| err.to_string())?;
        match manager.ensure_running_hosts(["10.9.9.9"]).await {
            Err(AppError::Agent(AgentError::HostNotRunning { .. })) => {}
            other => return Err(format!("Expected HostNotRunning, got {:?}", other)),
        }

        drop(listener);
        match manager
            .wait_ready(&record.id, Duration::from_millis(150))
            .await
        {
            Err(AppError::Agent(AgentError::ReadinessTimeout { .. })) => Ok(()),
            other => Err(format!("Expected readiness timeout, got {:?}", other)),
        }
    }
}
