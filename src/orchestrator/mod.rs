//! Run orchestration: workspace allocation, invocation compilation, launch
//! supervision, result reading and retention.
mod compile;
mod launch;
mod metrics;
mod reaper;
mod results;
mod summary;
mod workspace;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain::{ExecutionMode, RunId, RunRecord, RunRequest, RunStatus, now_ms};
use crate::error::{AppError, AppResult, RunError};
use crate::store::{KeyedLocks, RecordStore};

pub use compile::{
    CommandLine, CompiledRun, Generator, command_line, compile, properties,
    render_properties, validate,
};
pub use launch::{ExecutionOutcome, Launcher};
pub use metrics::{
    MetricFailure, MetricKind, MetricSample, MetricSeries, RunMetrics, read_metrics,
};
pub use reaper::{Reaper, ReaperHandle, SweepReport};
pub use results::{ResultReader, ResultRow};
pub use summary::{LabelSummary, summarize};
pub use workspace::{Workspace, WorkspaceAllocator};

/// Owns every [`RunRecord`]; the only component that changes run status.
pub struct RunOrchestrator {
    allocator: WorkspaceAllocator,
    generator: Generator,
    launcher: Launcher,
    runs: Arc<dyn RecordStore<RunRecord>>,
    locks: KeyedLocks,
}

impl std::fmt::Debug for RunOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOrchestrator")
            .field("allocator", &self.allocator)
            .field("generator", &self.generator)
            .field("launcher", &self.launcher)
            .finish_non_exhaustive()
    }
}

impl RunOrchestrator {
    #[must_use]
    pub fn new(
        allocator: WorkspaceAllocator,
        generator: Generator,
        launcher: Launcher,
        runs: Arc<dyn RecordStore<RunRecord>>,
    ) -> Self {
        Self {
            allocator,
            generator,
            launcher,
            runs,
            locks: KeyedLocks::new(),
        }
    }

    /// Reaper sharing this orchestrator's store and per-run locks.
    #[must_use]
    pub fn reaper(&self, retention: Duration) -> Reaper {
        Reaper::new(
            self.allocator.root().to_path_buf(),
            Arc::clone(&self.runs),
            self.locks.clone(),
            retention,
        )
    }

    /// Allocates, compiles and launches one run.
    ///
    /// A request that fails validation leaves no trace. Once the record
    /// exists every later failure is persisted as `Failed` before the error is
    /// returned. A generator that exits non-zero is not an error: the returned
    /// record is `Failed` and carries the captured output.
    ///
    /// # Errors
    ///
    /// Returns validation, workspace, launch or store errors.
    pub async fn submit(&self, request: &RunRequest, mode: ExecutionMode) -> AppResult<RunRecord> {
        compile::validate(request)?;

        let run_id = RunId::generate();
        // Held until the record exists so a sweep never meets a bare workspace.
        let guard = self.locks.lock(run_id.as_str()).await;
        let workspace = self.allocator.allocate(&run_id).await?;
        let mut record = RunRecord {
            result_file: workspace.result_file(&run_id),
            output_log: workspace.output_log(&run_id),
            created_at_ms: run_id.created_at_ms().unwrap_or_else(now_ms),
            workspace: workspace.dir.clone(),
            report_dir: workspace.report_dir.clone(),
            id: run_id.clone(),
            status: RunStatus::Created,
            mode,
            remote_hosts: Vec::new(),
            started_at_ms: None,
            finished_at_ms: None,
            exit_code: None,
            diagnostic: None,
        };
        self.runs.insert(&record).await?;
        drop(guard);
        info!(run_id = %run_id, mode = ?mode, "Run created");

        let compiled = match compile::compile(request, &run_id, &workspace, &self.generator).await
        {
            Ok(compiled) => compiled,
            Err(err) => {
                self.record_failure(&mut record, &err).await?;
                return Err(err);
            }
        };
        record.remote_hosts.clone_from(&compiled.remote_hosts);
        record.mark_running(now_ms())?;
        self.persist(&record).await?;
        info!(
            run_id = %run_id,
            remote_hosts = compiled.remote_hosts.len(),
            command = %compiled.command,
            "Run started"
        );

        let outcome = match self
            .launcher
            .launch(&compiled.command, mode, &record.output_log)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                let err = AppError::run(err);
                self.record_failure(&mut record, &err).await?;
                return Err(err);
            }
        };

        match outcome {
            ExecutionOutcome::Exited {
                success: true,
                exit_code,
                ..
            } => {
                record.mark_succeeded(now_ms(), exit_code)?;
                info!(run_id = %run_id, "Run succeeded");
            }
            ExecutionOutcome::Exited {
                success: false,
                exit_code,
                status,
                output,
            } => {
                warn!(run_id = %run_id, status = %status, "Run failed");
                record.mark_failed(now_ms(), exit_code, output)?;
            }
            ExecutionOutcome::TimedOut { timeout } => {
                warn!(run_id = %run_id, timeout = ?timeout, "Run timed out");
                record.mark_failed(
                    now_ms(),
                    None,
                    format!("generator killed after exceeding timeout of {:?}", timeout),
                )?;
            }
            ExecutionOutcome::Detached { pid } => {
                info!(run_id = %run_id, pid = ?pid, "Run detached");
                return Ok(record);
            }
        }
        self.persist(&record).await?;
        Ok(record)
    }

    /// Writes one state change under the run's lock. The lock is never held
    /// while the generator runs.
    async fn persist(&self, record: &RunRecord) -> AppResult<()> {
        let _guard = self.locks.lock(record.id.as_str()).await;
        self.runs.update(record).await?;
        Ok(())
    }

    async fn record_failure(&self, record: &mut RunRecord, err: &AppError) -> AppResult<()> {
        warn!(run_id = %record.id, "Run failed: {}", err);
        record.mark_failed(now_ms(), None, err.to_string())?;
        self.persist(record).await
    }

    /// Current record of a run. A detached run is resolved to `Succeeded`
    /// once its result artifact exists.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::RunNotFound`] for an unknown id.
    pub async fn status(&self, run_id: &RunId) -> AppResult<RunRecord> {
        let _guard = self.locks.lock(run_id.as_str()).await;
        let mut record = self.find(run_id).await?;
        if record.status == RunStatus::Running
            && record.mode == ExecutionMode::Detached
            && tokio::fs::try_exists(&record.result_file)
                .await
                .unwrap_or(false)
        {
            record.mark_succeeded(now_ms(), None)?;
            self.runs.update(&record).await?;
            info!(run_id = %run_id, "Detached run produced its result artifact");
        }
        Ok(record)
    }

    async fn find(&self, run_id: &RunId) -> AppResult<RunRecord> {
        self.runs
            .find_by_id(run_id.as_str())
            .await?
            .ok_or_else(|| {
                AppError::run(RunError::RunNotFound {
                    run_id: run_id.to_string(),
                })
            })
    }

    /// Opens a fresh reader over the run's result artifact.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown run or a missing artifact.
    pub async fn open_results(&self, run_id: &RunId) -> AppResult<ResultReader> {
        let record = self.find(run_id).await?;
        Ok(ResultReader::open(&record.result_file).await?)
    }

    /// # Errors
    ///
    /// Returns not-found or parse errors from the result artifact.
    pub async fn read_results(&self, run_id: &RunId) -> AppResult<Vec<ResultRow>> {
        Ok(self.open_results(run_id).await?.collect_rows().await?)
    }

    /// # Errors
    ///
    /// Returns not-found or parse errors from the result artifact.
    pub async fn summary(&self, run_id: &RunId) -> AppResult<Vec<LabelSummary>> {
        let rows = self.read_results(run_id).await?;
        Ok(summarize(&rows)?)
    }

    /// Host resource samples the agents recorded for the run. Available as
    /// soon as the files exist; the run need not be finished.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown run and parse errors from the
    /// metric files.
    pub async fn metrics(&self, run_id: &RunId) -> AppResult<RunMetrics> {
        let record = self.find(run_id).await?;
        Ok(read_metrics(&record.workspace, run_id).await?)
    }

    /// All runs, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails.
    pub async fn list(&self) -> AppResult<Vec<RunRecord>> {
        let mut runs = self.runs.list().await?;
        runs.sort_by(|left, right| right.id.cmp(&left.id));
        Ok(runs)
    }
}
