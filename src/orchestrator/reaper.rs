use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{RunId, RunRecord};
use crate::error::{AppError, AppResult, RunError};
use crate::store::{KeyedLocks, RecordStore};

/// Outcome of a single sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Workspaces removed, or that would be removed in a dry run.
    pub removed: Vec<String>,
    /// Expired workspaces kept because their run has not finished.
    pub active: Vec<String>,
    /// Expired records deleted whose workspace was already gone.
    pub orphaned: Vec<String>,
}

/// Evicts workspaces (and their run records) older than the retention window.
#[derive(Clone)]
pub struct Reaper {
    root: PathBuf,
    runs: Arc<dyn RecordStore<RunRecord>>,
    locks: KeyedLocks,
    retention: Duration,
}

impl std::fmt::Debug for Reaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaper")
            .field("root", &self.root)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl Reaper {
    #[must_use]
    pub fn new(
        root: PathBuf,
        runs: Arc<dyn RecordStore<RunRecord>>,
        locks: KeyedLocks,
        retention: Duration,
    ) -> Self {
        Self {
            root,
            runs,
            locks,
            retention,
        }
    }

    #[must_use]
    pub const fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    fn is_expired(&self, created_at_ms: u64, now_ms: u64) -> bool {
        let retention_ms = u64::try_from(self.retention.as_millis()).unwrap_or(u64::MAX);
        now_ms.saturating_sub(created_at_ms) > retention_ms
    }

    /// Runs one pass over the workspace root.
    ///
    /// Age comes from the run id embedded in the directory name. Directories
    /// whose name is not a run id are left alone, as is any workspace whose
    /// run is still `Created` or `Running`.
    ///
    /// # Errors
    ///
    /// Returns an error when the workspace root cannot be listed or the record
    /// store fails. Failure to delete a single directory is logged and the
    /// sweep continues.
    pub async fn sweep_once(&self, now_ms: u64, dry_run: bool) -> AppResult<SweepReport> {
        let mut report = SweepReport::default();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(source) => {
                return Err(AppError::run(RunError::Io {
                    context: "list workspace root",
                    source,
                }));
            }
        };

        loop {
            let entry = entries.next_entry().await.map_err(|source| {
                AppError::run(RunError::Io {
                    context: "list workspace root",
                    source,
                })
            })?;
            let Some(entry) = entry else { break };
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(run_id) = RunId::parse(&name) else {
                debug!(dir = %name, "Skipping non-run directory");
                continue;
            };
            let Some(created_at_ms) = run_id.created_at_ms() else {
                continue;
            };
            if !self.is_expired(created_at_ms, now_ms) {
                continue;
            }

            // A held lock means the run is being written right now.
            let Some(_guard) = self.locks.try_lock(run_id.as_str()) else {
                report.active.push(name);
                continue;
            };
            let record = self.runs.find_by_id(run_id.as_str()).await?;
            if record.as_ref().is_some_and(|run| !run.status.is_terminal()) {
                report.active.push(name);
                continue;
            }
            if dry_run {
                report.removed.push(name);
                continue;
            }
            if let Err(err) = tokio::fs::remove_dir_all(entry.path()).await {
                warn!(run_id = %run_id, "Failed to remove workspace: {}", err);
                continue;
            }
            if record.is_some() {
                self.runs.delete_by_id(run_id.as_str()).await?;
            }
            report.removed.push(name);
        }

        for run in self.runs.list().await? {
            if !run.status.is_terminal()
                || !self.is_expired(run.created_at_ms, now_ms)
                || report.removed.iter().any(|name| name == run.id.as_str())
            {
                continue;
            }
            let Some(_guard) = self.locks.try_lock(run.id.as_str()) else {
                continue;
            };
            if tokio::fs::try_exists(&run.workspace).await.unwrap_or(true) {
                continue;
            }
            if !dry_run {
                self.runs.delete_by_id(run.id.as_str()).await?;
            }
            report.orphaned.push(run.id.to_string());
        }

        if !report.removed.is_empty() || !report.orphaned.is_empty() {
            info!(
                removed = report.removed.len(),
                orphaned = report.orphaned.len(),
                active = report.active.len(),
                dry_run,
                "Retention sweep finished"
            );
        }
        Ok(report)
    }

    /// Starts the periodic sweep on its own task.
    #[must_use]
    pub fn spawn(self, interval: Duration) -> ReaperHandle {
        let (stop_tx, mut stop_rx) = mpsc::channel::<oneshot::Sender<()>>(1);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    stop = stop_rx.recv() => {
                        if let Some(ack) = stop {
                            drop(ack.send(()));
                        }
                        break;
                    }
                    _ = ticker.tick() => {
                        tokio::select! {
                            stop = stop_rx.recv() => {
                                debug!("Retention sweep abandoned for shutdown");
                                if let Some(ack) = stop {
                                    drop(ack.send(()));
                                }
                                break;
                            }
                            swept = self.sweep_once(crate::domain::now_ms(), false) => {
                                if let Err(err) = swept {
                                    warn!("Retention sweep failed: {}", err);
                                }
                            }
                        }
                    }
                }
            }
            debug!("Retention reaper stopped");
        });
        ReaperHandle { stop_tx, task }
    }
}

/// Owner of a running reaper task. Consumed by [`ReaperHandle::shutdown`].
#[derive(Debug)]
pub struct ReaperHandle {
    stop_tx: mpsc::Sender<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Asks the reaper to stop and waits until it has acknowledged and exited.
    /// A sweep in progress is abandoned.
    ///
    /// # Errors
    ///
    /// Returns an error when the task already exited or panicked.
    pub async fn shutdown(self) -> AppResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.stop_tx
            .send(ack_tx)
            .await
            .map_err(|_closed| AppError::TaskGone { task: "reaper" })?;
        ack_rx
            .await
            .map_err(|_dropped| AppError::TaskGone { task: "reaper" })?;
        self.task.await?;
        Ok(())
    }
}
