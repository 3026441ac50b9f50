use std::path::{Path, PathBuf};

use crate::domain::RunId;
use crate::error::RunError;

/// Per-run directory pair. `report_dir` lives inside `dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub dir: PathBuf,
    pub report_dir: PathBuf,
}

impl Workspace {
    #[must_use]
    pub fn properties_file(&self, run_id: &RunId) -> PathBuf {
        self.dir.join(format!("config_{}.properties", run_id))
    }

    #[must_use]
    pub fn result_file(&self, run_id: &RunId) -> PathBuf {
        self.dir.join(format!("result_general_{}.csv", run_id))
    }

    /// Path prefix handed to the test plan's monitor listeners; each writes
    /// `<prefix>_<kind>_result.csv`.
    #[must_use]
    pub fn metrics_prefix(&self, run_id: &RunId) -> PathBuf {
        self.dir.join(run_id.as_str())
    }

    #[must_use]
    pub fn output_log(&self, run_id: &RunId) -> PathBuf {
        self.dir.join(format!("generator_{}.log", run_id))
    }
}

#[derive(Debug, Clone)]
pub struct WorkspaceAllocator {
    root: PathBuf,
}

impl WorkspaceAllocator {
    #[must_use]
    pub const fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn layout(&self, run_id: &RunId) -> Workspace {
        let dir = self.root.join(run_id.as_str());
        let report_dir = dir.join(format!("report_{}", run_id));
        Workspace { dir, report_dir }
    }

    /// Creates `<root>/<run_id>` and its report directory.
    ///
    /// Both directories are created exclusively; an existing directory is an
    /// error rather than something to reuse.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::CreateWorkspace`] when either directory already
    /// exists or cannot be created.
    pub async fn allocate(&self, run_id: &RunId) -> Result<Workspace, RunError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| RunError::CreateWorkspace {
                path: self.root.clone(),
                source,
            })?;
        let workspace = self.layout(run_id);
        for dir in [&workspace.dir, &workspace.report_dir] {
            tokio::fs::create_dir(dir)
                .await
                .map_err(|source| RunError::CreateWorkspace {
                    path: dir.clone(),
                    source,
                })?;
        }
        Ok(workspace)
    }
}
