//! Version-control committer for rendered deliverables.
//!
//! One commit per ticket, on a per-ticket branch. The git implementation
//! shells out to the `git` binary in a working clone; failures surface as
//! `VigilError::Commit` and are reported per ticket.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use vigil_shared::{Result, VigilError};

use crate::render::RenderedFile;

/// Commits rendered deliverables to version control.
#[async_trait]
pub trait Committer: Send + Sync {
    async fn commit(&self, branch: &str, files: &[RenderedFile], message: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// GitCommitter
// ---------------------------------------------------------------------------

/// Commits via the `git` binary in an existing clone.
///
/// The checkout, add, and commit of one ticket share a single working
/// tree, so commits from concurrent batch workers are serialized here.
pub struct GitCommitter {
    workdir: PathBuf,
    commit_lock: Mutex<()>,
}

impl GitCommitter {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            commit_lock: Mutex::new(()),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<()> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .await
            .map_err(|e| VigilError::Commit(format!("git {}: {e}", args.join(" "))))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VigilError::Commit(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        debug!(args = ?args, "git ok");
        Ok(())
    }

    async fn write_file(&self, file: &RenderedFile) -> Result<()> {
        let path = self.workdir.join(&file.path);
        if path_escapes(&file.path) {
            return Err(VigilError::Commit(format!(
                "deliverable path escapes the repository: {}",
                file.path
            )));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VigilError::io(parent, e))?;
        }
        tokio::fs::write(&path, &file.content)
            .await
            .map_err(|e| VigilError::io(&path, e))?;
        Ok(())
    }
}

fn path_escapes(rel: &str) -> bool {
    let p = Path::new(rel);
    p.is_absolute() || p.components().any(|c| matches!(c, std::path::Component::ParentDir))
}

#[async_trait]
impl Committer for GitCommitter {
    #[instrument(skip_all, fields(branch = %branch, files = files.len()))]
    async fn commit(&self, branch: &str, files: &[RenderedFile], message: &str) -> Result<()> {
        let _tree = self.commit_lock.lock().await;
        self.git(&["checkout", "-B", branch]).await?;
        for file in files {
            self.write_file(file).await?;
            self.git(&["add", "--", &file.path]).await?;
        }
        self.git(&["commit", "-m", message]).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// NoopCommitter
// ---------------------------------------------------------------------------

/// Discards commits. Used for dry runs.
pub struct NoopCommitter;

#[async_trait]
impl Committer for NoopCommitter {
    async fn commit(&self, _branch: &str, _files: &[RenderedFile], _message: &str) -> Result<()> {
        Ok(())
    }
}
