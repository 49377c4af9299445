//! Version-control mirroring of files the executor changed
//!
//! The tracker is a side channel: callers log its errors and never let them
//! change the outcome of the action that produced the files.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::ChangeTrackingConfig;

const GIT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("git {args} failed: {stderr}")]
    Git { args: String, stderr: String },
    #[error("git {0} timed out")]
    Timeout(String),
    #[error("I/O error ({}): {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[async_trait]
pub trait ChangeTracker: Send + Sync {
    /// Mirror `files` under the unit's folder and commit them.
    ///
    /// Returns `false` when there was nothing to commit.
    async fn record(&self, unit: &str, files: &[PathBuf], message: &str, reason: &str) -> Result<bool, TrackerError>;
}

/// Used when change tracking is switched off
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopChangeTracker;

#[async_trait]
impl ChangeTracker for NoopChangeTracker {
    async fn record(&self, _unit: &str, _files: &[PathBuf], _message: &str, _reason: &str) -> Result<bool, TrackerError> {
        Ok(false)
    }
}

/// Copies changed files into a git working tree and commits them
#[derive(Debug, Clone)]
pub struct GitChangeTracker {
    config: ChangeTrackingConfig,
}

impl GitChangeTracker {
    pub fn new(config: ChangeTrackingConfig) -> Self {
        Self { config }
    }

    /// Commit message: `<prefix> <message>` plus a `Reason:` paragraph when given
    pub fn commit_message(&self, message: &str, reason: &str) -> String {
        let mut full = format!("{} {}", self.config.commit_prefix, message);
        if !reason.is_empty() {
            full.push_str("\n\nReason: ");
            full.push_str(reason);
        }
        full
    }

    async fn git(&self, args: &[&str]) -> Result<String, TrackerError> {
        let joined = args.join(" ");
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.config.repo_path).kill_on_drop(true);
        let output = tokio::time::timeout(Duration::from_secs(GIT_TIMEOUT_SECS), cmd.output())
            .await
            .map_err(|_| TrackerError::Timeout(joined.clone()))?
            .map_err(|e| TrackerError::Git {
                args: joined.clone(),
                stderr: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(TrackerError::Git {
                args: joined,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn ensure_repo(&self) -> Result<(), TrackerError> {
        let repo = &self.config.repo_path;
        std::fs::create_dir_all(repo).map_err(|source| TrackerError::Io {
            path: repo.clone(),
            source,
        })?;
        if !repo.join(".git").exists() {
            self.git(&["init"]).await?;
            info!(repo = %repo.display(), "Initialized change-tracking repository");
        }
        Ok(())
    }

    /// Copy each file into `<repo>/<unit>/`; returns repo-relative paths
    fn mirror(&self, unit: &str, files: &[PathBuf]) -> Result<Vec<String>, TrackerError> {
        let dst_dir = self.config.repo_path.join(unit);
        std::fs::create_dir_all(&dst_dir).map_err(|source| TrackerError::Io {
            path: dst_dir.clone(),
            source,
        })?;
        let mut staged = Vec::with_capacity(files.len());
        for src in files {
            let Some(name) = src.file_name() else { continue };
            let dst = dst_dir.join(name);
            std::fs::copy(src, &dst).map_err(|source| TrackerError::Io {
                path: src.clone(),
                source,
            })?;
            staged.push(Path::new(unit).join(name).to_string_lossy().into_owned());
        }
        Ok(staged)
    }
}

#[async_trait]
impl ChangeTracker for GitChangeTracker {
    async fn record(&self, unit: &str, files: &[PathBuf], message: &str, reason: &str) -> Result<bool, TrackerError> {
        self.ensure_repo().await?;
        let staged = self.mirror(unit, files)?;
        for path in &staged {
            self.git(&["add", path.as_str()]).await?;
        }

        if self.git(&["diff", "--cached", "--name-only"]).await?.is_empty() {
            info!(unit = %unit, "No changes to commit");
            return Ok(false);
        }

        let full = self.commit_message(message, reason);
        self.git(&["commit", "-m", full.as_str()]).await?;
        info!(unit = %unit, "Committed: {}", message);

        if self.config.auto_push {
            let (remote, branch) = (self.config.remote.as_str(), self.config.branch.as_str());
            match self.git(&["push", remote, branch]).await {
                Ok(_) => info!(remote = %remote, branch = %branch, "Pushed change history"),
                Err(e) => warn!(error = %e, "Push failed"),
            }
        }
        Ok(true)
    }
}
