//! Orphaned-worktree detection.
//!
//! Reconciles workspace metadata against what is actually on disk. Each
//! (workspace, repo) pair is checked in a fixed order and classified by the
//! first failing check: the canonical clone is gone, the worktree directory
//! is gone, or the worktree's `.git` marker is broken.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::context::Context;
use crate::error::Result;
use crate::git::GitOps;
use crate::store::WorkspaceStore;
use crate::workspace::Workspace;

/// Why a worktree entry is considered orphaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanReason {
    CanonicalMissing,
    DirectoryMissing,
    InvalidGitDir,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrphanedWorktree {
    pub workspace_id: String,
    pub repo_name: String,
    pub worktree_path: PathBuf,
    pub reason: OrphanReason,
}

/// Structural checks over workspaces, canonical clones, and worktrees.
pub struct OrphanDetector {
    store: Arc<dyn WorkspaceStore>,
    git: Arc<dyn GitOps>,
    workspaces_root: PathBuf,
    projects_root: PathBuf,
}

impl OrphanDetector {
    pub fn new(
        store: Arc<dyn WorkspaceStore>,
        git: Arc<dyn GitOps>,
        workspaces_root: PathBuf,
        projects_root: PathBuf,
    ) -> Self {
        Self {
            store,
            git,
            workspaces_root,
            projects_root,
        }
    }

    /// Detect orphans across every active workspace.
    pub fn detect_all(&self, ctx: &Context) -> Result<Vec<OrphanedWorktree>> {
        let canonical = self.canonical_set(ctx)?;
        let mut orphans = Vec::new();
        for ws in self.store.list()? {
            ctx.check()?;
            self.detect_in(&ws, &canonical, &mut orphans);
        }
        Ok(orphans)
    }

    /// Detect orphans in a single workspace.
    pub fn detect_for(&self, ctx: &Context, workspace_id: &str) -> Result<Vec<OrphanedWorktree>> {
        let canonical = self.canonical_set(ctx)?;
        let ws = self.store.load(workspace_id)?;
        let mut orphans = Vec::new();
        self.detect_in(&ws, &canonical, &mut orphans);
        Ok(orphans)
    }

    /// Run `git worktree prune` over every canonical clone.
    ///
    /// Per-repo failures are logged, never fatal; the pass is idempotent.
    pub fn prune_all_worktrees(&self, ctx: &Context) -> Result<()> {
        for name in self.git.list_canonical(ctx)? {
            ctx.check()?;
            let path = self.projects_root.join(&name);
            if let Err(err) = self.git.prune_worktrees(ctx, &path) {
                warn!(repo = %name, error = %err, "worktree prune failed");
            }
        }
        Ok(())
    }

    fn canonical_set(&self, ctx: &Context) -> Result<BTreeSet<String>> {
        Ok(self.git.list_canonical(ctx)?.into_iter().collect())
    }

    fn detect_in(
        &self,
        ws: &Workspace,
        canonical: &BTreeSet<String>,
        orphans: &mut Vec<OrphanedWorktree>,
    ) {
        for repo in &ws.repos {
            let worktree_path = self
                .workspaces_root
                .join(&ws.directory_name)
                .join(&repo.name);

            let reason = if !canonical.contains(&repo.name) {
                Some(OrphanReason::CanonicalMissing)
            } else if !worktree_path.exists() {
                Some(OrphanReason::DirectoryMissing)
            } else if !is_valid_git_marker(&worktree_path.join(".git")) {
                Some(OrphanReason::InvalidGitDir)
            } else {
                None
            };

            if let Some(reason) = reason {
                orphans.push(OrphanedWorktree {
                    workspace_id: ws.id.clone(),
                    repo_name: repo.name.clone(),
                    worktree_path,
                    reason,
                });
            }
        }
    }
}

/// A worktree's `.git` entry is either a real directory or a pointer file
/// starting with `gitdir:`.
fn is_valid_git_marker(path: &Path) -> bool {
    if path.is_dir() {
        return true;
    }
    if path.is_file() {
        return std::fs::read_to_string(path)
            .map(|text| text.trim_start().starts_with("gitdir:"))
            .unwrap_or(false);
    }
    false
}
