//! Workspace close: delete outright, or archive metadata for later restore.

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::context::Context;
use crate::error::Result;
use crate::executor::{self, ExecOptions};
use crate::hooks::HookOptions;
use crate::service::{HookPhase, WorkspaceService};

#[derive(Debug, Clone, Copy, Default)]
pub struct CloseOptions {
    /// Archive the record instead of deleting it.
    pub keep_metadata: bool,
    /// Skip the clean/pushed preconditions.
    pub force: bool,
    pub skip_hooks: bool,
    pub continue_on_hook_err: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepoCloseState {
    pub name: String,
    pub is_dirty: bool,
    pub unpushed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClosePreview {
    pub workspace_id: String,
    pub branch_name: String,
    pub repos: Vec<RepoCloseState>,
    /// Whether a non-forced close would proceed.
    pub clean: bool,
}

impl WorkspaceService {
    /// Close a workspace.
    ///
    /// Without `force`, every repo must be clean with nothing unpushed.
    /// Pre-close hooks run before anything destructive and abort the close
    /// on failure. The record is deleted (or archived then deleted) first;
    /// worktree cleanup afterwards is best effort, so metadata never points
    /// into a half-removed directory.
    pub fn close_workspace(&self, ctx: &Context, id: &str, opts: CloseOptions) -> Result<()> {
        let dir = self.lock_dir_for(id);
        self.with_lock(ctx, id, &dir, false, |_handle| {
            self.close_locked(ctx, id, opts)
        })
    }

    /// Close body, for callers already holding the workspace lock.
    pub(crate) fn close_locked(&self, ctx: &Context, id: &str, opts: CloseOptions) -> Result<()> {
        let ws = self.store().load(id)?;

        if !opts.force {
            self.verify_repos_clean(ctx, &ws)?;
        }

        if !opts.skip_hooks {
            self.hook_executor().execute_hooks(
                ctx,
                self.hooks_for(HookPhase::PreClose),
                &self.hook_context(&ws),
                HookOptions {
                    dry_run: false,
                    continue_on_error: opts.continue_on_hook_err,
                },
            )?;
        }

        if opts.keep_metadata {
            let closed = self.store().close(id, Utc::now())?;
            if let Err(err) = self.store().delete(id) {
                // Keep exactly one authoritative record: drop the archive
                // entry again and surface the delete failure.
                let err = match self.store().delete_closed(id, closed.closed_at) {
                    Ok(()) => err,
                    Err(cleanup) => err.join(cleanup),
                };
                return Err(err);
            }
            info!(workspace = id, "closed workspace (metadata kept)");
        } else {
            self.store().delete(id)?;
            info!(workspace = id, "closed workspace (deleted)");
        }

        // Record first, worktrees second; cleanup failures only log.
        self.remove_worktrees_best_effort(&Context::background(), &ws);
        self.invalidate(id);
        Ok(())
    }

    /// Report what a close would find, without mutating anything.
    pub fn preview_close(&self, ctx: &Context, id: &str) -> Result<ClosePreview> {
        let (ws, dir) = self.find_workspace(id)?;

        let repos = executor::map(
            ctx,
            ws.repos.len(),
            &ExecOptions::fail_fast(self.config().workers),
            |task_ctx, idx| {
                let repo = &ws.repos[idx];
                Ok(
                    match self.git().status(task_ctx, &self.worktree_path(&dir, &repo.name)) {
                        Ok(status) => RepoCloseState {
                            name: repo.name.clone(),
                            is_dirty: status.is_dirty,
                            unpushed: status.unpushed,
                            error: None,
                        },
                        Err(err) => RepoCloseState {
                            name: repo.name.clone(),
                            is_dirty: false,
                            unpushed: 0,
                            error: Some(err.to_string()),
                        },
                    },
                )
            },
        )?;

        let clean = repos
            .iter()
            .all(|r| !r.is_dirty && r.unpushed == 0 && r.error.is_none());
        Ok(ClosePreview {
            workspace_id: ws.id,
            branch_name: ws.branch_name,
            repos,
            clean,
        })
    }
}
