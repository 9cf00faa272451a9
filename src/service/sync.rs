//! Workspace synchronization against upstream.

use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::executor::{self, ExecOptions};
use crate::hooks::HookOptions;
use crate::service::{HookPhase, WorkspaceService};

/// Outcome of syncing one repo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    UpToDate,
    /// Pulled this many commits.
    Updated(usize),
    Timeout,
    Conflict,
    Error(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct RepoSyncResult {
    pub name: String,
    pub outcome: SyncOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub workspace_id: String,
    pub repos: Vec<RepoSyncResult>,
    pub updated: usize,
    pub up_to_date: usize,
    pub failed: usize,
}

impl WorkspaceService {
    /// Sync every repo in a workspace: fetch the canonical under the
    /// per-repo timeout, then pull when behind. Repos are processed in
    /// parallel; each classifies its own outcome so one bad repo never
    /// hides the rest.
    pub fn sync_workspace(&self, ctx: &Context, id: &str) -> Result<SyncReport> {
        let dir = self.lock_dir_for(id);
        self.with_lock(ctx, id, &dir, false, |_handle| {
            self.sync_locked(ctx, id)
        })
    }

    fn sync_locked(&self, ctx: &Context, id: &str) -> Result<SyncReport> {
        let ws = self.store().load(id)?;
        let sync_timeout = Duration::from_secs(self.config().timeouts.sync_secs);

        let repos = executor::map(
            ctx,
            ws.repos.len(),
            &ExecOptions::fail_fast(self.config().workers),
            |task_ctx, idx| {
                let repo = &ws.repos[idx];
                let outcome = self.sync_one(task_ctx, &ws.directory_name, &repo.name, sync_timeout)?;
                Ok(RepoSyncResult {
                    name: repo.name.clone(),
                    outcome,
                })
            },
        )?;

        let updated = repos
            .iter()
            .filter(|r| matches!(r.outcome, SyncOutcome::Updated(_)))
            .count();
        let up_to_date = repos
            .iter()
            .filter(|r| r.outcome == SyncOutcome::UpToDate)
            .count();
        let failed = repos.len() - updated - up_to_date;

        self.hook_executor().execute_hooks(
            ctx,
            self.hooks_for(HookPhase::PostSync),
            &self.hook_context(&ws),
            HookOptions {
                dry_run: false,
                continue_on_error: true,
            },
        )?;

        info!(workspace = id, updated, up_to_date, failed, "synced workspace");
        Ok(SyncReport {
            workspace_id: ws.id,
            repos,
            updated,
            up_to_date,
            failed,
        })
    }

    /// Sync a single repo; only cancellation of the caller propagates as an
    /// error, everything else becomes an outcome.
    fn sync_one(
        &self,
        ctx: &Context,
        dir: &str,
        repo: &str,
        timeout: Duration,
    ) -> Result<SyncOutcome> {
        let fetch_ctx = ctx.with_timeout(timeout);
        match self.git.fetch(&fetch_ctx, &self.canonical_path(repo)) {
            Ok(()) => {}
            Err(Error::Cancelled) => {
                ctx.check()?;
                return Ok(SyncOutcome::Timeout);
            }
            Err(err) => return Ok(SyncOutcome::Error(err.to_string())),
        }

        let worktree = self.worktree_path(dir, repo);
        let status = match self.git.status(ctx, &worktree) {
            Ok(status) => status,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => return Ok(SyncOutcome::Error(err.to_string())),
        };

        if status.behind == 0 {
            return Ok(SyncOutcome::UpToDate);
        }

        match self.git.pull(ctx, &worktree) {
            Ok(()) => Ok(SyncOutcome::Updated(status.behind)),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(err) if is_conflict(&err) => Ok(SyncOutcome::Conflict),
            Err(err) => Ok(SyncOutcome::Error(err.to_string())),
        }
    }
}

fn is_conflict(err: &Error) -> bool {
    match err {
        Error::CommandFailed { stderr, .. } => {
            let text = stderr.to_lowercase();
            text.contains("conflict") || text.contains("fast-forward")
        }
        Error::Git(git_err) => git_err.class() == git2::ErrorClass::Merge,
        _ => false,
    }
}
