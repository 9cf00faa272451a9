//! Running git across a workspace's repos: arbitrary commands, push, and
//! branch switching.

use serde::Serialize;
use tracing::info;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::executor::{self, ExecOptions};
use crate::service::WorkspaceService;
use crate::workspace::{self, Workspace};

/// Worker cap for parallel git runs, independent of configuration.
const GIT_RUN_MAX_WORKERS: usize = 8;

#[derive(Debug, Clone, Copy, Default)]
pub struct GitRunOptions {
    pub parallel: bool,
    pub continue_on_error: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepoCommandResult {
    pub repo: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl WorkspaceService {
    /// Run an arbitrary git command in every worktree.
    ///
    /// A non-zero exit counts as a failure. Sequential mode halts at the
    /// first failure; parallel mode (capped at 8 workers) cancels the
    /// remaining repos. `continue_on_error` collects everything instead.
    pub fn run_git_in_workspace(
        &self,
        ctx: &Context,
        id: &str,
        args: &[String],
        opts: GitRunOptions,
    ) -> Result<Vec<RepoCommandResult>> {
        if args.is_empty() {
            return Err(Error::InvalidArgument("no git arguments given".into()));
        }
        let dir = self.lock_dir_for(id);
        self.with_lock(ctx, id, &dir, false, |_handle| {
            let ws = self.store().load(id)?;
            let workers = if opts.parallel {
                self.config().workers.min(GIT_RUN_MAX_WORKERS)
            } else {
                1
            };

            executor::map(
                ctx,
                ws.repos.len(),
                &ExecOptions {
                    workers,
                    continue_on_error: opts.continue_on_error,
                    aggregate_errors: false,
                },
                |task_ctx, idx| {
                    let repo = &ws.repos[idx];
                    let worktree = self.worktree_path(&ws.directory_name, &repo.name);
                    let output = self.git.run(task_ctx, &worktree, args)?;
                    if output.exit_code != 0 && !opts.continue_on_error {
                        return Err(Error::CommandFailed {
                            command: format!("git {} [{}]", args.join(" "), repo.name),
                            exit_code: output.exit_code,
                            stderr: output.stderr.trim_end().to_string(),
                        });
                    }
                    Ok(RepoCommandResult {
                        repo: repo.name.clone(),
                        stdout: output.stdout,
                        stderr: output.stderr,
                        exit_code: output.exit_code,
                    })
                },
            )
        })
    }

    /// Push every repo's branch, collecting failures across repos.
    pub fn push_workspace(&self, ctx: &Context, id: &str) -> Result<Vec<String>> {
        let dir = self.lock_dir_for(id);
        self.with_lock(ctx, id, &dir, false, |_handle| {
            let ws = self.store().load(id)?;
            executor::run(
                ctx,
                ws.repos.len(),
                &ExecOptions::collect_all(self.config().workers),
                |task_ctx, idx| {
                    let repo = &ws.repos[idx];
                    self.git
                        .push(task_ctx, &self.worktree_path(&ws.directory_name, &repo.name))
                },
            )?;
            info!(workspace = id, repos = ws.repos.len(), "pushed workspace");
            Ok(ws.repos.iter().map(|r| r.name.clone()).collect())
        })
    }

    /// Check out a branch in every worktree (creating it if needed) and
    /// persist the new branch on the record.
    pub fn switch_branch(&self, ctx: &Context, id: &str, branch: &str) -> Result<Workspace> {
        workspace::validate_branch(branch)?;
        let dir = self.lock_dir_for(id);
        self.with_lock(ctx, id, &dir, false, |_handle| {
            let mut ws = self.store().load(id)?;

            executor::run(
                ctx,
                ws.repos.len(),
                &ExecOptions::fail_fast(self.config().workers),
                |task_ctx, idx| {
                    let repo = &ws.repos[idx];
                    self.git.checkout(
                        task_ctx,
                        &self.worktree_path(&ws.directory_name, &repo.name),
                        branch,
                        true,
                    )
                },
            )?;

            ws.branch_name = branch.to_string();
            self.store().save(&ws)?;
            self.invalidate(id);
            info!(workspace = id, branch, "switched branch");
            Ok(ws)
        })
    }
}
