//! Aggregate workspace status.

use std::time::Duration;

use serde::Serialize;

use crate::context::Context;
use crate::error::Result;
use crate::executor::{self, ExecOptions};
use crate::git::RepoStatus;
use crate::service::WorkspaceService;

#[derive(Debug, Clone, Serialize)]
pub struct RepoStatusEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RepoStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceStatus {
    pub workspace_id: String,
    pub branch_name: String,
    pub setup_incomplete: bool,
    pub repos: Vec<RepoStatusEntry>,
}

impl WorkspaceService {
    /// Per-repo status for one workspace, queried in parallel.
    pub fn get_status(&self, ctx: &Context, id: &str) -> Result<WorkspaceStatus> {
        let (ws, dir) = self.find_workspace(id)?;

        let repos = executor::map(
            ctx,
            ws.repos.len(),
            &ExecOptions::fail_fast(self.config().workers),
            |task_ctx, idx| {
                let repo = &ws.repos[idx];
                Ok(
                    match self.git.status(task_ctx, &self.worktree_path(&dir, &repo.name)) {
                        Ok(status) => RepoStatusEntry {
                            name: repo.name.clone(),
                            status: Some(status),
                            error: None,
                        },
                        Err(err) => RepoStatusEntry {
                            name: repo.name.clone(),
                            status: None,
                            error: Some(err.to_string()),
                        },
                    },
                )
            },
        )?;

        Ok(WorkspaceStatus {
            workspace_id: ws.id,
            branch_name: ws.branch_name,
            setup_incomplete: ws.setup_incomplete,
            repos,
        })
    }

    /// Status for many workspaces; results come back in input order.
    ///
    /// Each workspace is bounded by `per_workspace_timeout` when given.
    pub fn get_status_batch(
        &self,
        ctx: &Context,
        ids: &[String],
        per_workspace_timeout: Option<Duration>,
    ) -> Result<Vec<Result<WorkspaceStatus>>> {
        let workers = if ids.len() > 1 { self.config().workers } else { 1 };
        executor::map(
            ctx,
            ids.len(),
            &ExecOptions {
                workers,
                continue_on_error: true,
                aggregate_errors: false,
            },
            |task_ctx, idx| {
                let ws_ctx = match per_workspace_timeout {
                    Some(timeout) => task_ctx.with_timeout(timeout),
                    None => task_ctx.clone(),
                };
                Ok(self.get_status(&ws_ctx, &ids[idx]))
            },
        )
    }
}
