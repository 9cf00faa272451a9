//! Bulk operations over regex-matched workspaces.
//!
//! Result slices always preserve the order of the matched input set,
//! independent of completion order.

use regex::Regex;
use serde::Serialize;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::executor::{self, ExecOptions};
use crate::service::{CloseOptions, SyncReport, WorkspaceService};

/// Per-workspace result of a bulk operation.
#[derive(Debug, Clone, Serialize)]
pub struct BulkOutcome {
    pub workspace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkspaceService {
    fn matching_ids(&self, pattern: &str) -> Result<Vec<String>> {
        if pattern.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "bulk pattern cannot be blank".to_string(),
            ));
        }
        let re = Regex::new(pattern)
            .map_err(|err| Error::InvalidArgument(format!("bad pattern {pattern:?}: {err}")))?;
        Ok(self
            .list_active()?
            .into_iter()
            .filter(|ws| re.is_match(&ws.id))
            .map(|ws| ws.id)
            .collect())
    }

    /// Close every workspace whose id matches the pattern, sequentially.
    pub fn close_workspaces_matching(
        &self,
        ctx: &Context,
        pattern: &str,
        opts: CloseOptions,
    ) -> Result<Vec<BulkOutcome>> {
        let ids = self.matching_ids(pattern)?;
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            ctx.check()?;
            let error = self.close_workspace(ctx, &id, opts).err();
            outcomes.push(BulkOutcome {
                workspace_id: id,
                sync: None,
                error: error.map(|e| e.to_string()),
            });
        }
        Ok(outcomes)
    }

    /// Sync every workspace whose id matches the pattern, in parallel.
    ///
    /// Every workspace runs regardless of other failures; per-workspace
    /// errors land in the outcome slice.
    pub fn sync_workspaces_matching(
        &self,
        ctx: &Context,
        pattern: &str,
    ) -> Result<Vec<BulkOutcome>> {
        let ids = self.matching_ids(pattern)?;
        executor::map(
            ctx,
            ids.len(),
            &ExecOptions {
                workers: self.config().workers,
                continue_on_error: true,
                aggregate_errors: false,
            },
            |task_ctx, idx| {
                let id = &ids[idx];
                Ok(match self.sync_workspace(task_ctx, id) {
                    Ok(report) => BulkOutcome {
                        workspace_id: id.clone(),
                        sync: Some(report),
                        error: None,
                    },
                    Err(err) => BulkOutcome {
                        workspace_id: id.clone(),
                        sync: None,
                        error: Some(err.to_string()),
                    },
                })
            },
        )
    }
}
