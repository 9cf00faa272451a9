//! Restoring closed workspaces.

use tracing::info;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::rollback::RollbackOp;
use crate::service::{CloseOptions, WorkspaceService};
use crate::workspace::{ClosedWorkspace, Workspace};

impl WorkspaceService {
    /// Restore the most recently closed entry for an id.
    ///
    /// An existing active workspace with the same id fails with
    /// `workspace-exists` unless `force`, which close-deletes it first.
    /// Re-creation and dropping the closed entry form one rollback
    /// operation, so a failed restore leaves the archive intact.
    pub fn restore_workspace(&self, ctx: &Context, id: &str, force: bool) -> Result<Workspace> {
        let closed = self
            .store()
            .latest_closed(id)?
            .ok_or_else(|| Error::WorkspaceNotFound(id.to_string()))?;

        let dir = closed.directory_name.clone();
        let dir_existed = self.workspace_path(&dir).exists();

        let result = self.with_lock(ctx, id, &dir, true, |_handle| {
            self.restore_locked(ctx, &closed, force)
        });

        if result.is_err() && !dir_existed {
            // Rollback inside the lock already removed any provisioned
            // state; this only clears the empty directory acquire created.
            let _ = std::fs::remove_dir(self.workspace_path(&dir));
        }
        result
    }

    fn restore_locked(
        &self,
        ctx: &Context,
        closed: &ClosedWorkspace,
        force: bool,
    ) -> Result<Workspace> {
        let id = closed.workspace.id.as_str();

        if self.store().load(id).is_ok() {
            if !force {
                return Err(Error::WorkspaceExists(id.to_string()));
            }
            // Full close semantics for the incumbent, under our lock.
            self.close_locked(
                ctx,
                id,
                CloseOptions {
                    keep_metadata: false,
                    force: true,
                    skip_hooks: false,
                    continue_on_hook_err: false,
                },
            )?;
        }

        let ws = closed.workspace.clone();
        let store = self.store();

        RollbackOp::new()
            .step(
                "re-create metadata",
                || store.create(&ws),
                || {
                    let _ = store.delete(id);
                    Ok(())
                },
            )
            .step(
                "provision repos",
                || {
                    self.provision_repos(ctx, &ws).map_err(|err| {
                        self.remove_worktrees_best_effort(&Context::background(), &ws);
                        err
                    })
                },
                || {
                    self.remove_worktrees_best_effort(&Context::background(), &ws);
                    Ok(())
                },
            )
            .step_no_undo("drop closed entry", || {
                store.delete_closed(id, closed.closed_at)
            })
            .execute()?;

        self.invalidate(id);
        info!(workspace = id, "restored workspace");
        Ok(ws)
    }
}
