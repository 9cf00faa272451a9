//! Workspace rename, with optional branch rename.

use tracing::{info, warn};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::lock::LockHandle;
use crate::service::{CloseOptions, WorkspaceService};
use crate::workspace::{self, Workspace};

#[derive(Debug, Clone, Copy, Default)]
pub struct RenameOptions {
    /// Also rename the branch, when it matches the old workspace id.
    pub rename_branch: bool,
    /// Close-delete a workspace already occupying the new id.
    pub force: bool,
}

impl WorkspaceService {
    /// Rename `old_id` to `new_id`.
    ///
    /// Ordering: branch renames in every worktree first (while paths are
    /// still valid), then the directory rename, then the metadata update.
    /// Each later failure unwinds the earlier steps best effort, and
    /// compensation errors are joined behind the original cause.
    pub fn rename_workspace(
        &self,
        ctx: &Context,
        old_id: &str,
        new_id: &str,
        opts: RenameOptions,
    ) -> Result<Workspace> {
        workspace::validate_id(new_id)?;
        if new_id == old_id {
            return Err(Error::InvalidArgument(
                "new workspace id equals the old one".to_string(),
            ));
        }

        let old_dir = self.lock_dir_for(old_id);
        self.with_lock(ctx, old_id, &old_dir, false, |handle| {
            self.rename_locked(ctx, handle, old_id, new_id, opts)
        })
    }

    fn rename_locked(
        &self,
        ctx: &Context,
        handle: &mut LockHandle,
        old_id: &str,
        new_id: &str,
        opts: RenameOptions,
    ) -> Result<Workspace> {
        let ws = self.store().load(old_id)?;

        if opts.force && self.store().load(new_id).is_ok() {
            // Full close path for the collider: lock discipline and
            // pre-close hooks included.
            self.close_workspace(
                ctx,
                new_id,
                CloseOptions {
                    keep_metadata: false,
                    force: true,
                    skip_hooks: false,
                    continue_on_hook_err: false,
                },
            )?;
        }

        let rename_branch = opts.rename_branch && ws.branch_name == old_id;
        let old_dir = ws.directory_name.clone();

        // 1. Branch renames, worktrees still at their old paths.
        let mut renamed: Vec<String> = Vec::new();
        if rename_branch {
            for repo in &ws.repos {
                ctx.check()?;
                let worktree = self.worktree_path(&old_dir, &repo.name);
                if let Err(err) = self.git.rename_branch(ctx, &worktree, old_id, new_id) {
                    self.reverse_branch_renames(&old_dir, &renamed, old_id, new_id);
                    return Err(err);
                }
                renamed.push(repo.name.clone());
            }
        }

        // 2. Directory rename through the store.
        if let Err(err) = self.store().rename(old_id, new_id) {
            self.reverse_branch_renames(&old_dir, &renamed, old_id, new_id);
            return Err(err);
        }

        let mut updated = match self.store().load(new_id) {
            Ok(ws) => ws,
            Err(err) => return Err(err),
        };
        let new_dir = updated.directory_name.clone();

        // 3. Persist the branch rename in metadata.
        if rename_branch {
            updated.branch_name = new_id.to_string();
            if let Err(mut err) = self.store().save(&updated) {
                // Worktrees live under the new directory now.
                for failure in self.reverse_branch_renames(&new_dir, &renamed, old_id, new_id) {
                    err = err.join(failure);
                }
                if let Err(rename_back) = self.store().rename(new_id, old_id) {
                    err = err.join(rename_back);
                }
                return Err(err);
            }
        }

        // The lock file moved with the directory; release must target it.
        handle.set_path(self.lock_file_path(&new_dir));
        self.invalidate(old_id);
        self.invalidate(new_id);
        info!(old = old_id, new = new_id, rename_branch, "renamed workspace");
        Ok(updated)
    }

    /// Undo branch renames best effort, returning the failures.
    fn reverse_branch_renames(
        &self,
        dir: &str,
        repos: &[String],
        old_id: &str,
        new_id: &str,
    ) -> Vec<Error> {
        let ctx = Context::background();
        let mut failures = Vec::new();
        for repo in repos.iter().rev() {
            let worktree = self.worktree_path(dir, repo);
            if let Err(err) = self.git.rename_branch(&ctx, &worktree, new_id, old_id) {
                warn!(repo = %repo, error = %err, "branch rename rollback failed");
                failures.push(err);
            }
        }
        failures
    }
}
