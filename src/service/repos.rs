//! Adding and removing repos in an existing workspace.

use tracing::info;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::rollback::RollbackOp;
use crate::service::WorkspaceService;
use crate::workspace::{RepoRef, Workspace};

impl WorkspaceService {
    /// Resolve a token and add the repo to the workspace, provisioning its
    /// canonical clone and worktree. Metadata and provisioning roll back
    /// together.
    pub fn add_repo(&self, ctx: &Context, id: &str, token: &str) -> Result<Workspace> {
        let dir = self.lock_dir_for(id);
        self.with_lock(ctx, id, &dir, false, |_handle| {
            let original = self.store().load(id)?;
            let resolved = self
                .resolver()
                .resolve(token, true)?
                .ok_or_else(|| Error::InvalidArgument("repository token cannot be blank".into()))?;

            let mut updated = original.clone();
            updated.add_repo(RepoRef {
                name: resolved.name.clone(),
                url: resolved.url.clone(),
            })?;

            let store = self.store();
            let repo = RepoRef {
                name: resolved.name.clone(),
                url: resolved.url.clone(),
            };
            RollbackOp::new()
                .step(
                    "persist repo entry",
                    || store.save(&updated),
                    || store.save(&original),
                )
                .step_no_undo("provision repo", || {
                    let worktree = self.worktree_path(&updated.directory_name, &repo.name);
                    self.git
                        .ensure_canonical(ctx, &repo.url, &self.canonical_path(&repo.name))
                        .and_then(|()| {
                            self.git.add_worktree(
                                ctx,
                                &self.canonical_path(&repo.name),
                                &worktree,
                                &updated.branch_name,
                            )
                        })
                        .map_err(|err| {
                            let _ = self.git.remove_worktree(
                                &Context::background(),
                                &self.canonical_path(&repo.name),
                                &worktree,
                                true,
                            );
                            err
                        })
                })
                .execute()?;

            self.invalidate(id);
            info!(workspace = id, repo = %resolved.name, "added repo");
            Ok(updated)
        })
    }

    /// Remove a repo from the workspace. The record is saved first; the
    /// worktree removal afterwards is best effort.
    pub fn remove_repo(&self, ctx: &Context, id: &str, name: &str) -> Result<Workspace> {
        let dir = self.lock_dir_for(id);
        self.with_lock(ctx, id, &dir, false, |_handle| {
            let mut ws = self.store().load(id)?;
            let removed = ws.remove_repo(name)?;
            self.store().save(&ws)?;

            let worktree = self.worktree_path(&ws.directory_name, &removed.name);
            if let Err(err) = self.git.remove_worktree(
                &Context::background(),
                &self.canonical_path(&removed.name),
                &worktree,
                true,
            ) {
                tracing::warn!(workspace = id, repo = name, error = %err, "worktree removal failed");
            }

            self.invalidate(id);
            info!(workspace = id, repo = name, "removed repo");
            Ok(ws)
        })
    }
}
