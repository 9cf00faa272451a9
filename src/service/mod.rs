//! Workspace orchestration service.
//!
//! Every public operation validates its inputs, consults the metadata
//! cache, serializes against the per-workspace lock, and composes the
//! leaf components (resolver, executor, rollback, hooks) around the git
//! and store collaborators. Operations are synchronous: all fanned-out
//! work is joined before returning.

mod bulk;
mod close;
mod create;
mod gitrun;
mod rename;
mod repos;
mod restore;
mod status;
mod sync;
mod transfer;


pub use bulk::BulkOutcome;
pub use close::{ClosePreview, CloseOptions, RepoCloseState};
pub use create::{CreateOptions, CreateOutcome};
pub use gitrun::{GitRunOptions, RepoCommandResult};
pub use rename::RenameOptions;
pub use status::{RepoStatusEntry, WorkspaceStatus};
pub use sync::{RepoSyncResult, SyncOutcome, SyncReport};
pub use transfer::WorkspaceExport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::cache::WorkspaceCache;
use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::executor::{self, ExecOptions};
use crate::git::{GitOps, SystemGit};
use crate::hooks::{Hook, HookContext, HookExecutor, HookOptions, HookCommandPreview};
use crate::lock::{LockHandle, LockManager, LOCK_FILE};
use crate::orphan::{OrphanDetector, OrphanedWorktree};
use crate::resolver::IdentifierResolver;
use crate::store::{FsWorkspaceStore, WorkspaceStore};
use crate::workspace::{ClosedWorkspace, Workspace};

/// Lifecycle phases with configurable hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    PostCreate,
    PreClose,
    PostSync,
}

/// Top-level orchestration over workspaces.
pub struct WorkspaceService {
    config: Arc<Config>,
    store: Arc<dyn WorkspaceStore>,
    git: Arc<dyn GitOps>,
    cache: WorkspaceCache,
    locks: LockManager,
    hooks: HookExecutor,
    resolver: IdentifierResolver,
}

impl WorkspaceService {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn WorkspaceStore>,
        git: Arc<dyn GitOps>,
    ) -> Self {
        let cache = WorkspaceCache::new(config.cache_ttl());
        let locks = LockManager::new(
            config.workspaces_root.clone(),
            Duration::from_secs(config.timeouts.lock_secs),
            Duration::from_secs(config.timeouts.lock_stale_secs),
        );
        let hooks = HookExecutor::new(Duration::from_secs(config.timeouts.hook_secs));
        let resolver = IdentifierResolver::new(config.registry.clone());
        Self {
            config,
            store,
            git,
            cache,
            locks,
            hooks,
            resolver,
        }
    }

    /// Wire up the filesystem store and system git for this config.
    pub fn open(config: Arc<Config>) -> Self {
        let namer_config = Arc::clone(&config);
        let store = Arc::new(FsWorkspaceStore::new(
            config.workspaces_root.clone(),
            Arc::new(move |id: &str| namer_config.compute_workspace_dir(id)),
        ));
        let git = Arc::new(SystemGit::new(config.projects_root.clone()));
        Self::new(config, store, git)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn WorkspaceStore> {
        &self.store
    }

    pub fn git(&self) -> &Arc<dyn GitOps> {
        &self.git
    }

    // =========================================================================
    // Paths
    // =========================================================================

    pub(crate) fn workspace_path(&self, dir_name: &str) -> PathBuf {
        self.config.workspaces_root.join(dir_name)
    }

    pub(crate) fn worktree_path(&self, dir_name: &str, repo: &str) -> PathBuf {
        self.workspace_path(dir_name).join(repo)
    }

    pub(crate) fn canonical_path(&self, repo: &str) -> PathBuf {
        self.config.projects_root.join(repo)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Find a workspace snapshot and its directory name, via the cache.
    ///
    /// This is the narrow capability sub-services get; callers receive
    /// copies and never a handle into service state.
    pub fn find_workspace(&self, id: &str) -> Result<(Workspace, String)> {
        if let Some(hit) = self.cache.get(id) {
            return Ok(hit);
        }
        let ws = self.store.load(id)?;
        let dir = ws.directory_name.clone();
        self.cache.set(id, &ws, &dir);
        Ok((ws, dir))
    }

    pub fn list_active(&self) -> Result<Vec<Workspace>> {
        self.store.list()
    }

    pub fn list_closed(&self) -> Result<Vec<ClosedWorkspace>> {
        self.store.list_closed()
    }

    /// Delete the newest closed entry for an id (manual cleanup).
    pub fn delete_closed(&self, id: &str) -> Result<()> {
        let closed = self
            .store
            .latest_closed(id)?
            .ok_or_else(|| Error::WorkspaceNotFound(id.to_string()))?;
        self.store.delete_closed(id, closed.closed_at)
    }

    /// Whether a lock is currently held for the workspace.
    pub fn is_locked(&self, id: &str) -> bool {
        let dir = self.lock_dir_for(id);
        self.locks.is_locked(&dir)
    }

    /// Directory to lock for an id: the record's directory when one exists
    /// (it survives naming-template changes), the computed name otherwise.
    fn lock_dir_for(&self, id: &str) -> String {
        match self.store.load(id) {
            Ok(ws) => ws.directory_name,
            Err(_) => self
                .config
                .compute_workspace_dir(id)
                .unwrap_or_else(|_| id.to_string()),
        }
    }

    /// Run `f` under the workspace's exclusive lock, always releasing.
    ///
    /// Release failures never mask `f`'s error.
    pub(crate) fn with_lock<T>(
        &self,
        ctx: &Context,
        id: &str,
        dir_name: &str,
        create_dir: bool,
        f: impl FnOnce(&mut LockHandle) -> Result<T>,
    ) -> Result<T> {
        let mut handle = self.locks.acquire(ctx, id, dir_name, create_dir)?;
        let result = f(&mut handle);
        match (result, handle.release()) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(release_err)) => Err(release_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(release_err)) => Err(err.join(release_err)),
        }
    }

    // =========================================================================
    // Hooks
    // =========================================================================

    pub(crate) fn hook_context(&self, ws: &Workspace) -> HookContext {
        HookContext {
            workspace_id: ws.id.clone(),
            workspace_path: self.workspace_path(&ws.directory_name),
            branch_name: ws.branch_name.clone(),
            repos: ws.repos.clone(),
            current_repo: None,
        }
    }

    pub(crate) fn hooks_for(&self, phase: HookPhase) -> &[Hook] {
        match phase {
            HookPhase::PostCreate => &self.config.hooks.post_create,
            HookPhase::PreClose => &self.config.hooks.pre_close,
            HookPhase::PostSync => &self.config.hooks.post_sync,
        }
    }

    /// Run a phase's hooks against a workspace, standalone.
    pub fn run_hooks(
        &self,
        ctx: &Context,
        id: &str,
        phase: HookPhase,
        opts: HookOptions,
    ) -> Result<Vec<HookCommandPreview>> {
        let (ws, _) = self.find_workspace(id)?;
        self.hooks
            .execute_hooks(ctx, self.hooks_for(phase), &self.hook_context(&ws), opts)
    }

    // =========================================================================
    // Shared provisioning helpers
    // =========================================================================

    /// Clone-or-ensure every canonical in parallel (fail fast), then create
    /// worktrees sequentially; worktrees need their canonical ready.
    pub(crate) fn provision_repos(&self, ctx: &Context, ws: &Workspace) -> Result<()> {
        let repos = &ws.repos;
        executor::run(
            ctx,
            repos.len(),
            &ExecOptions::fail_fast(self.config.workers),
            |task_ctx, idx| {
                let repo = &repos[idx];
                self.git
                    .ensure_canonical(task_ctx, &repo.url, &self.canonical_path(&repo.name))
            },
        )?;

        for repo in repos {
            ctx.check()?;
            self.git.add_worktree(
                ctx,
                &self.canonical_path(&repo.name),
                &self.worktree_path(&ws.directory_name, &repo.name),
                &ws.branch_name,
            )?;
        }
        Ok(())
    }

    /// Best-effort worktree removal; failures are logged, never returned.
    pub(crate) fn remove_worktrees_best_effort(&self, ctx: &Context, ws: &Workspace) {
        for repo in &ws.repos {
            let worktree = self.worktree_path(&ws.directory_name, &repo.name);
            if let Err(err) = self.git.remove_worktree(
                ctx,
                &self.canonical_path(&repo.name),
                &worktree,
                true,
            ) {
                warn!(
                    workspace = %ws.id,
                    repo = %repo.name,
                    error = %err,
                    "worktree cleanup failed"
                );
            }
        }
    }

    /// Fail unless every repo is clean and fully pushed.
    pub(crate) fn verify_repos_clean(&self, ctx: &Context, ws: &Workspace) -> Result<()> {
        for repo in &ws.repos {
            ctx.check()?;
            let status = self
                .git
                .status(ctx, &self.worktree_path(&ws.directory_name, &repo.name))?;
            if status.is_dirty {
                return Err(Error::RepoNotClean {
                    workspace: ws.id.clone(),
                    repo: repo.name.clone(),
                });
            }
            if status.unpushed > 0 {
                return Err(Error::RepoHasUnpushedCommits {
                    workspace: ws.id.clone(),
                    repo: repo.name.clone(),
                    count: status.unpushed,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn invalidate(&self, id: &str) {
        self.cache.invalidate(id);
    }

    pub(crate) fn lock_file_path(&self, dir_name: &str) -> PathBuf {
        self.workspace_path(dir_name).join(LOCK_FILE)
    }

    // =========================================================================
    // Orphan detection
    // =========================================================================

    fn orphan_detector(&self) -> OrphanDetector {
        OrphanDetector::new(
            Arc::clone(&self.store),
            Arc::clone(&self.git),
            self.config.workspaces_root.clone(),
            self.config.projects_root.clone(),
        )
    }

    /// Detect orphans everywhere, or in one workspace.
    pub fn detect_orphans(
        &self,
        ctx: &Context,
        workspace_id: Option<&str>,
    ) -> Result<Vec<OrphanedWorktree>> {
        let detector = self.orphan_detector();
        match workspace_id {
            Some(id) => detector.detect_for(ctx, id),
            None => detector.detect_all(ctx),
        }
    }

    /// Prune stale worktree records in every canonical clone.
    pub fn prune_worktrees(&self, ctx: &Context) -> Result<()> {
        self.orphan_detector().prune_all_worktrees(ctx)
    }

    pub(crate) fn resolver(&self) -> &IdentifierResolver {
        &self.resolver
    }

    pub(crate) fn hook_executor(&self) -> &HookExecutor {
        &self.hooks
    }
}
