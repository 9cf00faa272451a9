//! Canonical (bare clone) repository lifecycle.
//!
//! Canonical repos live once under the projects root and are shared by
//! every workspace worktree. Adding clones bare and registers the alias;
//! removal refuses while any workspace still references the name.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::git::GitOps;
use crate::resolver::{IdentifierResolver, ResolvedRepo};
use crate::store::WorkspaceStore;

/// What removing a canonical repo would affect.
#[derive(Debug, Clone, Serialize)]
pub struct RemovePreview {
    pub name: String,
    pub path: PathBuf,
    pub disk_usage: u64,
    pub affected_workspaces: Vec<String>,
}

pub struct CanonicalService {
    config: Arc<Config>,
    store: Arc<dyn WorkspaceStore>,
    git: Arc<dyn GitOps>,
    resolver: IdentifierResolver,
}

impl CanonicalService {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn WorkspaceStore>,
        git: Arc<dyn GitOps>,
    ) -> Self {
        let resolver = IdentifierResolver::new(config.registry.clone());
        Self {
            config,
            store,
            git,
            resolver,
        }
    }

    fn canonical_path(&self, name: &str) -> PathBuf {
        self.config.projects_root.join(name)
    }

    fn require_existing(&self, name: &str) -> Result<PathBuf> {
        let path = self.canonical_path(name);
        if !path.join("HEAD").exists() {
            return Err(Error::RepoNotFound(name.to_string()));
        }
        Ok(path)
    }

    /// Enumerate canonical repo names.
    pub fn list(&self, ctx: &Context) -> Result<Vec<String>> {
        self.git.list_canonical(ctx)
    }

    /// Clone a repository as a new canonical bare clone.
    ///
    /// The name is derived by the resolver's URL strategy. When this config
    /// was loaded from a file, the alias is persisted back into its
    /// registry; a failed registry save removes the fresh clone again.
    pub fn add(&self, ctx: &Context, url: &str) -> Result<ResolvedRepo> {
        let resolved = self
            .resolver
            .resolve(url, true)?
            .ok_or_else(|| Error::InvalidArgument("repository URL cannot be blank".into()))?;
        if resolved.url != url.trim() {
            return Err(Error::InvalidArgument(format!(
                "expected a repository URL, got {url:?}"
            )));
        }

        let path = self.canonical_path(&resolved.name);
        if path.exists() {
            return Err(Error::RepoAlreadyExists {
                scope: "the projects store".into(),
                repo: resolved.name,
            });
        }

        self.git.clone_bare(ctx, &resolved.url, &path)?;
        info!(repo = %resolved.name, "added canonical repo");

        if self.config.path.is_some() && !self.config.registry.contains_key(&resolved.name) {
            let mut updated = (*self.config).clone();
            updated
                .registry
                .insert(resolved.name.clone(), resolved.url.clone());
            if let Err(err) = updated.save() {
                warn!(repo = %resolved.name, error = %err, "registry save failed, removing clone");
                if let Err(cleanup) = std::fs::remove_dir_all(&path) {
                    return Err(err.join(Error::Io(cleanup)));
                }
                return Err(err);
            }
        }

        Ok(resolved)
    }

    /// Remove a canonical clone. Refuses while workspaces reference it,
    /// unless forced.
    pub fn remove(&self, ctx: &Context, name: &str, force: bool) -> Result<()> {
        let path = self.require_existing(name)?;
        let users = self.workspaces_using(ctx, name)?;
        if !users.is_empty() && !force {
            return Err(Error::RepoInUse {
                repo: name.to_string(),
                workspaces: users,
            });
        }
        std::fs::remove_dir_all(&path).map_err(|err| Error::io_at(&path, err))?;
        info!(repo = name, "removed canonical repo");
        Ok(())
    }

    /// Fetch updates into a canonical clone.
    pub fn sync(&self, ctx: &Context, name: &str) -> Result<()> {
        let path = self.require_existing(name)?;
        let fetch_ctx = ctx.with_timeout(Duration::from_secs(self.config.timeouts.sync_secs));
        self.git.fetch(&fetch_ctx, &path)
    }

    /// What `remove` would do, without mutating anything.
    pub fn preview_remove(&self, ctx: &Context, name: &str) -> Result<RemovePreview> {
        let path = self.require_existing(name)?;
        Ok(RemovePreview {
            name: name.to_string(),
            disk_usage: self.git.size(ctx, &path)?,
            affected_workspaces: self.workspaces_using(ctx, name)?,
            path,
        })
    }

    /// Ids of workspaces whose repo list contains `name`.
    pub fn workspaces_using(&self, _ctx: &Context, name: &str) -> Result<Vec<String>> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .filter(|ws| ws.has_repo(name))
            .map(|ws| ws.id)
            .collect())
    }
}
