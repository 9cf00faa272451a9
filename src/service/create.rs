//! Workspace creation.

use tracing::{info, warn};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::hooks::{HookCommandPreview, HookOptions};
use crate::rollback::RollbackOp;
use crate::service::{HookPhase, WorkspaceService};
use crate::workspace::{self, RepoRef, Workspace};

/// Options for workspace creation.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub skip_hooks: bool,
    pub continue_on_hook_err: bool,
    /// Preview post-create hooks instead of running them.
    pub dry_run_hooks: bool,
    /// Named workspace template to apply.
    pub template: Option<String>,
}

#[derive(Debug)]
pub struct CreateOutcome {
    pub workspace: Workspace,
    pub hook_previews: Vec<HookCommandPreview>,
}

impl WorkspaceService {
    /// Create a workspace: persist metadata, ensure canonicals, create one
    /// worktree per repo, then run template setup and post-create hooks.
    ///
    /// Metadata and worktree provisioning are a single rollback operation:
    /// a failure leaves no trace. Hook failures surface but never undo the
    /// created workspace.
    pub fn create_workspace(
        &self,
        ctx: &Context,
        id: &str,
        branch: &str,
        repo_tokens: &[String],
        opts: &CreateOptions,
    ) -> Result<CreateOutcome> {
        let template = match &opts.template {
            Some(name) => Some(self.config().template(name).ok_or_else(|| {
                Error::InvalidArgument(format!("unknown template: {name}"))
            })?),
            None => None,
        };

        let branch = if branch.trim().is_empty() {
            match template {
                Some(t) if !t.branch.trim().is_empty() => t.branch.trim().to_string(),
                _ => id.to_string(),
            }
        } else {
            branch.trim().to_string()
        };

        workspace::validate_id(id)?;
        workspace::validate_branch(&branch)?;
        let dir = self.config().compute_workspace_dir(id)?;

        let dir_existed = self.workspace_path(&dir).exists();
        let result = self.with_lock(ctx, id, &dir, true, |_handle| {
            self.create_locked(ctx, id, &branch, &dir, repo_tokens, opts, dir_existed)
        });
        if result.is_err() && !dir_existed {
            // A failed lock acquisition leaves only the empty directory the
            // acquire created; a populated workspace never matches.
            let _ = std::fs::remove_dir(self.workspace_path(&dir));
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn create_locked(
        &self,
        ctx: &Context,
        id: &str,
        branch: &str,
        dir: &str,
        repo_tokens: &[String],
        opts: &CreateOptions,
        dir_existed: bool,
    ) -> Result<CreateOutcome> {
        let mut ws = match self.create_provisioned(ctx, id, branch, dir, repo_tokens, opts) {
            Ok(ws) => ws,
            Err(err) => {
                // The lock created the directory; a failed create leaves
                // none. Hook failures below never reach this path.
                if !dir_existed {
                    let _ = std::fs::remove_dir_all(self.workspace_path(dir));
                }
                return Err(err);
            }
        };

        if let Some(template) = &opts.template {
            self.run_template_setup(&mut ws, template)?;
        }

        let hook_previews = if opts.skip_hooks {
            Vec::new()
        } else {
            self.hook_executor().execute_hooks(
                ctx,
                self.hooks_for(HookPhase::PostCreate),
                &self.hook_context(&ws),
                HookOptions {
                    dry_run: opts.dry_run_hooks,
                    continue_on_error: opts.continue_on_hook_err,
                },
            )?
        };

        Ok(CreateOutcome {
            workspace: ws,
            hook_previews,
        })
    }

    /// Validation, metadata persistence, and worktree provisioning as one
    /// rollback operation: either a fully consistent workspace or no trace.
    fn create_provisioned(
        &self,
        ctx: &Context,
        id: &str,
        branch: &str,
        dir: &str,
        repo_tokens: &[String],
        opts: &CreateOptions,
    ) -> Result<Workspace> {
        if self.store().exists(dir) {
            return Err(Error::WorkspaceExists(id.to_string()));
        }

        let mut ws = Workspace::new(id, branch, dir);
        for repo in self.resolve_creation_repos(id, repo_tokens, opts)? {
            ws.add_repo(repo)?;
        }
        if ws.repos.is_empty() {
            return Err(Error::NoReposConfigured);
        }

        let store = self.store();
        RollbackOp::new()
            .step(
                "persist metadata",
                || store.create(&ws),
                || {
                    let _ = store.delete(id);
                    Ok(())
                },
            )
            .step_no_undo("provision repos", || {
                self.provision_repos(ctx, &ws).map_err(|err| {
                    // Partial worktrees from this step are our own mess.
                    self.remove_worktrees_best_effort(&Context::background(), &ws);
                    err
                })
            })
            .execute()?;

        self.invalidate(id);
        info!(workspace = id, branch, repos = ws.repos.len(), "created workspace");
        Ok(ws)
    }

    /// Repo set for a new workspace: explicit tokens, else the template's,
    /// else the configured id-pattern defaults.
    fn resolve_creation_repos(
        &self,
        id: &str,
        repo_tokens: &[String],
        opts: &CreateOptions,
    ) -> Result<Vec<RepoRef>> {
        let mut repos = Vec::new();

        if !repo_tokens.is_empty() {
            for token in repo_tokens {
                if let Some(resolved) = self.resolver().resolve(token, true)? {
                    repos.push(RepoRef {
                        name: resolved.name,
                        url: resolved.url,
                    });
                }
            }
            return Ok(repos);
        }

        if let Some(name) = &opts.template {
            if let Some(template) = self.config().template(name) {
                for token in &template.repos {
                    if let Some(resolved) = self.resolver().resolve(token, true)? {
                        repos.push(RepoRef {
                            name: resolved.name,
                            url: resolved.url,
                        });
                    }
                }
                if !repos.is_empty() {
                    return Ok(repos);
                }
            }
        }

        if let Some(tokens) = self.config().default_repos_for(id) {
            for token in tokens {
                if let Some(resolved) = self.resolver().resolve(token, false)? {
                    repos.push(RepoRef {
                        name: resolved.name,
                        url: resolved.url,
                    });
                }
            }
        }
        Ok(repos)
    }

    /// Run a template's setup commands sequentially in the workspace root.
    ///
    /// The first failure flags the workspace `setup_incomplete` and stops
    /// the remaining commands; creation itself proceeds.
    fn run_template_setup(&self, ws: &mut Workspace, template_name: &str) -> Result<()> {
        let Some(template) = self.config().template(template_name) else {
            return Ok(());
        };
        if template.setup.is_empty() {
            return Ok(());
        }

        let hook_ctx = self.hook_context(ws);
        let cwd = hook_ctx.workspace_path.clone();
        let timeout = std::time::Duration::from_secs(self.config().timeouts.hook_secs);

        for command in &template.setup {
            let rendered = crate::hooks::render_template(
                command,
                &minijinja::context! {
                    WorkspaceID => ws.id,
                    WorkspacePath => cwd.display().to_string(),
                    BranchName => ws.branch_name,
                },
            )?;
            let env = vec![
                ("CANOPY_WORKSPACE_ID".to_string(), ws.id.clone()),
                (
                    "CANOPY_WORKSPACE_PATH".to_string(),
                    cwd.display().to_string(),
                ),
                ("CANOPY_BRANCH".to_string(), ws.branch_name.clone()),
            ];
            if let Err(err) = self
                .hook_executor()
                .run_command(&rendered, &cwd, &env, timeout)
            {
                warn!(workspace = %ws.id, command = %rendered, error = %err, "template setup failed");
                ws.setup_incomplete = true;
                self.store().save(ws)?;
                self.invalidate(&ws.id);
                break;
            }
        }
        Ok(())
    }
}
