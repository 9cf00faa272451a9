//! Workspace subcommands.

use std::path::PathBuf;

use clap::Subcommand;
use serde::Serialize;

use crate::cli::EmitMode;
use crate::context::Context;
use crate::error::Result;
use crate::output::Output;
use crate::service::{
    CloseOptions, CreateOptions, GitRunOptions, RenameOptions, WorkspaceExport, WorkspaceService,
};

#[derive(Subcommand)]
pub enum WorkspaceCommand {
    /// Create a workspace
    New {
        id: String,
        /// Branch to align worktrees on (defaults to the template's, then the id)
        #[arg(long, default_value = "")]
        branch: String,
        /// Repository URL, registry alias, or owner/repo shorthand (repeatable)
        #[arg(long = "repo", value_name = "TOKEN")]
        repos: Vec<String>,
        /// Workspace template to apply
        #[arg(long)]
        template: Option<String>,
        #[arg(long)]
        skip_hooks: bool,
        #[arg(long)]
        continue_on_hook_error: bool,
        /// Preview post-create hooks without running them
        #[arg(long)]
        dry_run_hooks: bool,
    },

    /// Close a workspace, deleting it or archiving its metadata
    Close {
        id: String,
        /// Archive metadata so the workspace can be restored later
        #[arg(long)]
        keep_metadata: bool,
        /// Skip the clean/pushed checks
        #[arg(long)]
        force: bool,
        #[arg(long)]
        skip_hooks: bool,
        #[arg(long)]
        continue_on_hook_error: bool,
    },

    /// Close every workspace whose id matches a regex
    CloseBulk {
        #[arg(long)]
        pattern: String,
        #[arg(long)]
        keep_metadata: bool,
        #[arg(long)]
        force: bool,
    },

    /// Restore the most recently closed workspace for an id
    Restore {
        id: String,
        /// Replace an active workspace with the same id
        #[arg(long)]
        force: bool,
    },

    /// Rename a workspace (optionally its branch too)
    Rename {
        old_id: String,
        new_id: String,
        /// Also rename the branch when it matches the old id
        #[arg(long)]
        rename_branch: bool,
        /// Close-delete a workspace occupying the new id
        #[arg(long)]
        force: bool,
    },

    /// List workspaces
    List {
        /// List closed (archived) workspaces instead
        #[arg(long)]
        closed: bool,
        /// Include per-repo status
        #[arg(long)]
        status: bool,
    },

    /// Aggregate per-repo status of one workspace
    Status { id: String },

    /// Fetch and fast-forward every repo
    Sync {
        /// Workspace id; mutually exclusive with --pattern
        id: Option<String>,
        /// Sync every workspace whose id matches this regex
        #[arg(long, conflicts_with = "id")]
        pattern: Option<String>,
    },

    /// Preview what a close would find
    PreviewClose { id: String },

    /// Add a repository to a workspace
    AddRepo { id: String, token: String },

    /// Remove a repository from a workspace
    RemoveRepo { id: String, name: String },

    /// Check out a different branch in every worktree
    SwitchBranch { id: String, branch: String },

    /// Push every repo's branch
    Push { id: String },

    /// Run a git command in every worktree
    Run {
        id: String,
        /// Arguments passed to git verbatim
        #[arg(last = true, required = true)]
        args: Vec<String>,
        #[arg(long)]
        parallel: bool,
        #[arg(long)]
        continue_on_error: bool,
    },

    /// Export a workspace definition as YAML
    Export {
        id: String,
        /// Write to a file instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },

    /// Create a workspace from an exported definition
    Import {
        /// YAML file produced by export
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
    },

    /// Detect orphaned worktree entries
    Orphans { id: Option<String> },

    /// Prune stale worktree records in every canonical clone
    Prune,

    /// Delete a closed (archived) workspace entry
    DeleteClosed { id: String },
}

pub fn run(command: WorkspaceCommand, service: &WorkspaceService, emit: EmitMode) -> Result<()> {
    let ctx = Context::background();
    match command {
        WorkspaceCommand::New {
            id,
            branch,
            repos,
            template,
            skip_hooks,
            continue_on_hook_error,
            dry_run_hooks,
        } => {
            let outcome = service.create_workspace(
                &ctx,
                &id,
                &branch,
                &repos,
                &CreateOptions {
                    skip_hooks,
                    continue_on_hook_err: continue_on_hook_error,
                    dry_run_hooks,
                    template,
                },
            )?;

            #[derive(Serialize)]
            struct Created<'a> {
                workspace: &'a crate::workspace::Workspace,
                hook_previews: &'a [crate::hooks::HookCommandPreview],
            }
            let ws = &outcome.workspace;
            let mut output = Output::new(
                "workspace.new",
                format!("Created workspace {}", ws.id),
                Created {
                    workspace: ws,
                    hook_previews: &outcome.hook_previews,
                },
            )?
            .summary("branch", &ws.branch_name)
            .summary("repos", ws.repos.len().to_string());
            if ws.setup_incomplete {
                output = output.warning("template setup did not complete");
            }
            output.emit(emit.json, emit.quiet)
        }

        WorkspaceCommand::Close {
            id,
            keep_metadata,
            force,
            skip_hooks,
            continue_on_hook_error,
        } => {
            service.close_workspace(
                &ctx,
                &id,
                CloseOptions {
                    keep_metadata,
                    force,
                    skip_hooks,
                    continue_on_hook_err: continue_on_hook_error,
                },
            )?;
            Output::new(
                "workspace.close",
                format!("Closed workspace {id}"),
                serde_json::json!({ "workspace_id": id, "kept_metadata": keep_metadata }),
            )?
            .emit(emit.json, emit.quiet)
        }

        WorkspaceCommand::CloseBulk {
            pattern,
            keep_metadata,
            force,
        } => {
            let outcomes = service.close_workspaces_matching(
                &ctx,
                &pattern,
                CloseOptions {
                    keep_metadata,
                    force,
                    skip_hooks: false,
                    continue_on_hook_err: false,
                },
            )?;
            let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
            Output::new(
                "workspace.close-bulk",
                format!("Closed {} of {} workspace(s)", outcomes.len() - failed, outcomes.len()),
                &outcomes,
            )?
            .emit(emit.json, emit.quiet)
        }

        WorkspaceCommand::Restore { id, force } => {
            let ws = service.restore_workspace(&ctx, &id, force)?;
            Output::new(
                "workspace.restore",
                format!("Restored workspace {}", ws.id),
                &ws,
            )?
            .summary("branch", &ws.branch_name)
            .emit(emit.json, emit.quiet)
        }

        WorkspaceCommand::Rename {
            old_id,
            new_id,
            rename_branch,
            force,
        } => {
            let ws = service.rename_workspace(
                &ctx,
                &old_id,
                &new_id,
                RenameOptions {
                    rename_branch,
                    force,
                },
            )?;
            Output::new(
                "workspace.rename",
                format!("Renamed {old_id} to {new_id}"),
                &ws,
            )?
            .emit(emit.json, emit.quiet)
        }

        WorkspaceCommand::List { closed, status } => {
            if closed {
                let entries = service.list_closed()?;
                return Output::new(
                    "workspace.list",
                    format!("{} closed workspace(s)", entries.len()),
                    &entries,
                )?
                .emit(emit.json, emit.quiet);
            }

            let workspaces = service.list_active()?;
            if status {
                let ids: Vec<String> = workspaces.iter().map(|w| w.id.clone()).collect();
                let statuses = service.get_status_batch(&ctx, &ids, None)?;
                let rows: Vec<serde_json::Value> = statuses
                    .into_iter()
                    .map(|result| match result {
                        Ok(status) => serde_json::to_value(status).unwrap_or_default(),
                        Err(err) => serde_json::json!({ "error": err.to_string() }),
                    })
                    .collect();
                return Output::new(
                    "workspace.list",
                    format!("{} workspace(s)", rows.len()),
                    rows,
                )?
                .emit(emit.json, emit.quiet);
            }

            Output::new(
                "workspace.list",
                format!("{} workspace(s)", workspaces.len()),
                &workspaces,
            )?
            .emit(emit.json, emit.quiet)
        }

        WorkspaceCommand::Status { id } => {
            let status = service.get_status(&ctx, &id)?;
            Output::new("workspace.status", format!("Status of {id}"), &status)?
                .emit(emit.json, emit.quiet)
        }

        WorkspaceCommand::Sync { id, pattern } => match (id, pattern) {
            (Some(id), None) => {
                let report = service.sync_workspace(&ctx, &id)?;
                Output::new(
                    "workspace.sync",
                    format!(
                        "Synced {}: {} updated, {} up to date, {} failed",
                        id, report.updated, report.up_to_date, report.failed
                    ),
                    &report,
                )?
                .emit(emit.json, emit.quiet)
            }
            (None, Some(pattern)) => {
                let outcomes = service.sync_workspaces_matching(&ctx, &pattern)?;
                Output::new(
                    "workspace.sync",
                    format!("Synced {} workspace(s)", outcomes.len()),
                    &outcomes,
                )?
                .emit(emit.json, emit.quiet)
            }
            _ => Err(crate::error::Error::InvalidArgument(
                "pass a workspace id or --pattern".to_string(),
            )),
        },

        WorkspaceCommand::PreviewClose { id } => {
            let preview = service.preview_close(&ctx, &id)?;
            Output::new(
                "workspace.preview-close",
                format!(
                    "Closing {} would be {}",
                    id,
                    if preview.clean { "clean" } else { "blocked" }
                ),
                &preview,
            )?
            .emit(emit.json, emit.quiet)
        }

        WorkspaceCommand::AddRepo { id, token } => {
            let ws = service.add_repo(&ctx, &id, &token)?;
            Output::new("workspace.add-repo", format!("Added repo to {id}"), &ws)?
                .emit(emit.json, emit.quiet)
        }

        WorkspaceCommand::RemoveRepo { id, name } => {
            let ws = service.remove_repo(&ctx, &id, &name)?;
            Output::new(
                "workspace.remove-repo",
                format!("Removed {name} from {id}"),
                &ws,
            )?
            .emit(emit.json, emit.quiet)
        }

        WorkspaceCommand::SwitchBranch { id, branch } => {
            let ws = service.switch_branch(&ctx, &id, &branch)?;
            Output::new(
                "workspace.switch-branch",
                format!("{} is now on {}", id, ws.branch_name),
                &ws,
            )?
            .emit(emit.json, emit.quiet)
        }

        WorkspaceCommand::Push { id } => {
            let repos = service.push_workspace(&ctx, &id)?;
            Output::new(
                "workspace.push",
                format!("Pushed {} repo(s)", repos.len()),
                &repos,
            )?
            .emit(emit.json, emit.quiet)
        }

        WorkspaceCommand::Run {
            id,
            args,
            parallel,
            continue_on_error,
        } => {
            let results = service.run_git_in_workspace(
                &ctx,
                &id,
                &args,
                GitRunOptions {
                    parallel,
                    continue_on_error,
                },
            )?;
            let failed = results.iter().filter(|r| r.exit_code != 0).count();
            Output::new(
                "workspace.run",
                format!("Ran in {} repo(s), {} failed", results.len(), failed),
                &results,
            )?
            .emit(emit.json, emit.quiet)
        }

        WorkspaceCommand::Export { id, out } => {
            let export = service.export_workspace(&id)?;
            let yaml = export.to_yaml()?;
            match out {
                Some(path) => {
                    std::fs::write(&path, &yaml)?;
                    Output::new(
                        "workspace.export",
                        format!("Exported {} to {}", id, path.display()),
                        &export,
                    )?
                    .emit(emit.json, emit.quiet)
                }
                None => {
                    print!("{yaml}");
                    Ok(())
                }
            }
        }

        WorkspaceCommand::Import { file } => {
            let text = std::fs::read_to_string(&file)?;
            let doc = WorkspaceExport::from_yaml(&text)?;
            let outcome = service.import_workspace(&ctx, &doc, &CreateOptions::default())?;
            Output::new(
                "workspace.import",
                format!("Imported workspace {}", outcome.workspace.id),
                &outcome.workspace,
            )?
            .emit(emit.json, emit.quiet)
        }

        WorkspaceCommand::Orphans { id } => {
            let orphans = service.detect_orphans(&ctx, id.as_deref())?;
            Output::new(
                "workspace.orphans",
                format!("{} orphaned worktree(s)", orphans.len()),
                &orphans,
            )?
            .emit(emit.json, emit.quiet)
        }

        WorkspaceCommand::Prune => {
            service.prune_worktrees(&ctx)?;
            Output::new(
                "workspace.prune",
                "Pruned worktree records".to_string(),
                serde_json::json!({}),
            )?
            .emit(emit.json, emit.quiet)
        }

        WorkspaceCommand::DeleteClosed { id } => {
            service.delete_closed(&id)?;
            Output::new(
                "workspace.delete-closed",
                format!("Deleted closed entry for {id}"),
                serde_json::json!({ "workspace_id": id }),
            )?
            .emit(emit.json, emit.quiet)
        }
    }
}
