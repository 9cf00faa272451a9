//! Canonical repository subcommands.

use clap::Subcommand;

use crate::canonical::CanonicalService;
use crate::cli::EmitMode;
use crate::context::Context;
use crate::error::Result;
use crate::output::Output;

#[derive(Subcommand)]
pub enum RepoCommand {
    /// List canonical repositories
    List,

    /// Clone a repository as a shared bare clone and register its alias
    Add { url: String },

    /// Remove a canonical clone
    Remove {
        name: String,
        /// Remove even while workspaces still reference it
        #[arg(long)]
        force: bool,
    },

    /// Fetch updates into a canonical clone
    Sync { name: String },

    /// Show what removing a canonical clone would affect
    PreviewRemove { name: String },
}

pub fn run(command: RepoCommand, canonical: &CanonicalService, emit: EmitMode) -> Result<()> {
    let ctx = Context::background();
    match command {
        RepoCommand::List => {
            let names = canonical.list(&ctx)?;
            Output::new("repo.list", format!("{} repo(s)", names.len()), &names)?
                .emit(emit.json, emit.quiet)
        }

        RepoCommand::Add { url } => {
            let resolved = canonical.add(&ctx, &url)?;
            Output::new(
                "repo.add",
                format!("Added canonical repo {}", resolved.name),
                serde_json::json!({ "name": resolved.name, "url": resolved.url }),
            )?
            .emit(emit.json, emit.quiet)
        }

        RepoCommand::Remove { name, force } => {
            canonical.remove(&ctx, &name, force)?;
            Output::new(
                "repo.remove",
                format!("Removed canonical repo {name}"),
                serde_json::json!({ "name": name }),
            )?
            .emit(emit.json, emit.quiet)
        }

        RepoCommand::Sync { name } => {
            canonical.sync(&ctx, &name)?;
            Output::new(
                "repo.sync",
                format!("Fetched {name}"),
                serde_json::json!({ "name": name }),
            )?
            .emit(emit.json, emit.quiet)
        }

        RepoCommand::PreviewRemove { name } => {
            let preview = canonical.preview_remove(&ctx, &name)?;
            Output::new(
                "repo.preview-remove",
                format!(
                    "{} uses {} bytes, referenced by {} workspace(s)",
                    name,
                    preview.disk_usage,
                    preview.affected_workspaces.len()
                ),
                &preview,
            )?
            .emit(emit.json, emit.quiet)
        }
    }
}
