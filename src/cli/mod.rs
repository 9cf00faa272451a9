//! Command-line interface for canopy
//!
//! This module defines the CLI structure using clap derive macros.
//! Each subcommand group lives in its own submodule; all core behavior is
//! in the service layer, so handlers only translate arguments and render
//! output.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::canonical::CanonicalService;
use crate::config::Config;
use crate::error::Result;
use crate::service::WorkspaceService;

mod repo;
mod workspace;

#[derive(Parser)]
#[command(
    name = "canopy",
    version,
    about = "Per-task multi-repo workspaces over shared bare clones",
    long_about = "canopy manages many git repositories as composable, per-task \
workspaces: one shared bare clone per repository, one worktree per \
(workspace, repo), all aligned on a branch."
)]
pub struct Cli {
    /// Emit machine-readable JSON output
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress human output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Path to canopy.toml (defaults to the user config directory)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Workspace lifecycle and fan-out operations
    #[command(subcommand, visible_alias = "ws")]
    Workspace(workspace::WorkspaceCommand),

    /// Canonical (bare clone) repository management
    #[command(subcommand)]
    Repo(repo::RepoCommand),
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let config = Arc::new(Config::load(self.config.as_deref())?);
        let emit = EmitMode {
            json: self.json,
            quiet: self.quiet,
        };

        match self.command {
            Commands::Workspace(command) => {
                let service = WorkspaceService::open(Arc::clone(&config));
                workspace::run(command, &service, emit)
            }
            Commands::Repo(command) => {
                let service = WorkspaceService::open(Arc::clone(&config));
                let canonical = CanonicalService::new(
                    config,
                    Arc::clone(service.store()),
                    Arc::clone(service.git()),
                );
                repo::run(command, &canonical, emit)
            }
        }
    }
}

/// How handlers should render their output.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EmitMode {
    pub json: bool,
    pub quiet: bool,
}
