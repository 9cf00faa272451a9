//! canopy - Multi-repo workspace CLI
//!
//! Manages many git repositories as composable, per-task workspaces:
//! canonical bare clones live once in a shared store, and each workspace is
//! a branch-aligned directory of worktrees over those clones.

use canopy::cli::Cli;
use canopy::error::JsonError;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let json = cli.json;
    if let Err(err) = cli.run() {
        if json {
            let payload = JsonError::from(&err);
            let text = serde_json::to_string(&payload).unwrap_or_else(|_| {
                format!(
                    r#"{{"error":"{}","code":"{}","exit_code":{}}}"#,
                    err,
                    err.code(),
                    err.exit_code()
                )
            });
            println!("{text}");
        } else {
            eprintln!("error: {err}");
        }
        std::process::exit(err.exit_code());
    }
}
