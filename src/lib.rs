//! canopy - Multi-Repo Workspace Library
//!
//! This library provides the core functionality for the canopy CLI tool:
//! named, branch-aligned workspaces over a shared store of bare clones,
//! with one git worktree per (workspace, repository).
//!
//! # Core Concepts
//!
//! - **Canonical repositories**: single shared bare clones under a projects root
//! - **Workspaces**: directories of worktrees, one per repo, on one branch
//! - **Closed workspaces**: archived metadata snapshots, restorable later
//! - **Hooks**: user-defined shell commands at lifecycle phases
//! - **Orphans**: metadata entries whose on-disk counterpart is broken
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `canopy.toml`
//! - `context`: Cancellation contexts threaded through every operation
//! - `error`: Error types with stable codes and result aliases
//! - `git`: Git operations (libgit2 + git subprocess) behind `GitOps`
//! - `store`: Workspace metadata persistence behind `WorkspaceStore`
//! - `lock`: Per-workspace locks and atomic file operations
//! - `cache`: TTL-bounded metadata cache
//! - `executor`: Bounded parallel fan-out with ordered results
//! - `rollback`: Reversible multi-step operations
//! - `hooks`: Lifecycle hook execution with templating and timeouts
//! - `resolver`: Repository identifier resolution
//! - `orphan`: Orphaned-worktree detection
//! - `canonical`: Canonical repo lifecycle
//! - `service`: Top-level workspace orchestration

pub mod cache;
pub mod canonical;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod git;
pub mod hooks;
pub mod lock;
pub mod orphan;
pub mod output;
pub mod redact;
pub mod resolver;
pub mod rollback;
pub mod service;
pub mod store;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{Error, Result};
