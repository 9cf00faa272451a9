//! Error types for canopy
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, unknown workspace or repo)
//! - 3: Blocked by precondition (locked workspace, dirty repo, repo in use)
//! - 4: Operation failed (git error, IO error, hook failure)
//!
//! Every variant carries a stable string code (`Error::code`) that the CLI
//! surfaces in JSON output and that callers can match on across releases.

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the canopy CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const PRECONDITION_BLOCKED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for canopy operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("Workspace already exists: {0}")]
    WorkspaceExists(String),

    #[error("Repository not found: {0}")]
    RepoNotFound(String),

    #[error("Repository '{repo}' already exists in {scope}")]
    RepoAlreadyExists { scope: String, repo: String },

    #[error("Unknown repository: {0}")]
    UnknownRepository(String),

    #[error("No repositories selected and none configured for this workspace id")]
    NoReposConfigured,

    #[error("No branch supplied and {0} provides no default")]
    MissingBranchConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Precondition blocks (exit code 3)
    #[error("Workspace is locked: {0}")]
    WorkspaceLocked(String),

    #[error("Repository '{repo}' in workspace '{workspace}' has uncommitted changes")]
    RepoNotClean { workspace: String, repo: String },

    #[error("Repository '{repo}' in workspace '{workspace}' has {count} unpushed commit(s)")]
    RepoHasUnpushedCommits {
        workspace: String,
        repo: String,
        count: usize,
    },

    #[error("Repository '{repo}' is used by {} workspace(s): {}", .workspaces.len(), .workspaces.join(", "))]
    RepoInUse {
        repo: String,
        workspaces: Vec<String>,
    },

    // Operation failures (exit code 4)
    #[error("Workspace metadata error for '{workspace}': {message}")]
    WorkspaceMetadata { workspace: String, message: String },

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Command failed with exit code {exit_code}: {command}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Hook #{index} timed out after {timeout_secs}s: {command}")]
    HookTimeout {
        index: usize,
        command: String,
        timeout_secs: u64,
    },

    #[error("Hook #{index} failed with exit code {exit_code}: {command}")]
    HookFailed {
        index: usize,
        command: String,
        exit_code: i32,
        repo: String,
        stderr: String,
    },

    #[error("Template error: {0}")]
    Template(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("{} error(s): {}", .0.len(), format_aggregate(.0))]
    Aggregate(Vec<Error>),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_aggregate(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Stable machine-readable code for this error.
    ///
    /// Codes are part of the CLI contract and never change meaning.
    pub fn code(&self) -> String {
        match self {
            Error::WorkspaceNotFound(_) => "workspace-not-found".into(),
            Error::WorkspaceExists(_) => "workspace-exists".into(),
            Error::WorkspaceLocked(_) => "workspace-locked".into(),
            Error::WorkspaceMetadata { .. } | Error::Yaml(_) => "workspace-metadata-error".into(),
            Error::RepoNotFound(_) => "repo-not-found".into(),
            Error::RepoAlreadyExists { .. } => "repo-already-exists".into(),
            Error::RepoInUse { .. } => "repo-in-use".into(),
            Error::RepoNotClean { .. } => "repo-not-clean".into(),
            Error::RepoHasUnpushedCommits { .. } => "repo-has-unpushed-commits".into(),
            Error::UnknownRepository(_) => "unknown-repository".into(),
            Error::NoReposConfigured => "no-repos-configured".into(),
            Error::MissingBranchConfig(_) => "missing-branch-config".into(),
            Error::InvalidArgument(_) | Error::Template(_) => "invalid-argument".into(),
            Error::InvalidConfig(_) | Error::TomlParse(_) | Error::TomlSerialize(_) => {
                "invalid-config".into()
            }
            Error::Io(_) => "io-failed".into(),
            Error::Json(_) => "io-failed".into(),
            Error::Git(err) => format!("git-{}", git_class_slug(err)),
            Error::CommandFailed { .. } => "command-failed".into(),
            Error::HookTimeout { .. } => "hook-timeout".into(),
            Error::HookFailed { .. } => "hook-failed".into(),
            Error::Cancelled => "cancelled".into(),
            Error::Aggregate(errors) => errors
                .first()
                .map(|e| e.code())
                .unwrap_or_else(|| "internal-error".into()),
            Error::Internal(_) => "internal-error".into(),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::WorkspaceNotFound(_)
            | Error::WorkspaceExists(_)
            | Error::RepoNotFound(_)
            | Error::RepoAlreadyExists { .. }
            | Error::UnknownRepository(_)
            | Error::NoReposConfigured
            | Error::MissingBranchConfig(_)
            | Error::InvalidArgument(_)
            | Error::InvalidConfig(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::Template(_) => exit_codes::USER_ERROR,

            // Precondition blocks
            Error::WorkspaceLocked(_)
            | Error::RepoNotClean { .. }
            | Error::RepoHasUnpushedCommits { .. }
            | Error::RepoInUse { .. } => exit_codes::PRECONDITION_BLOCKED,

            // Operation failures
            Error::WorkspaceMetadata { .. }
            | Error::Git(_)
            | Error::CommandFailed { .. }
            | Error::HookTimeout { .. }
            | Error::HookFailed { .. }
            | Error::Cancelled
            | Error::Io(_)
            | Error::Json(_)
            | Error::Yaml(_)
            | Error::Internal(_) => exit_codes::OPERATION_FAILED,

            Error::Aggregate(errors) => errors
                .first()
                .map(|e| e.exit_code())
                .unwrap_or(exit_codes::OPERATION_FAILED),
        }
    }

    /// Structured details for JSON error output.
    pub fn details(&self) -> Option<serde_json::Value> {
        use serde_json::json;

        let mut details = match self {
            Error::WorkspaceNotFound(id)
            | Error::WorkspaceExists(id)
            | Error::WorkspaceLocked(id) => Some(json!({ "workspace_id": id })),
            Error::WorkspaceMetadata { workspace, message } => {
                Some(json!({ "workspace_id": workspace, "message": message }))
            }
            Error::RepoNotFound(name) | Error::UnknownRepository(name) => {
                Some(json!({ "repo": name }))
            }
            Error::RepoAlreadyExists { scope, repo } => {
                Some(json!({ "scope": scope, "repo": repo }))
            }
            Error::RepoNotClean { workspace, repo } => {
                Some(json!({ "workspace_id": workspace, "repo": repo }))
            }
            Error::RepoHasUnpushedCommits {
                workspace,
                repo,
                count,
            } => Some(json!({ "workspace_id": workspace, "repo": repo, "unpushed": count })),
            Error::RepoInUse { repo, workspaces } => {
                Some(json!({ "repo": repo, "workspaces": workspaces }))
            }
            Error::NoReposConfigured => None,
            Error::MissingBranchConfig(template) => Some(json!({ "template": template })),
            Error::InvalidArgument(message)
            | Error::InvalidConfig(message)
            | Error::Template(message)
            | Error::Internal(message) => Some(json!({ "message": message })),
            Error::Git(err) => Some(json!({
                "message": err.message(),
                "class": format!("{:?}", err.class()),
                "code": format!("{:?}", err.code()),
            })),
            Error::CommandFailed {
                command,
                exit_code,
                stderr,
            } => Some(json!({
                "command": command,
                "exit_code": exit_code,
                "stderr": stderr,
            })),
            Error::HookTimeout {
                index,
                command,
                timeout_secs,
            } => Some(json!({
                "hook_index": index,
                "command": command,
                "timeout_secs": timeout_secs,
            })),
            Error::HookFailed {
                index,
                command,
                exit_code,
                repo,
                stderr,
            } => Some(json!({
                "hook_index": index,
                "command": command,
                "exit_code": exit_code,
                "repo": repo,
                "stderr": stderr,
            })),
            Error::Cancelled => None,
            Error::Io(err) => Some(json!({
                "message": err.to_string(),
                "kind": err.kind().to_string(),
            })),
            Error::Json(err) => Some(json!({ "message": err.to_string() })),
            Error::Yaml(err) => Some(json!({ "message": err.to_string() })),
            Error::TomlParse(err) => Some(json!({ "message": err.to_string() })),
            Error::TomlSerialize(err) => Some(json!({ "message": err.to_string() })),
            Error::Aggregate(errors) => Some(json!({
                "errors": errors
                    .iter()
                    .map(|e| json!({ "code": e.code(), "message": e.to_string() }))
                    .collect::<Vec<_>>(),
            })),
        };

        let sources = error_sources(self);
        if !sources.is_empty() {
            if let Some(value) = details.as_mut() {
                if let Some(obj) = value.as_object_mut() {
                    obj.insert("sources".to_string(), serde_json::json!(sources));
                }
            }
        }

        details
    }

    /// Join `other` onto this error, preserving `self` as the primary cause.
    ///
    /// Used when compensation steps fail during rollback: the caller sees
    /// the root cause first and the residue second.
    pub fn join(self, other: Error) -> Error {
        match self {
            Error::Aggregate(mut errors) => {
                errors.push(other);
                Error::Aggregate(errors)
            }
            primary => Error::Aggregate(vec![primary, other]),
        }
    }

    /// IO error with a path in the message, for store-level failures.
    pub fn io_at(path: &PathBuf, err: std::io::Error) -> Error {
        Error::Io(std::io::Error::new(
            err.kind(),
            format!("{}: {}", path.display(), err),
        ))
    }
}

fn git_class_slug(err: &git2::Error) -> String {
    format!("{:?}", err.class()).to_lowercase()
}

/// Result type alias for canopy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: String,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.code(),
            exit_code: err.exit_code(),
            details: err.details(),
        }
    }
}

fn error_sources(err: &dyn std::error::Error) -> Vec<String> {
    use std::error::Error as StdError;

    let mut sources = Vec::new();
    let mut current = StdError::source(err);
    while let Some(source) = current {
        sources.push(source.to_string());
        current = StdError::source(source);
    }
    sources
}
