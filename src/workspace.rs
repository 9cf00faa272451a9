//! Workspace metadata model and identifier validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A repository included in a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    /// Canonical name, matching the bare-clone folder under the projects root.
    pub name: String,
    /// Clone source URL.
    pub url: String,
}

/// Metadata record for one workspace.
///
/// Serialized as `workspace.yaml` inside the workspace directory. The file's
/// presence is the authoritative "workspace exists" signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    /// Unique validated identifier.
    pub id: String,
    /// Branch every worktree is aligned on.
    pub branch_name: String,
    /// Directory name under the workspaces root. Equals the id under the
    /// default naming template; persists through renames so the record stays
    /// locatable.
    pub directory_name: String,
    /// Ordered repo list; names are unique within the workspace.
    #[serde(default)]
    pub repos: Vec<RepoRef>,
    /// Set when template setup commands failed after creation.
    #[serde(default, skip_serializing_if = "is_false")]
    pub setup_incomplete: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl Workspace {
    pub fn new(id: impl Into<String>, branch: impl Into<String>, directory: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            branch_name: branch.into(),
            directory_name: directory.into(),
            repos: Vec::new(),
            setup_incomplete: false,
            created_at: Some(Utc::now()),
        }
    }

    pub fn repo(&self, name: &str) -> Option<&RepoRef> {
        self.repos.iter().find(|r| r.name == name)
    }

    pub fn has_repo(&self, name: &str) -> bool {
        self.repo(name).is_some()
    }

    /// Add a repo, rejecting duplicates by name.
    pub fn add_repo(&mut self, repo: RepoRef) -> Result<()> {
        if self.has_repo(&repo.name) {
            return Err(Error::RepoAlreadyExists {
                scope: format!("workspace '{}'", self.id),
                repo: repo.name,
            });
        }
        self.repos.push(repo);
        Ok(())
    }

    /// Remove a repo by name; error if absent.
    pub fn remove_repo(&mut self, name: &str) -> Result<RepoRef> {
        match self.repos.iter().position(|r| r.name == name) {
            Some(idx) => Ok(self.repos.remove(idx)),
            None => Err(Error::RepoNotFound(name.to_string())),
        }
    }
}

/// An archived workspace snapshot, restorable into an active workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedWorkspace {
    pub workspace: Workspace,
    /// Directory name at close time, so restore can recreate the same layout.
    pub directory_name: String,
    pub closed_at: DateTime<Utc>,
}

/// Validate a workspace identifier.
///
/// Ids become directory names and lock-file paths, so path separators and
/// dot-relative names are rejected outright.
pub fn validate_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(Error::InvalidArgument(
            "workspace id cannot be empty".to_string(),
        ));
    }
    if id == "." || id == ".." {
        return Err(Error::InvalidArgument(format!(
            "workspace id {id:?} is not allowed"
        )));
    }
    if id.starts_with('.') {
        return Err(Error::InvalidArgument(format!(
            "workspace id {id:?} cannot start with a dot"
        )));
    }
    for ch in id.chars() {
        if !(ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.')) {
            return Err(Error::InvalidArgument(format!(
                "workspace id {id:?} contains invalid character {ch:?}"
            )));
        }
    }
    Ok(())
}

/// Validate a branch name.
///
/// This is intentionally looser than id validation (branches may contain
/// slashes) but still rejects names git itself refuses.
pub fn validate_branch(branch: &str) -> Result<()> {
    if branch.trim().is_empty() {
        return Err(Error::InvalidArgument(
            "branch name cannot be empty".to_string(),
        ));
    }
    if branch.contains("..")
        || branch.starts_with('/')
        || branch.ends_with('/')
        || branch.ends_with(".lock")
        || branch.contains("//")
    {
        return Err(Error::InvalidArgument(format!(
            "invalid branch name: {branch:?}"
        )));
    }
    for ch in branch.chars() {
        if ch.is_whitespace() || matches!(ch, '~' | '^' | ':' | '?' | '*' | '[' | '\\') {
            return Err(Error::InvalidArgument(format!(
                "branch name {branch:?} contains invalid character {ch:?}"
            )));
        }
    }
    Ok(())
}
