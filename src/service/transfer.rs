//! Exporting and importing workspace definitions.
//!
//! An export is a portable description of a workspace: id, branch, and the
//! repo set. Importing feeds the repo URLs back through the identifier
//! resolver, so registry aliases survive a move between machines.

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::service::{CreateOptions, CreateOutcome, WorkspaceService};
use crate::workspace::RepoRef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceExport {
    pub id: String,
    pub branch_name: String,
    pub repos: Vec<RepoRef>,
}

impl WorkspaceExport {
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(text)?)
    }
}

impl WorkspaceService {
    /// Describe a workspace as a portable document.
    pub fn export_workspace(&self, id: &str) -> Result<WorkspaceExport> {
        let (ws, _) = self.find_workspace(id)?;
        Ok(WorkspaceExport {
            id: ws.id,
            branch_name: ws.branch_name,
            repos: ws.repos,
        })
    }

    /// Create a workspace from an exported document.
    ///
    /// Goes through the regular creation path, so locking, rollback, and
    /// hooks all apply.
    pub fn import_workspace(
        &self,
        ctx: &Context,
        doc: &WorkspaceExport,
        opts: &CreateOptions,
    ) -> Result<CreateOutcome> {
        if doc.branch_name.trim().is_empty() {
            return Err(Error::MissingBranchConfig(
                "the export document".to_string(),
            ));
        }
        let tokens: Vec<String> = doc.repos.iter().map(|r| r.url.clone()).collect();
        self.create_workspace(ctx, &doc.id, &doc.branch_name, &tokens, opts)
    }
}
