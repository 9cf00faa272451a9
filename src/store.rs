//! Workspace metadata persistence.
//!
//! The store exclusively owns on-disk metadata. Active records live at
//! `<workspaces_root>/<dir>/workspace.yaml`; the file's presence is the
//! authoritative "workspace present" signal. Closed records are archived
//! under `<workspaces_root>/.canopy/closed/` and can be restored later.
//! All writes are atomic (temp + rename); archive mutations additionally
//! serialize under a flock so concurrent closes never corrupt the index.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::lock::{self, FileLock, DEFAULT_FLOCK_TIMEOUT_MS};
use crate::workspace::{ClosedWorkspace, Workspace};

/// Metadata file name inside each workspace directory.
pub const METADATA_FILE: &str = "workspace.yaml";

/// Internal state directory under the workspaces root.
const STATE_DIR: &str = ".canopy";

/// Maps a workspace id to its directory name (the naming template).
pub type DirNamer = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Persistence contract for workspace metadata.
pub trait WorkspaceStore: Send + Sync {
    /// Whether a metadata file exists under the given directory name.
    fn exists(&self, dir_name: &str) -> bool;

    /// Commit a new record; `workspace-exists` on conflict.
    fn create(&self, ws: &Workspace) -> Result<()>;

    /// Overwrite an existing record.
    fn save(&self, ws: &Workspace) -> Result<()>;

    fn load(&self, id: &str) -> Result<Workspace>;

    fn list(&self) -> Result<Vec<Workspace>>;

    /// Remove the record and the workspace directory.
    fn delete(&self, id: &str) -> Result<()>;

    /// Rename the workspace directory and rewrite the record under the new
    /// id. `workspace-exists` if the target directory is occupied.
    fn rename(&self, old_id: &str, new_id: &str) -> Result<()>;

    /// Archive the record as a closed entry. Does not touch the active
    /// record; callers delete it separately.
    fn close(&self, id: &str, closed_at: DateTime<Utc>) -> Result<ClosedWorkspace>;

    fn list_closed(&self) -> Result<Vec<ClosedWorkspace>>;

    /// Most recent closed entry for an id.
    fn latest_closed(&self, id: &str) -> Result<Option<ClosedWorkspace>>;

    fn delete_closed(&self, id: &str, closed_at: DateTime<Utc>) -> Result<()>;
}

/// Filesystem-backed store.
pub struct FsWorkspaceStore {
    workspaces_root: PathBuf,
    dir_namer: DirNamer,
}

impl FsWorkspaceStore {
    pub fn new(workspaces_root: PathBuf, dir_namer: DirNamer) -> Self {
        Self {
            workspaces_root,
            dir_namer,
        }
    }

    pub fn workspace_dir(&self, dir_name: &str) -> PathBuf {
        self.workspaces_root.join(dir_name)
    }

    pub fn metadata_path(&self, dir_name: &str) -> PathBuf {
        self.workspace_dir(dir_name).join(METADATA_FILE)
    }

    fn closed_dir(&self) -> PathBuf {
        self.workspaces_root.join(STATE_DIR).join("closed")
    }

    fn closed_lock_path(&self) -> PathBuf {
        self.workspaces_root.join(STATE_DIR).join("closed.lock")
    }

    fn closed_entry_path(&self, id: &str, closed_at: DateTime<Utc>) -> PathBuf {
        let stamp = closed_at.format("%Y%m%dT%H%M%S%3fZ");
        self.closed_dir().join(format!("{id}@{stamp}.yaml"))
    }

    fn read_record(&self, path: &Path) -> Result<Workspace> {
        let text = fs::read_to_string(path)?;
        let ws: Workspace = serde_yaml_ng::from_str(&text).map_err(|err| {
            Error::WorkspaceMetadata {
                workspace: path.display().to_string(),
                message: err.to_string(),
            }
        })?;
        Ok(ws)
    }

    fn write_record(&self, ws: &Workspace) -> Result<()> {
        let path = self.metadata_path(&ws.directory_name);
        let text = serde_yaml_ng::to_string(ws)?;
        lock::write_atomic(&path, text.as_bytes())
    }

    /// Locate the record for an id: the computed directory first, then a
    /// scan (directory names survive naming-template changes and renames).
    fn find_record(&self, id: &str) -> Result<Option<Workspace>> {
        if let Ok(dir) = (self.dir_namer)(id) {
            let path = self.metadata_path(&dir);
            if path.exists() {
                let ws = self.read_record(&path)?;
                if ws.id == id {
                    return Ok(Some(ws));
                }
            }
        }
        for ws in self.scan()? {
            if ws.id == id {
                return Ok(Some(ws));
            }
        }
        Ok(None)
    }

    fn scan(&self) -> Result<Vec<Workspace>> {
        let mut records = Vec::new();
        if !self.workspaces_root.exists() {
            return Ok(records);
        }
        for entry in fs::read_dir(&self.workspaces_root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            if name.to_str() == Some(STATE_DIR) {
                continue;
            }
            let path = entry.path().join(METADATA_FILE);
            if path.exists() {
                records.push(self.read_record(&path)?);
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}

impl WorkspaceStore for FsWorkspaceStore {
    fn exists(&self, dir_name: &str) -> bool {
        self.metadata_path(dir_name).exists()
    }

    fn create(&self, ws: &Workspace) -> Result<()> {
        let path = self.metadata_path(&ws.directory_name);
        if path.exists() {
            return Err(Error::WorkspaceExists(ws.id.clone()));
        }
        self.write_record(ws)
    }

    fn save(&self, ws: &Workspace) -> Result<()> {
        self.write_record(ws)
    }

    fn load(&self, id: &str) -> Result<Workspace> {
        self.find_record(id)?
            .ok_or_else(|| Error::WorkspaceNotFound(id.to_string()))
    }

    fn list(&self) -> Result<Vec<Workspace>> {
        self.scan()
    }

    fn delete(&self, id: &str) -> Result<()> {
        let ws = self.load(id)?;
        let dir = self.workspace_dir(&ws.directory_name);
        fs::remove_dir_all(&dir).map_err(|err| Error::io_at(&dir, err))
    }

    fn rename(&self, old_id: &str, new_id: &str) -> Result<()> {
        let mut ws = self.load(old_id)?;
        let new_dir = (self.dir_namer)(new_id)?;

        let from = self.workspace_dir(&ws.directory_name);
        let to = self.workspace_dir(&new_dir);
        if to.exists() {
            return Err(Error::WorkspaceExists(new_id.to_string()));
        }
        fs::rename(&from, &to).map_err(|err| Error::io_at(&from, err))?;

        ws.id = new_id.to_string();
        ws.directory_name = new_dir;
        self.write_record(&ws)
    }

    fn close(&self, id: &str, closed_at: DateTime<Utc>) -> Result<ClosedWorkspace> {
        let ws = self.load(id)?;
        let closed = ClosedWorkspace {
            directory_name: ws.directory_name.clone(),
            workspace: ws,
            closed_at,
        };

        let _lock = FileLock::acquire(self.closed_lock_path(), DEFAULT_FLOCK_TIMEOUT_MS)?;
        let path = self.closed_entry_path(id, closed_at);
        let text = serde_yaml_ng::to_string(&closed)?;
        lock::write_atomic(&path, text.as_bytes())?;
        Ok(closed)
    }

    fn list_closed(&self) -> Result<Vec<ClosedWorkspace>> {
        let dir = self.closed_dir();
        let mut entries = Vec::new();
        if !dir.exists() {
            return Ok(entries);
        }
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let text = fs::read_to_string(&path)?;
            let closed: ClosedWorkspace = serde_yaml_ng::from_str(&text)?;
            entries.push(closed);
        }
        entries.sort_by(|a, b| a.workspace.id.cmp(&b.workspace.id).then(a.closed_at.cmp(&b.closed_at)));
        Ok(entries)
    }

    fn latest_closed(&self, id: &str) -> Result<Option<ClosedWorkspace>> {
        Ok(self
            .list_closed()?
            .into_iter()
            .filter(|c| c.workspace.id == id)
            .max_by_key(|c| c.closed_at))
    }

    fn delete_closed(&self, id: &str, closed_at: DateTime<Utc>) -> Result<()> {
        let _lock = FileLock::acquire(self.closed_lock_path(), DEFAULT_FLOCK_TIMEOUT_MS)?;
        let path = self.closed_entry_path(id, closed_at);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::WorkspaceNotFound(id.to_string()))
            }
            Err(err) => Err(Error::io_at(&path, err)),
        }
    }
}
