//! In-memory collaborators for unit-testing the service layer.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::git::{GitOps, GitOutput, RepoStatus};
use crate::store::WorkspaceStore;
use crate::workspace::{ClosedWorkspace, Workspace};

/// In-memory `WorkspaceStore` with failure injection.
#[derive(Default)]
pub struct MemStore {
    active: Mutex<BTreeMap<String, Workspace>>,
    closed: Mutex<Vec<ClosedWorkspace>>,
    fail_delete: Mutex<Option<String>>,
    fail_save: Mutex<Option<String>>,
    fail_rename: Mutex<bool>,
}

impl MemStore {
    pub fn insert(&self, ws: Workspace) {
        self.active.lock().unwrap().insert(ws.id.clone(), ws);
    }

    pub fn get(&self, id: &str) -> Option<Workspace> {
        self.active.lock().unwrap().get(id).cloned()
    }

    pub fn closed_entries(&self) -> Vec<ClosedWorkspace> {
        self.closed.lock().unwrap().clone()
    }

    /// Make `delete(id)` fail once with an IO error.
    pub fn fail_delete_for(&self, id: &str) {
        *self.fail_delete.lock().unwrap() = Some(id.to_string());
    }

    /// Make `save` fail for records with this id.
    pub fn fail_save_for(&self, id: &str) {
        *self.fail_save.lock().unwrap() = Some(id.to_string());
    }

    pub fn fail_next_rename(&self) {
        *self.fail_rename.lock().unwrap() = true;
    }
}

impl WorkspaceStore for MemStore {
    fn exists(&self, dir_name: &str) -> bool {
        self.active
            .lock()
            .unwrap()
            .values()
            .any(|ws| ws.directory_name == dir_name)
    }

    fn create(&self, ws: &Workspace) -> Result<()> {
        let mut active = self.active.lock().unwrap();
        if active.contains_key(&ws.id)
            || active.values().any(|w| w.directory_name == ws.directory_name)
        {
            return Err(Error::WorkspaceExists(ws.id.clone()));
        }
        active.insert(ws.id.clone(), ws.clone());
        Ok(())
    }

    fn save(&self, ws: &Workspace) -> Result<()> {
        if self.fail_save.lock().unwrap().as_deref() == Some(ws.id.as_str()) {
            return Err(Error::Internal(format!("injected save failure: {}", ws.id)));
        }
        self.active.lock().unwrap().insert(ws.id.clone(), ws.clone());
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Workspace> {
        self.get(id)
            .ok_or_else(|| Error::WorkspaceNotFound(id.to_string()))
    }

    fn list(&self) -> Result<Vec<Workspace>> {
        Ok(self.active.lock().unwrap().values().cloned().collect())
    }

    fn delete(&self, id: &str) -> Result<()> {
        {
            let mut fail = self.fail_delete.lock().unwrap();
            if fail.as_deref() == Some(id) {
                fail.take();
                return Err(Error::Internal(format!("injected delete failure: {id}")));
            }
        }
        self.active
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::WorkspaceNotFound(id.to_string()))
    }

    fn rename(&self, old_id: &str, new_id: &str) -> Result<()> {
        if std::mem::take(&mut *self.fail_rename.lock().unwrap()) {
            return Err(Error::Internal("injected rename failure".into()));
        }
        let mut active = self.active.lock().unwrap();
        if active.contains_key(new_id) {
            return Err(Error::WorkspaceExists(new_id.to_string()));
        }
        let mut ws = active
            .remove(old_id)
            .ok_or_else(|| Error::WorkspaceNotFound(old_id.to_string()))?;
        ws.id = new_id.to_string();
        ws.directory_name = new_id.to_string();
        active.insert(new_id.to_string(), ws);
        Ok(())
    }

    fn close(&self, id: &str, closed_at: DateTime<Utc>) -> Result<ClosedWorkspace> {
        let ws = self.load(id)?;
        let closed = ClosedWorkspace {
            directory_name: ws.directory_name.clone(),
            workspace: ws,
            closed_at,
        };
        self.closed.lock().unwrap().push(closed.clone());
        Ok(closed)
    }

    fn list_closed(&self) -> Result<Vec<ClosedWorkspace>> {
        Ok(self.closed.lock().unwrap().clone())
    }

    fn latest_closed(&self, id: &str) -> Result<Option<ClosedWorkspace>> {
        Ok(self
            .closed
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.workspace.id == id)
            .max_by_key(|c| c.closed_at)
            .cloned())
    }

    fn delete_closed(&self, id: &str, closed_at: DateTime<Utc>) -> Result<()> {
        let mut closed = self.closed.lock().unwrap();
        let before = closed.len();
        closed.retain(|c| !(c.workspace.id == id && c.closed_at == closed_at));
        if closed.len() == before {
            return Err(Error::WorkspaceNotFound(id.to_string()));
        }
        Ok(())
    }
}

/// Scripted `GitOps` that materializes fake clones and worktrees on disk so
/// filesystem-level assertions hold.
pub struct MockGit {
    #[allow(dead_code)]
    projects_root: PathBuf,
    canonical: Mutex<BTreeSet<String>>,
    statuses: Mutex<HashMap<String, RepoStatus>>,
    fail_clone: Mutex<HashSet<String>>,
    fail_fetch: Mutex<HashSet<String>>,
    fail_pull: Mutex<HashSet<String>>,
    fail_prune: Mutex<HashSet<String>>,
    fail_rename_branch: Mutex<HashSet<String>>,
    slow_fetch: Mutex<HashMap<String, Duration>>,
    slow_clone: Mutex<HashMap<String, Duration>>,
    run_outputs: Mutex<VecDeque<GitOutput>>,
    pruned: Mutex<Vec<String>>,
    pulled: Mutex<Vec<String>>,
    pushed: Mutex<Vec<String>>,
    checkouts: Mutex<Vec<(String, String)>>,
    renamed: Mutex<Vec<(String, String, String)>>,
    removed_worktrees: Mutex<Vec<PathBuf>>,
    run_calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl MockGit {
    pub fn new(projects_root: PathBuf) -> Self {
        Self {
            projects_root,
            canonical: Mutex::new(BTreeSet::new()),
            statuses: Mutex::new(HashMap::new()),
            fail_clone: Mutex::new(HashSet::new()),
            fail_fetch: Mutex::new(HashSet::new()),
            fail_pull: Mutex::new(HashSet::new()),
            fail_prune: Mutex::new(HashSet::new()),
            fail_rename_branch: Mutex::new(HashSet::new()),
            slow_fetch: Mutex::new(HashMap::new()),
            slow_clone: Mutex::new(HashMap::new()),
            run_outputs: Mutex::new(VecDeque::new()),
            pruned: Mutex::new(Vec::new()),
            pulled: Mutex::new(Vec::new()),
            pushed: Mutex::new(Vec::new()),
            checkouts: Mutex::new(Vec::new()),
            renamed: Mutex::new(Vec::new()),
            removed_worktrees: Mutex::new(Vec::new()),
            run_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_canonical(&self, names: &[&str]) {
        let mut canonical = self.canonical.lock().unwrap();
        for name in names {
            canonical.insert((*name).to_string());
        }
    }

    pub fn set_status(&self, repo: &str, status: RepoStatus) {
        self.statuses.lock().unwrap().insert(repo.to_string(), status);
    }

    pub fn fail_clone_for(&self, key: &str) {
        self.fail_clone.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_fetch_for(&self, key: &str) {
        self.fail_fetch.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_pull_for(&self, key: &str) {
        self.fail_pull.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_prune_for(&self, key: &str) {
        self.fail_prune.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_rename_branch_for(&self, key: &str) {
        self.fail_rename_branch.lock().unwrap().insert(key.to_string());
    }

    pub fn slow_fetch_for(&self, key: &str, delay: Duration) {
        self.slow_fetch.lock().unwrap().insert(key.to_string(), delay);
    }

    pub fn slow_clone_for(&self, key: &str, delay: Duration) {
        self.slow_clone.lock().unwrap().insert(key.to_string(), delay);
    }

    pub fn push_run_output(&self, output: GitOutput) {
        self.run_outputs.lock().unwrap().push_back(output);
    }

    pub fn pruned(&self) -> Vec<String> {
        self.pruned.lock().unwrap().clone()
    }

    pub fn pulled(&self) -> Vec<String> {
        self.pulled.lock().unwrap().clone()
    }

    pub fn pushed(&self) -> Vec<String> {
        self.pushed.lock().unwrap().clone()
    }

    pub fn checkouts(&self) -> Vec<(String, String)> {
        self.checkouts.lock().unwrap().clone()
    }

    pub fn renamed_branches(&self) -> Vec<(String, String, String)> {
        self.renamed.lock().unwrap().clone()
    }

    pub fn removed_worktrees(&self) -> Vec<PathBuf> {
        self.removed_worktrees.lock().unwrap().clone()
    }

    pub fn run_calls(&self) -> Vec<(String, Vec<String>)> {
        self.run_calls.lock().unwrap().clone()
    }

    fn name_of(path: &Path) -> String {
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string()
    }

    /// Sleep in slices, observing cancellation like a real subprocess wait.
    fn interruptible_sleep(ctx: &Context, total: Duration) -> Result<()> {
        let slice = Duration::from_millis(10);
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            ctx.check()?;
            std::thread::sleep(slice);
            elapsed += slice;
        }
        Ok(())
    }
}

impl GitOps for MockGit {
    fn clone_bare(&self, ctx: &Context, url: &str, path: &Path) -> Result<()> {
        ctx.check()?;
        let name = Self::name_of(path);
        if let Some(delay) = self.slow_clone.lock().unwrap().get(&name).copied() {
            Self::interruptible_sleep(ctx, delay)?;
        }
        let failures = self.fail_clone.lock().unwrap();
        if failures.contains(&name) || failures.iter().any(|key| url.contains(key.as_str())) {
            return Err(Error::Internal(format!("clone failed: {url}")));
        }
        drop(failures);

        std::fs::create_dir_all(path)?;
        std::fs::write(path.join("HEAD"), "ref: refs/heads/main\n")?;
        self.canonical.lock().unwrap().insert(name);
        Ok(())
    }

    fn ensure_canonical(&self, ctx: &Context, url: &str, path: &Path) -> Result<()> {
        if path.join("HEAD").exists() {
            return Ok(());
        }
        self.clone_bare(ctx, url, path)
    }

    fn add_worktree(
        &self,
        ctx: &Context,
        canonical: &Path,
        worktree: &Path,
        _branch: &str,
    ) -> Result<()> {
        ctx.check()?;
        std::fs::create_dir_all(worktree)?;
        std::fs::write(
            worktree.join(".git"),
            format!("gitdir: {}\n", canonical.display()),
        )?;
        Ok(())
    }

    fn remove_worktree(
        &self,
        _ctx: &Context,
        _canonical: &Path,
        worktree: &Path,
        _force: bool,
    ) -> Result<()> {
        if worktree.exists() {
            std::fs::remove_dir_all(worktree)?;
        }
        self.removed_worktrees.lock().unwrap().push(worktree.to_path_buf());
        Ok(())
    }

    fn prune_worktrees(&self, _ctx: &Context, canonical: &Path) -> Result<()> {
        let name = Self::name_of(canonical);
        if self.fail_prune.lock().unwrap().contains(&name) {
            return Err(Error::Internal(format!("prune failed: {name}")));
        }
        self.pruned.lock().unwrap().push(name);
        Ok(())
    }

    fn status(&self, ctx: &Context, worktree: &Path) -> Result<RepoStatus> {
        ctx.check()?;
        let name = Self::name_of(worktree);
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .unwrap_or(RepoStatus {
                branch: "main".into(),
                is_dirty: false,
                unpushed: 0,
                behind: 0,
            }))
    }

    fn fetch(&self, ctx: &Context, canonical: &Path) -> Result<()> {
        ctx.check()?;
        let name = Self::name_of(canonical);
        if let Some(delay) = self.slow_fetch.lock().unwrap().get(&name).copied() {
            Self::interruptible_sleep(ctx, delay)?;
        }
        if self.fail_fetch.lock().unwrap().contains(&name) {
            return Err(Error::Internal(format!("fetch failed: {name}")));
        }
        Ok(())
    }

    fn pull(&self, ctx: &Context, worktree: &Path) -> Result<()> {
        ctx.check()?;
        let name = Self::name_of(worktree);
        if self.fail_pull.lock().unwrap().contains(&name) {
            return Err(Error::CommandFailed {
                command: "git pull --ff-only".into(),
                exit_code: 1,
                stderr: "fatal: Not possible to fast-forward, aborting (merge conflict)".into(),
            });
        }
        self.pulled.lock().unwrap().push(name);
        Ok(())
    }

    fn push(&self, ctx: &Context, worktree: &Path) -> Result<()> {
        ctx.check()?;
        self.pushed.lock().unwrap().push(Self::name_of(worktree));
        Ok(())
    }

    fn checkout(&self, ctx: &Context, worktree: &Path, branch: &str, _create: bool) -> Result<()> {
        ctx.check()?;
        self.checkouts
            .lock()
            .unwrap()
            .push((Self::name_of(worktree), branch.to_string()));
        Ok(())
    }

    fn rename_branch(&self, ctx: &Context, worktree: &Path, old: &str, new: &str) -> Result<()> {
        ctx.check()?;
        let name = Self::name_of(worktree);
        if self.fail_rename_branch.lock().unwrap().contains(&name) {
            return Err(Error::Internal(format!("branch rename failed: {name}")));
        }
        self.renamed
            .lock()
            .unwrap()
            .push((name, old.to_string(), new.to_string()));
        Ok(())
    }

    fn run(&self, ctx: &Context, worktree: &Path, args: &[String]) -> Result<GitOutput> {
        ctx.check()?;
        self.run_calls
            .lock()
            .unwrap()
            .push((Self::name_of(worktree), args.to_vec()));
        Ok(self
            .run_outputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(GitOutput {
                stdout: "ok\n".into(),
                stderr: String::new(),
                exit_code: 0,
            }))
    }

    fn list_canonical(&self, ctx: &Context) -> Result<Vec<String>> {
        ctx.check()?;
        Ok(self.canonical.lock().unwrap().iter().cloned().collect())
    }

    fn upstream_url(&self, ctx: &Context, canonical: &Path) -> Result<String> {
        ctx.check()?;
        Ok(format!("https://example.com/{}.git", Self::name_of(canonical)))
    }

    fn last_fetch(&self, _ctx: &Context, _canonical: &Path) -> Result<Option<SystemTime>> {
        Ok(None)
    }

    fn size(&self, _ctx: &Context, _path: &Path) -> Result<u64> {
        Ok(1024)
    }
}
