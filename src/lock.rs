//! Workspace locking and atomic file operations.
//!
//! Two locking layers live here:
//! - `LockManager`: per-workspace advisory locks using an exclusive-create
//!   `.canopy.lock` file with stale reclamation and a bounded acquire loop.
//!   These serialize all mutating operations on a workspace across processes.
//! - `FileLock`: flock-based guards (fs2) for store-shared files such as the
//!   closed-workspace archive, plus the atomic write-temp-then-rename helpers.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{Error, Result};

/// Name of the per-workspace lock file
pub const LOCK_FILE: &str = ".canopy.lock";

/// Retry interval while waiting for a workspace lock
const ACQUIRE_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Default lock timeout in milliseconds for shared-file locks
pub const DEFAULT_FLOCK_TIMEOUT_MS: u64 = 5000;

/// Manages per-workspace exclusive locks under the workspaces root.
#[derive(Debug, Clone)]
pub struct LockManager {
    workspaces_root: PathBuf,
    timeout: Duration,
    /// Zero disables stale reclamation.
    stale_threshold: Duration,
}

/// A held workspace lock. Release removes the lock file.
#[derive(Debug)]
pub struct LockHandle {
    workspace_id: String,
    path: PathBuf,
    file: Option<File>,
}

impl LockManager {
    pub fn new(workspaces_root: PathBuf, timeout: Duration, stale_threshold: Duration) -> Self {
        Self {
            workspaces_root,
            timeout,
            stale_threshold,
        }
    }

    fn lock_path(&self, dir_name: &str) -> PathBuf {
        self.workspaces_root.join(dir_name).join(LOCK_FILE)
    }

    /// Acquire the exclusive lock for a workspace.
    ///
    /// `dir_name` is the workspace directory name (after the naming
    /// template). With `create_dir`, a missing workspace directory is
    /// created; otherwise it is a `workspace-not-found` error.
    pub fn acquire(
        &self,
        ctx: &Context,
        workspace_id: &str,
        dir_name: &str,
        create_dir: bool,
    ) -> Result<LockHandle> {
        let dir = self.workspaces_root.join(dir_name);
        if !dir.exists() {
            if create_dir {
                fs::create_dir_all(&dir)?;
            } else {
                return Err(Error::WorkspaceNotFound(workspace_id.to_string()));
            }
        }

        let path = self.lock_path(dir_name);
        let deadline = Instant::now() + self.timeout;

        loop {
            ctx.check()?;

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    // Contents are opaque; the pid helps a human diagnose.
                    let _ = writeln!(file, "{}", std::process::id());
                    let _ = file.sync_all();
                    debug!(workspace = workspace_id, path = %path.display(), "acquired workspace lock");
                    return Ok(LockHandle {
                        workspace_id: workspace_id.to_string(),
                        path,
                        file: Some(file),
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if self.try_reclaim_stale(&path, workspace_id) {
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(Error::WorkspaceLocked(workspace_id.to_string()));
                    }
                    std::thread::sleep(ACQUIRE_RETRY_INTERVAL);
                }
                Err(err) => return Err(Error::Io(err)),
            }
        }
    }

    /// Whether a lock file currently exists for the workspace directory.
    pub fn is_locked(&self, dir_name: &str) -> bool {
        self.lock_path(dir_name).exists()
    }

    /// Remove a stale lock file if reclamation is enabled and the file's
    /// mtime is older than the threshold. Returns true when removed.
    fn try_reclaim_stale(&self, path: &Path, workspace_id: &str) -> bool {
        if self.stale_threshold.is_zero() {
            return false;
        }
        let modified = match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            // Lock vanished between the open attempt and here.
            Err(_) => return true,
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age <= self.stale_threshold {
            return false;
        }
        warn!(
            workspace = workspace_id,
            age_secs = age.as_secs(),
            "reclaiming stale workspace lock"
        );
        match fs::remove_file(path) {
            Ok(()) => true,
            Err(err) if err.kind() == io::ErrorKind::NotFound => true,
            Err(err) => {
                warn!(workspace = workspace_id, error = %err, "failed to remove stale lock");
                false
            }
        }
    }
}

impl LockHandle {
    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Point the handle at a new lock location after a directory rename so
    /// release removes the moved file.
    pub fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }

    /// Release the lock, removing the lock file.
    ///
    /// A missing lock file is not an error; something already cleaned up.
    pub fn release(mut self) -> Result<()> {
        self.file.take();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::Io(err)),
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        // Remove the lock file if release was never called - ignore errors
        if self.file.take().is_some() {
            let _ = fs::remove_file(&self.path);
        }
    }
}

// =============================================================================
// Shared-file locks (flock) and atomic writes
// =============================================================================

/// A flock guard for store-shared files, released when dropped.
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire an exclusive flock on a file, creating it if absent.
    ///
    /// Waits up to `timeout_ms`, polling with a doubling backoff so a
    /// briefly-held lock is picked up quickly without spinning hard on a
    /// long-held one.
    pub fn acquire(path: impl AsRef<Path>, timeout_ms: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut backoff = Duration::from_millis(5);
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file, path }),
                Err(err) if !lock_is_held(&err) => return Err(Error::Io(err)),
                Err(_) => {}
            }

            if Instant::now() >= deadline {
                return Err(Error::Internal(format!(
                    "gave up waiting for shared lock {} after {timeout_ms}ms",
                    path.display()
                )));
            }
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(Duration::from_millis(80));
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Whether a flock failure means "someone else holds it" rather than a
/// real IO problem. Windows reports sharing violations (raw codes 32/33)
/// instead of `WouldBlock`.
fn lock_is_held(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || (cfg!(windows) && matches!(err.raw_os_error(), Some(32) | Some(33)))
}

/// Atomically replace a file's contents.
///
/// The data lands in a dot-prefixed staging file next to the target and is
/// renamed over it, so readers see either the old contents or the new ones,
/// never a torn write. A failed rename cleans the staging file up.
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Internal(format!("unusable path: {}", path.display())))?;
    let mut staging = path.to_path_buf();
    staging.set_file_name(format!(".{name}.tmp-{}", std::process::id()));

    let write_staged = || -> io::Result<()> {
        let mut out = File::create(&staging)?;
        out.write_all(data)?;
        out.sync_all()
    };
    if let Err(err) = write_staged().and_then(|()| fs::rename(&staging, path)) {
        let _ = fs::remove_file(&staging);
        return Err(Error::Io(err));
    }
    Ok(())
}
