//! Git operations behind the `GitOps` trait.
//!
//! Structural queries (status, branches, remotes) go through libgit2;
//! network operations (clone, fetch, pull, push) and arbitrary commands
//! shell out to `git` so credential helpers and transport config behave
//! exactly as they do on the user's command line. Subprocesses poll the
//! cancellation context and are killed when it is cancelled or expires.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, SystemTime};

use git2::{BranchType, Repository, StatusOptions};
use tracing::debug;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::redact::redact;

/// Poll interval while waiting on a git subprocess.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Aggregate status of one worktree.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RepoStatus {
    pub branch: String,
    pub is_dirty: bool,
    /// Commits ahead of upstream.
    pub unpushed: usize,
    /// Commits behind upstream.
    pub behind: usize,
}

/// Captured output of an arbitrary git command.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Git adapter contract used by the workspace and canonical services.
///
/// Non-zero exits are errors except for `run`, which reports the exit code
/// to the caller.
pub trait GitOps: Send + Sync {
    fn clone_bare(&self, ctx: &Context, url: &str, path: &Path) -> Result<()>;

    /// Clone if the canonical is absent; otherwise a no-op.
    fn ensure_canonical(&self, ctx: &Context, url: &str, path: &Path) -> Result<()>;

    fn add_worktree(
        &self,
        ctx: &Context,
        canonical: &Path,
        worktree: &Path,
        branch: &str,
    ) -> Result<()>;

    fn remove_worktree(
        &self,
        ctx: &Context,
        canonical: &Path,
        worktree: &Path,
        force: bool,
    ) -> Result<()>;

    fn prune_worktrees(&self, ctx: &Context, canonical: &Path) -> Result<()>;

    fn status(&self, ctx: &Context, worktree: &Path) -> Result<RepoStatus>;

    fn fetch(&self, ctx: &Context, canonical: &Path) -> Result<()>;

    fn pull(&self, ctx: &Context, worktree: &Path) -> Result<()>;

    fn push(&self, ctx: &Context, worktree: &Path) -> Result<()>;

    fn checkout(&self, ctx: &Context, worktree: &Path, branch: &str, create: bool) -> Result<()>;

    fn rename_branch(&self, ctx: &Context, worktree: &Path, old: &str, new: &str) -> Result<()>;

    /// Run an arbitrary git command in a worktree, capturing output.
    fn run(&self, ctx: &Context, worktree: &Path, args: &[String]) -> Result<GitOutput>;

    /// Enumerate canonical repo names under the projects root.
    fn list_canonical(&self, ctx: &Context) -> Result<Vec<String>>;

    fn upstream_url(&self, ctx: &Context, canonical: &Path) -> Result<String>;

    /// Time of the last fetch, from FETCH_HEAD's mtime.
    fn last_fetch(&self, ctx: &Context, canonical: &Path) -> Result<Option<SystemTime>>;

    /// Recursive on-disk size in bytes.
    fn size(&self, ctx: &Context, path: &Path) -> Result<u64>;
}

/// `GitOps` over the system `git` binary and libgit2.
#[derive(Debug, Clone)]
pub struct SystemGit {
    projects_root: PathBuf,
}

impl SystemGit {
    pub fn new(projects_root: PathBuf) -> Self {
        Self { projects_root }
    }

    /// Run `git` with the given args, failing on non-zero exit.
    fn git(&self, ctx: &Context, cwd: Option<&Path>, args: &[&str]) -> Result<GitOutput> {
        let output = self.git_raw(ctx, cwd, args)?;
        if output.exit_code != 0 {
            return Err(Error::CommandFailed {
                command: format!("git {}", args.join(" ")),
                exit_code: output.exit_code,
                stderr: redact(output.stderr.trim_end()),
            });
        }
        Ok(output)
    }

    /// Run `git`, reporting the exit code instead of failing on it.
    fn git_raw(&self, ctx: &Context, cwd: Option<&Path>, args: &[&str]) -> Result<GitOutput> {
        ctx.check()?;
        debug!(args = %redact(&args.join(" ")), "git");

        let mut command = Command::new("git");
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Never block on an interactive credential prompt.
            .env("GIT_TERMINAL_PROMPT", "0");
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn()?;
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_reader = std::thread::spawn(move || drain(stdout_pipe));
        let stderr_reader = std::thread::spawn(move || drain(stderr_pipe));

        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None => {
                    if ctx.is_cancelled() {
                        let _ = child.kill();
                        let _ = child.wait();
                        let _ = stdout_reader.join();
                        let _ = stderr_reader.join();
                        return Err(Error::Cancelled);
                    }
                    std::thread::sleep(WAIT_POLL_INTERVAL);
                }
            }
        };

        Ok(GitOutput {
            stdout: stdout_reader.join().unwrap_or_default(),
            stderr: stderr_reader.join().unwrap_or_default(),
            exit_code: status.code().unwrap_or(-1),
        })
    }

    /// Whether a local branch exists, checked through the repo (bare clone
    /// or worktree) at `repo_path`.
    fn branch_exists(&self, repo_path: &Path, branch: &str) -> Result<bool> {
        let repo = Repository::open(repo_path)?;
        let result = match repo.find_branch(branch, BranchType::Local) {
            Ok(_) => Ok(true),
            Err(err) if err.code() == git2::ErrorCode::NotFound => Ok(false),
            Err(err) => Err(Error::Git(err)),
        };
        result
    }
}

impl GitOps for SystemGit {
    fn clone_bare(&self, ctx: &Context, url: &str, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Clone into a sibling temp dir and rename into place, so a
        // canonical directory only ever appears fully populated. The temp
        // name is unique per call; concurrent clones of the same canonical
        // race only on the final rename.
        static CLONE_SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let seq = CLONE_SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let temp = path.with_extension(format!("tmp.{}.{seq}", std::process::id()));
        if temp.exists() {
            std::fs::remove_dir_all(&temp)?;
        }
        let temp_str = temp.display().to_string();
        if let Err(err) = self.git(ctx, None, &["clone", "--bare", url, &temp_str]) {
            let _ = std::fs::remove_dir_all(&temp);
            return Err(err);
        }

        match std::fs::rename(&temp, path) {
            Ok(()) => Ok(()),
            Err(_) if path.join("HEAD").exists() => {
                // Lost a clone race; the canonical is already in place.
                let _ = std::fs::remove_dir_all(&temp);
                Ok(())
            }
            Err(err) => {
                let _ = std::fs::remove_dir_all(&temp);
                Err(Error::Io(err))
            }
        }
    }

    fn ensure_canonical(&self, ctx: &Context, url: &str, path: &Path) -> Result<()> {
        if path.join("HEAD").exists() {
            return Ok(());
        }
        match self.clone_bare(ctx, url, path) {
            Ok(()) => Ok(()),
            // A concurrent caller may have cloned the same canonical while
            // we were checking; losing that race is success.
            Err(_) if path.join("HEAD").exists() => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn add_worktree(
        &self,
        ctx: &Context,
        canonical: &Path,
        worktree: &Path,
        branch: &str,
    ) -> Result<()> {
        if let Some(parent) = worktree.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let worktree_str = worktree.display().to_string();
        if self.branch_exists(canonical, branch)? {
            self.git(
                ctx,
                Some(canonical),
                &["worktree", "add", &worktree_str, branch],
            )?;
        } else {
            self.git(
                ctx,
                Some(canonical),
                &["worktree", "add", "-b", branch, &worktree_str],
            )?;
        }
        Ok(())
    }

    fn remove_worktree(
        &self,
        ctx: &Context,
        canonical: &Path,
        worktree: &Path,
        force: bool,
    ) -> Result<()> {
        let worktree_str = worktree.display().to_string();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&worktree_str);

        match self.git(ctx, Some(canonical), &args) {
            Ok(_) => Ok(()),
            Err(err) if force => {
                // The directory may already be half-gone; clear it and let
                // prune drop the administrative entry.
                debug!(worktree = %worktree.display(), error = %err, "worktree remove failed, pruning");
                if worktree.exists() {
                    std::fs::remove_dir_all(worktree)?;
                }
                self.prune_worktrees(ctx, canonical)
            }
            Err(err) => Err(err),
        }
    }

    fn prune_worktrees(&self, ctx: &Context, canonical: &Path) -> Result<()> {
        self.git(ctx, Some(canonical), &["worktree", "prune"])?;
        Ok(())
    }

    fn status(&self, ctx: &Context, worktree: &Path) -> Result<RepoStatus> {
        ctx.check()?;
        let repo = Repository::open(worktree)?;

        let head = repo.head()?;
        let branch = head.shorthand().unwrap_or("HEAD").to_string();

        let mut opts = StatusOptions::new();
        opts.include_untracked(true).include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts))?;
        let is_dirty = !statuses.is_empty();

        let (unpushed, behind) = match upstream_target(&repo, &branch) {
            Some(upstream_oid) => {
                let local_oid = head
                    .target()
                    .ok_or_else(|| Error::Internal("HEAD has no target commit".into()))?;
                let (ahead, behind) = repo.graph_ahead_behind(local_oid, upstream_oid)?;
                (ahead, behind)
            }
            None => (0, 0),
        };

        Ok(RepoStatus {
            branch,
            is_dirty,
            unpushed,
            behind,
        })
    }

    fn fetch(&self, ctx: &Context, canonical: &Path) -> Result<()> {
        self.git(ctx, Some(canonical), &["fetch", "--all", "--prune"])?;
        Ok(())
    }

    fn pull(&self, ctx: &Context, worktree: &Path) -> Result<()> {
        self.git(ctx, Some(worktree), &["pull", "--ff-only"])?;
        Ok(())
    }

    fn push(&self, ctx: &Context, worktree: &Path) -> Result<()> {
        self.git(ctx, Some(worktree), &["push", "-u", "origin", "HEAD"])?;
        Ok(())
    }

    fn checkout(&self, ctx: &Context, worktree: &Path, branch: &str, create: bool) -> Result<()> {
        // Only pass -b for a genuinely missing branch; a failed checkout of
        // an existing branch must surface its own error.
        if create && !self.branch_exists(worktree, branch)? {
            self.git(ctx, Some(worktree), &["checkout", "-b", branch])?;
        } else {
            self.git(ctx, Some(worktree), &["checkout", branch])?;
        }
        Ok(())
    }

    fn rename_branch(&self, ctx: &Context, worktree: &Path, old: &str, new: &str) -> Result<()> {
        self.git(ctx, Some(worktree), &["branch", "-m", old, new])?;
        Ok(())
    }

    fn run(&self, ctx: &Context, worktree: &Path, args: &[String]) -> Result<GitOutput> {
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.git_raw(ctx, Some(worktree), &refs)
    }

    fn list_canonical(&self, ctx: &Context) -> Result<Vec<String>> {
        ctx.check()?;
        if !self.projects_root.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.projects_root)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() && path.join("HEAD").exists() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn upstream_url(&self, ctx: &Context, canonical: &Path) -> Result<String> {
        ctx.check()?;
        let repo = Repository::open(canonical)?;
        let remote = repo.find_remote("origin")?;
        remote
            .url()
            .map(String::from)
            .ok_or_else(|| Error::Internal("origin URL is not valid utf-8".into()))
    }

    fn last_fetch(&self, ctx: &Context, canonical: &Path) -> Result<Option<SystemTime>> {
        ctx.check()?;
        let fetch_head = canonical.join("FETCH_HEAD");
        if !fetch_head.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::metadata(fetch_head)?.modified()?))
    }

    fn size(&self, ctx: &Context, path: &Path) -> Result<u64> {
        ctx.check()?;
        dir_size(path)
    }
}

fn drain(pipe: Option<impl std::io::Read>) -> String {
    let mut buf = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut buf);
    }
    buf
}

/// Resolve the upstream commit for a branch: the configured upstream, or
/// `origin/<branch>` when no upstream is set (fresh worktrees over bare
/// clones usually have none).
fn upstream_target(repo: &Repository, branch: &str) -> Option<git2::Oid> {
    if let Ok(local) = repo.find_branch(branch, BranchType::Local) {
        if let Ok(upstream) = local.upstream() {
            return upstream.get().target();
        }
    }
    repo.find_branch(&format!("origin/{branch}"), BranchType::Remote)
        .ok()
        .and_then(|b| b.get().target())
}

fn dir_size(path: &Path) -> Result<u64> {
    let mut total = 0;
    if path.is_file() {
        return Ok(path.metadata()?.len());
    }
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }
    Ok(total)
}
