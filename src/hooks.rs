//! Lifecycle hook execution.
//!
//! Hooks are user-configured shell commands run at defined phases
//! (post-create, pre-close, post-sync). Commands are minijinja templates
//! rendered with the workspace context; rendering is strict, so a missing
//! field fails the hook rather than expanding to nothing. Each hook runs
//! under its own timeout derived from the background context — a cancelled
//! caller stops the *next* hook from dispatching but never cuts a running
//! hook short of its deadline.
//!
//! The legacy dotted field spelling (`{{.WorkspaceID}}`) is normalized to
//! `{{ WorkspaceID }}` before rendering, so both forms resolve.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use minijinja::{Environment, UndefinedBehavior};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::redact::redact;
use crate::workspace::RepoRef;

/// Default per-hook timeout when the hook declares none.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Fallback shell when neither the hook nor `$SHELL` names one.
const FALLBACK_SHELL: &str = "/bin/sh";

/// Poll interval while waiting on a hook subprocess.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A user-configured lifecycle hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hook {
    /// Command template; a single line of shell.
    pub command: String,

    #[serde(default)]
    pub description: String,

    /// When non-empty, run once per listed repo (exact name match) instead
    /// of once in the workspace root.
    #[serde(default)]
    pub repos: Vec<String>,

    /// Shell override; empty means `$SHELL` then `/bin/sh`.
    #[serde(default)]
    pub shell: String,

    /// Per-hook timeout in seconds; 0 means the default.
    #[serde(default)]
    pub timeout_secs: u64,

    #[serde(default)]
    pub continue_on_error: bool,
}

impl Hook {
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(Error::InvalidConfig("hook command cannot be empty".into()));
        }
        if self.command.contains('\0') || self.command.contains('\n') {
            return Err(Error::InvalidConfig(
                "hook command must be a single line".into(),
            ));
        }
        Ok(())
    }

    fn timeout(&self, default: Duration) -> Duration {
        if self.timeout_secs == 0 {
            default
        } else {
            Duration::from_secs(self.timeout_secs)
        }
    }

    fn shell(&self) -> String {
        if !self.shell.trim().is_empty() {
            return self.shell.clone();
        }
        std::env::var("SHELL").unwrap_or_else(|_| FALLBACK_SHELL.to_string())
    }
}

/// Per-phase execution context handed to each hook.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub workspace_id: String,
    /// Absolute path to the workspace directory.
    pub workspace_path: PathBuf,
    pub branch_name: String,
    pub repos: Vec<RepoRef>,
    /// Set while running a per-repo hook target.
    pub current_repo: Option<RepoRef>,
}

impl HookContext {
    fn repo_path(&self, repo: &RepoRef) -> PathBuf {
        self.workspace_path.join(&repo.name)
    }

    fn template_vars(&self, current: Option<&RepoRef>) -> minijinja::Value {
        let repo_names: Vec<&str> = self.repos.iter().map(|r| r.name.as_str()).collect();
        match current {
            Some(repo) => minijinja::context! {
                WorkspaceID => self.workspace_id,
                WorkspacePath => self.workspace_path.display().to_string(),
                BranchName => self.branch_name,
                Repos => repo_names,
                Repo => repo.name,
                RepoName => repo.name,
                RepoPath => self.repo_path(repo).display().to_string(),
            },
            None => minijinja::context! {
                WorkspaceID => self.workspace_id,
                WorkspacePath => self.workspace_path.display().to_string(),
                BranchName => self.branch_name,
                Repos => repo_names,
            },
        }
    }

    fn env_vars(&self, current: Option<&RepoRef>) -> Vec<(String, String)> {
        let mut vars = vec![
            ("CANOPY_WORKSPACE_ID".to_string(), self.workspace_id.clone()),
            (
                "CANOPY_WORKSPACE_PATH".to_string(),
                self.workspace_path.display().to_string(),
            ),
            ("CANOPY_BRANCH".to_string(), self.branch_name.clone()),
        ];
        if let Some(repo) = current {
            vars.push(("CANOPY_REPO_NAME".to_string(), repo.name.clone()));
            vars.push((
                "CANOPY_REPO_PATH".to_string(),
                self.repo_path(repo).display().to_string(),
            ));
        }
        vars
    }
}

/// Preview entry produced by a dry run.
#[derive(Debug, Clone, Serialize)]
pub struct HookCommandPreview {
    pub index: usize,
    pub command: String,
    pub description: String,
    pub working_dir: PathBuf,
    /// "workspace" or the repo name the hook would run against.
    pub context: String,
}

/// Options for a hook list invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct HookOptions {
    pub dry_run: bool,
    pub continue_on_error: bool,
}

/// Runs hook lists sequentially with per-hook timeouts.
#[derive(Debug, Clone)]
pub struct HookExecutor {
    default_timeout: Duration,
}

impl HookExecutor {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    /// Execute a hook list. Returns dry-run previews (empty otherwise).
    ///
    /// `ctx` gates dispatch only: once a hook is running it completes or
    /// times out on its own derived context.
    pub fn execute_hooks(
        &self,
        ctx: &Context,
        hooks: &[Hook],
        hook_ctx: &HookContext,
        opts: HookOptions,
    ) -> Result<Vec<HookCommandPreview>> {
        let mut previews = Vec::new();

        for (index, hook) in hooks.iter().enumerate() {
            ctx.check()?;
            hook.validate()?;

            let targets = self.targets(hook, hook_ctx);
            let mut failed: Option<Error> = None;

            for (cwd, current) in targets {
                ctx.check()?;
                let vars = hook_ctx.template_vars(current.as_ref());
                let command = match render_template(&hook.command, &vars) {
                    Ok(command) => command,
                    Err(err) => {
                        failed = Some(err);
                        break;
                    }
                };

                if opts.dry_run {
                    previews.push(HookCommandPreview {
                        index,
                        command,
                        description: hook.description.clone(),
                        working_dir: cwd,
                        context: current
                            .as_ref()
                            .map(|r| r.name.clone())
                            .unwrap_or_else(|| "workspace".to_string()),
                    });
                    continue;
                }

                let env = hook_ctx.env_vars(current.as_ref());
                let repo_name = current.as_ref().map(|r| r.name.as_str()).unwrap_or("");
                if let Err(err) = self.run_one(index, hook, &command, &cwd, &env, repo_name) {
                    failed = Some(err);
                    break;
                }
            }

            if let Some(err) = failed {
                if hook.continue_on_error || opts.continue_on_error {
                    warn!(hook = index, error = %redact(&err.to_string()), "hook failed, continuing");
                    continue;
                }
                return Err(err);
            }
        }

        Ok(previews)
    }

    /// Run a raw shell command with hook semantics (shell, env, timeout).
    ///
    /// Template setup commands go through here so they share the same
    /// process handling as hooks.
    pub fn run_command(
        &self,
        command: &str,
        cwd: &Path,
        env: &[(String, String)],
        timeout: Duration,
    ) -> Result<()> {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| FALLBACK_SHELL.to_string());
        let (exit_code, _stdout, stderr) =
            self.spawn_and_wait(0, command, &shell, cwd, env, timeout, "")?;
        if exit_code != 0 {
            return Err(Error::CommandFailed {
                command: command.to_string(),
                exit_code,
                stderr: stderr.trim_end().to_string(),
            });
        }
        Ok(())
    }

    /// Resolve the run targets for a hook: per-repo or workspace root.
    fn targets(
        &self,
        hook: &Hook,
        hook_ctx: &HookContext,
    ) -> Vec<(PathBuf, Option<RepoRef>)> {
        if hook.repos.is_empty() {
            return vec![(hook_ctx.workspace_path.clone(), None)];
        }
        hook_ctx
            .repos
            .iter()
            .filter(|repo| hook.repos.iter().any(|name| name == &repo.name))
            .map(|repo| (hook_ctx.repo_path(repo), Some(repo.clone())))
            .collect()
    }

    fn run_one(
        &self,
        index: usize,
        hook: &Hook,
        command: &str,
        cwd: &Path,
        env: &[(String, String)],
        repo: &str,
    ) -> Result<()> {
        let shell = hook.shell();
        let timeout = hook.timeout(self.default_timeout);
        let started = Instant::now();

        let (exit_code, stdout, stderr) =
            self.spawn_and_wait(index, command, &shell, cwd, env, timeout, repo)?;

        if exit_code != 0 {
            return Err(Error::HookFailed {
                index,
                command: command.to_string(),
                exit_code,
                repo: repo.to_string(),
                stderr: stderr.trim_end().to_string(),
            });
        }

        info!(
            hook = index,
            duration_ms = started.elapsed().as_millis() as u64,
            "hook completed"
        );
        if !stdout.is_empty() {
            debug!(hook = index, output = %redact(&stdout), "hook stdout");
        }
        if !stderr.is_empty() {
            warn!(hook = index, output = %redact(&stderr), "hook stderr");
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_and_wait(
        &self,
        index: usize,
        command: &str,
        shell: &str,
        cwd: &Path,
        env: &[(String, String)],
        timeout: Duration,
        repo: &str,
    ) -> Result<(i32, String, String)> {
        debug!(hook = index, command = %redact(command), cwd = %cwd.display(), "running hook");

        let mut child = Command::new(shell)
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_reader = std::thread::spawn(move || drain(stdout_pipe));
        let stderr_reader = std::thread::spawn(move || drain(stderr_pipe));

        // Hooks run on their own clock, independent of the caller's context.
        let hook_ctx = Context::background().with_timeout(timeout);
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None => {
                    if hook_ctx.is_cancelled() {
                        kill_and_reap(&mut child);
                        // Drop the half-read buffers with the readers.
                        let _ = stdout_reader.join();
                        let _ = stderr_reader.join();
                        if !repo.is_empty() {
                            warn!(hook = index, repo, "hook timed out");
                        }
                        return Err(Error::HookTimeout {
                            index,
                            command: command.to_string(),
                            timeout_secs: timeout.as_secs(),
                        });
                    }
                    std::thread::sleep(WAIT_POLL_INTERVAL);
                }
            }
        };

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();
        let exit_code = status.code().unwrap_or(-1);
        Ok((exit_code, stdout, stderr))
    }
}

fn drain(pipe: Option<impl Read>) -> String {
    let mut buf = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut buf);
    }
    buf
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

// =============================================================================
// Template rendering
// =============================================================================

fn dotted_field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_]*)").expect("static regex"))
}

/// Render a command or naming template with strict undefined handling.
///
/// Unknown fields are an error, never an empty expansion.
pub fn render_template<S: Serialize>(template: &str, vars: &S) -> Result<String> {
    let normalized = dotted_field_re().replace_all(template, "{{ $1");

    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.render_str(&normalized, vars)
        .map_err(|err| Error::Template(format!("{template:?}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx_for(dir: &Path) -> HookContext {
        HookContext {
            workspace_id: "TEST-HOOK".into(),
            workspace_path: dir.to_path_buf(),
            branch_name: "feature/x".into(),
            repos: vec![
                RepoRef {
                    name: "api".into(),
                    url: "https://example.com/api.git".into(),
                },
                RepoRef {
                    name: "web".into(),
                    url: "https://example.com/web.git".into(),
                },
            ],
            current_repo: None,
        }
    }

    fn executor() -> HookExecutor {
        HookExecutor::new(DEFAULT_HOOK_TIMEOUT)
    }

    fn hook(command: &str) -> Hook {
        Hook {
            command: command.into(),
            description: String::new(),
            repos: Vec::new(),
            shell: String::new(),
            timeout_secs: 0,
            continue_on_error: false,
        }
    }

    #[test]
    fn validate_rejects_multiline_and_empty() {
        assert!(hook("").validate().is_err());
        assert!(hook("  ").validate().is_err());
        assert!(hook("echo a\necho b").validate().is_err());
        assert!(hook("echo ok").validate().is_ok());
    }

    #[test]
    fn render_supports_both_spellings() {
        let vars = minijinja::context! { WorkspaceID => "W-1", BranchName => "main" };
        assert_eq!(
            render_template("echo {{.WorkspaceID}} {{.BranchName}}", &vars).unwrap(),
            "echo W-1 main"
        );
        assert_eq!(
            render_template("echo {{ WorkspaceID }}", &vars).unwrap(),
            "echo W-1"
        );
    }

    #[test]
    fn render_fails_closed_on_missing_fields() {
        let vars = minijinja::context! { WorkspaceID => "W-1" };
        let err = render_template("echo {{.Missing}}", &vars).unwrap_err();
        assert_eq!(err.code(), "invalid-argument");
    }

    #[test]
    fn dry_run_previews_without_executing() {
        let temp = TempDir::new().unwrap();
        let hooks = vec![hook("echo {{.WorkspaceID}} {{.BranchName}} > out.txt")];
        let previews = executor()
            .execute_hooks(
                &Context::background(),
                &hooks,
                &ctx_for(temp.path()),
                HookOptions {
                    dry_run: true,
                    continue_on_error: false,
                },
            )
            .unwrap();

        assert_eq!(previews.len(), 1);
        assert_eq!(previews[0].command, "echo TEST-HOOK feature/x > out.txt");
        assert_eq!(previews[0].context, "workspace");
        assert!(!temp.path().join("out.txt").exists());
    }

    #[test]
    fn hook_runs_with_env_vars() {
        let temp = TempDir::new().unwrap();
        let hooks = vec![hook("echo \"$CANOPY_WORKSPACE_ID:$CANOPY_BRANCH\" > env.txt")];
        executor()
            .execute_hooks(
                &Context::background(),
                &hooks,
                &ctx_for(temp.path()),
                HookOptions::default(),
            )
            .unwrap();

        let written = std::fs::read_to_string(temp.path().join("env.txt")).unwrap();
        assert_eq!(written.trim(), "TEST-HOOK:feature/x");
    }

    #[test]
    fn repo_filter_runs_per_matching_repo() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("api")).unwrap();
        std::fs::create_dir_all(temp.path().join("web")).unwrap();

        let mut filtered = hook("echo $CANOPY_REPO_NAME >> \"$CANOPY_WORKSPACE_PATH/repos.txt\"");
        filtered.repos = vec!["api".into()];
        let previews = executor()
            .execute_hooks(
                &Context::background(),
                &[filtered],
                &ctx_for(temp.path()),
                HookOptions::default(),
            )
            .unwrap();
        assert!(previews.is_empty());

        let written = std::fs::read_to_string(temp.path().join("repos.txt")).unwrap();
        assert_eq!(written.trim(), "api");
    }

    #[test]
    fn nonzero_exit_is_hook_failed_with_stderr() {
        let temp = TempDir::new().unwrap();
        let hooks = vec![hook("echo broken >&2; exit 3")];
        let err = executor()
            .execute_hooks(
                &Context::background(),
                &hooks,
                &ctx_for(temp.path()),
                HookOptions::default(),
            )
            .unwrap_err();

        match err {
            Error::HookFailed {
                index,
                exit_code,
                stderr,
                ..
            } => {
                assert_eq!(index, 0);
                assert_eq!(exit_code, 3);
                assert!(stderr.contains("broken"));
            }
            other => panic!("expected hook-failed, got {other:?}"),
        }
    }

    #[test]
    fn timeout_kills_the_hook() {
        let temp = TempDir::new().unwrap();
        let mut slow = hook("sleep 10");
        slow.timeout_secs = 1;
        let started = Instant::now();
        let err = executor()
            .execute_hooks(
                &Context::background(),
                &[slow],
                &ctx_for(temp.path()),
                HookOptions::default(),
            )
            .unwrap_err();

        assert_eq!(err.code(), "hook-timeout");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn continue_on_error_runs_the_rest() {
        let temp = TempDir::new().unwrap();
        let hooks = vec![hook("exit 1"), hook("echo done > second.txt")];
        executor()
            .execute_hooks(
                &Context::background(),
                &hooks,
                &ctx_for(temp.path()),
                HookOptions {
                    dry_run: false,
                    continue_on_error: true,
                },
            )
            .unwrap();
        assert!(temp.path().join("second.txt").exists());
    }

    #[test]
    fn per_hook_continue_flag_wins() {
        let temp = TempDir::new().unwrap();
        let mut failing = hook("exit 1");
        failing.continue_on_error = true;
        let hooks = vec![failing, hook("echo done > second.txt")];
        executor()
            .execute_hooks(
                &Context::background(),
                &hooks,
                &ctx_for(temp.path()),
                HookOptions::default(),
            )
            .unwrap();
        assert!(temp.path().join("second.txt").exists());
    }

    #[test]
    fn cancelled_caller_stops_before_next_hook() {
        let temp = TempDir::new().unwrap();
        let ctx = Context::background();
        ctx.cancel();
        let err = executor()
            .execute_hooks(
                &ctx,
                &[hook("echo hi > never.txt")],
                &ctx_for(temp.path()),
                HookOptions::default(),
            )
            .unwrap_err();
        assert_eq!(err.code(), "cancelled");
        assert!(!temp.path().join("never.txt").exists());
    }
}
