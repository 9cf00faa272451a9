//! Shared fixtures for integration tests: real git repos in tempdirs and a
//! fully wired service over the filesystem store and system git.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use canopy::config::Config;
use canopy::service::WorkspaceService;
use git2::{Repository, Signature};
use tempfile::TempDir;

pub struct TestEnv {
    pub temp: TempDir,
    pub config: Arc<Config>,
    pub service: WorkspaceService,
}

impl TestEnv {
    /// Build an environment with one origin repo (with an initial commit)
    /// per name, registered under its name in the config registry.
    pub fn with_origins(names: &[&str]) -> Self {
        Self::with_origins_and(names, |_| {})
    }

    pub fn with_origins_and(names: &[&str], tweak: impl FnOnce(&mut Config)) -> Self {
        let temp = TempDir::new().expect("tempdir");

        let mut config = Config::default();
        config.workspaces_root = temp.path().join("workspaces");
        config.projects_root = temp.path().join("projects");
        config.workers = 2;
        config.timeouts.lock_secs = 2;

        for name in names {
            let origin = init_origin(&temp.path().join("origins").join(name));
            config
                .registry
                .insert((*name).to_string(), file_url(&origin));
        }
        tweak(&mut config);

        let config = Arc::new(config);
        let service = WorkspaceService::open(Arc::clone(&config));
        Self {
            temp,
            config,
            service,
        }
    }

    pub fn workspaces_root(&self) -> PathBuf {
        self.temp.path().join("workspaces")
    }

    pub fn workspace_dir(&self, id: &str) -> PathBuf {
        self.workspaces_root().join(id)
    }

    pub fn origin_url(&self, name: &str) -> String {
        self.config
            .registry
            .get(name)
            .cloned()
            .expect("origin registered")
    }
}

pub fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// Create a non-bare repo with one commit so clones have a HEAD to work from.
pub fn init_origin(path: &Path) -> PathBuf {
    std::fs::create_dir_all(path).expect("create origin dir");
    let repo = Repository::init(path).expect("init origin");
    set_identity(&repo);
    commit_file(&repo, "README.md", "seed\n", "initial commit");
    path.to_path_buf()
}

pub fn set_identity(repo: &Repository) {
    let mut config = repo.config().expect("repo config");
    config.set_str("user.name", "canopy-test").unwrap();
    config
        .set_str("user.email", "canopy-test@example.com")
        .unwrap();
}

pub fn commit_file(repo: &Repository, name: &str, contents: &str, message: &str) {
    let workdir = repo.workdir().expect("workdir");
    std::fs::write(workdir.join(name), contents).expect("write file");

    let mut index = repo.index().expect("index");
    index.add_path(Path::new(name)).expect("add path");
    index.write().expect("index write");

    let tree_id = index.write_tree().expect("write tree");
    let tree = repo.find_tree(tree_id).expect("find tree");
    let sig = Signature::now("canopy-test", "canopy-test@example.com").expect("sig");

    let parent = repo
        .head()
        .ok()
        .and_then(|head| head.target())
        .and_then(|oid| repo.find_commit(oid).ok());

    match parent {
        Some(parent) => repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
            .expect("commit"),
        None => repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &[])
            .expect("commit"),
    };
}

/// Current branch of a worktree, read through the git CLI so moved
/// worktrees resolve the same way they would for a user.
pub fn worktree_branch(worktree: &Path) -> String {
    let output = std::process::Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(worktree)
        .output()
        .expect("git rev-parse");
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}
