//! End-to-end lifecycle tests over real git repositories.

mod support;

use canopy::context::Context;
use canopy::service::{CloseOptions, CreateOptions, RenameOptions};
use canopy::store::METADATA_FILE;

use support::TestEnv;

fn ctx() -> Context {
    Context::background()
}

#[test]
fn create_materializes_worktrees_on_the_branch() {
    let env = TestEnv::with_origins(&["api"]);
    let outcome = env
        .service
        .create_workspace(
            &ctx(),
            "TEST-1",
            "",
            &["api".to_string()],
            &CreateOptions::default(),
        )
        .unwrap();

    assert_eq!(outcome.workspace.branch_name, "TEST-1");

    let ws_dir = env.workspace_dir("TEST-1");
    assert!(ws_dir.join(METADATA_FILE).exists());
    let worktree = ws_dir.join("api");
    assert!(worktree.join(".git").exists());
    assert_eq!(support::worktree_branch(&worktree), "TEST-1");

    // The canonical bare clone exists exactly once.
    assert!(env.temp.path().join("projects/api/HEAD").exists());
    // No lock file remains after the call.
    assert!(!ws_dir.join(".canopy.lock").exists());
}

#[test]
fn failed_create_leaves_no_trace() {
    let env = TestEnv::with_origins(&[]);
    let missing = support::file_url(&env.temp.path().join("origins/nonexistent"));

    let err = env
        .service
        .create_workspace(
            &ctx(),
            "TEST-GONE",
            "",
            &[missing],
            &CreateOptions::default(),
        )
        .unwrap_err();
    assert_ne!(err.code(), "workspace-exists");

    assert!(!env.workspace_dir("TEST-GONE").exists());
    assert!(env.service.list_active().unwrap().is_empty());
}

#[test]
fn close_keep_then_restore_preserves_the_record() {
    let env = TestEnv::with_origins(&["api"]);
    let created = env
        .service
        .create_workspace(
            &ctx(),
            "TEST-RT",
            "",
            &["api".to_string()],
            &CreateOptions::default(),
        )
        .unwrap()
        .workspace;

    env.service
        .close_workspace(
            &ctx(),
            "TEST-RT",
            CloseOptions {
                keep_metadata: true,
                ..CloseOptions::default()
            },
        )
        .unwrap();

    assert!(!env.workspace_dir("TEST-RT").exists());
    assert_eq!(env.service.list_closed().unwrap().len(), 1);

    let restored = env
        .service
        .restore_workspace(&ctx(), "TEST-RT", false)
        .unwrap();
    assert_eq!(restored, created);
    assert!(env.workspace_dir("TEST-RT").join("api/.git").exists());
    assert!(env.service.list_closed().unwrap().is_empty());
    assert_eq!(
        support::worktree_branch(&env.workspace_dir("TEST-RT").join("api")),
        "TEST-RT"
    );
}

#[test]
fn close_delete_removes_everything() {
    let env = TestEnv::with_origins(&["api"]);
    env.service
        .create_workspace(
            &ctx(),
            "TEST-DEL",
            "",
            &["api".to_string()],
            &CreateOptions::default(),
        )
        .unwrap();

    env.service
        .close_workspace(&ctx(), "TEST-DEL", CloseOptions::default())
        .unwrap();

    assert!(!env.workspace_dir("TEST-DEL").exists());
    assert!(env.service.list_active().unwrap().is_empty());
    // The canonical clone is shared infrastructure and survives.
    assert!(env.temp.path().join("projects/api/HEAD").exists());
}

#[test]
fn dirty_worktree_blocks_close() {
    let env = TestEnv::with_origins(&["api"]);
    env.service
        .create_workspace(
            &ctx(),
            "PROJ-1",
            "",
            &["api".to_string()],
            &CreateOptions::default(),
        )
        .unwrap();

    std::fs::write(
        env.workspace_dir("PROJ-1").join("api/scratch.txt"),
        "uncommitted",
    )
    .unwrap();

    let err = env
        .service
        .close_workspace(&ctx(), "PROJ-1", CloseOptions::default())
        .unwrap_err();
    assert_eq!(err.code(), "repo-not-clean");
    assert!(env.workspace_dir("PROJ-1").join(METADATA_FILE).exists());

    env.service
        .close_workspace(
            &ctx(),
            "PROJ-1",
            CloseOptions {
                force: true,
                ..CloseOptions::default()
            },
        )
        .unwrap();
    assert!(!env.workspace_dir("PROJ-1").exists());
}

#[test]
fn rename_moves_directory_and_branch() {
    let env = TestEnv::with_origins(&["api"]);
    env.service
        .create_workspace(
            &ctx(),
            "TEST-OLD",
            "",
            &["api".to_string()],
            &CreateOptions::default(),
        )
        .unwrap();

    env.service
        .rename_workspace(
            &ctx(),
            "TEST-OLD",
            "TEST-NEW",
            RenameOptions {
                rename_branch: true,
                force: false,
            },
        )
        .unwrap();

    assert!(!env.workspace_dir("TEST-OLD").exists());
    assert!(env.workspace_dir("TEST-NEW").join(METADATA_FILE).exists());

    let (ws, _) = env.service.find_workspace("TEST-NEW").unwrap();
    assert_eq!(ws.branch_name, "TEST-NEW");
    assert_eq!(
        support::worktree_branch(&env.workspace_dir("TEST-NEW").join("api")),
        "TEST-NEW"
    );
    assert!(env.service.find_workspace("TEST-OLD").is_err());
    // No lock file left behind at either location.
    assert!(!env.workspace_dir("TEST-NEW").join(".canopy.lock").exists());
}

#[test]
fn add_and_remove_repo_on_disk() {
    let env = TestEnv::with_origins(&["api", "web"]);
    env.service
        .create_workspace(
            &ctx(),
            "TEST-AR",
            "",
            &["api".to_string()],
            &CreateOptions::default(),
        )
        .unwrap();

    env.service.add_repo(&ctx(), "TEST-AR", "web").unwrap();
    assert!(env.workspace_dir("TEST-AR").join("web/.git").exists());
    assert_eq!(
        support::worktree_branch(&env.workspace_dir("TEST-AR").join("web")),
        "TEST-AR"
    );

    env.service.remove_repo(&ctx(), "TEST-AR", "web").unwrap();
    assert!(!env.workspace_dir("TEST-AR").join("web").exists());
    let (ws, _) = env.service.find_workspace("TEST-AR").unwrap();
    assert_eq!(ws.repos.len(), 1);
}

#[test]
fn status_reports_clean_worktrees() {
    let env = TestEnv::with_origins(&["api"]);
    env.service
        .create_workspace(
            &ctx(),
            "TEST-ST",
            "",
            &["api".to_string()],
            &CreateOptions::default(),
        )
        .unwrap();

    let status = env.service.get_status(&ctx(), "TEST-ST").unwrap();
    assert_eq!(status.workspace_id, "TEST-ST");
    assert_eq!(status.repos.len(), 1);
    let repo = &status.repos[0];
    assert!(repo.error.is_none(), "status error: {:?}", repo.error);
    let repo_status = repo.status.as_ref().unwrap();
    assert_eq!(repo_status.branch, "TEST-ST");
    assert!(!repo_status.is_dirty);
}

#[test]
fn orphan_detection_spots_missing_canonicals() {
    let env = TestEnv::with_origins(&["api"]);
    env.service
        .create_workspace(
            &ctx(),
            "TEST-OR",
            "",
            &["api".to_string()],
            &CreateOptions::default(),
        )
        .unwrap();
    assert!(env.service.detect_orphans(&ctx(), None).unwrap().is_empty());

    std::fs::remove_dir_all(env.temp.path().join("projects/api")).unwrap();
    let orphans = env.service.detect_orphans(&ctx(), None).unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].repo_name, "api");
}

#[test]
fn export_then_import_round_trips() {
    let env = TestEnv::with_origins(&["api"]);
    env.service
        .create_workspace(
            &ctx(),
            "TEST-EX",
            "",
            &["api".to_string()],
            &CreateOptions::default(),
        )
        .unwrap();

    let export = env.service.export_workspace("TEST-EX").unwrap();
    env.service
        .close_workspace(
            &ctx(),
            "TEST-EX",
            CloseOptions {
                force: true,
                ..CloseOptions::default()
            },
        )
        .unwrap();

    let imported = env
        .service
        .import_workspace(&ctx(), &export, &CreateOptions::default())
        .unwrap()
        .workspace;
    assert_eq!(imported.id, export.id);
    assert_eq!(imported.branch_name, export.branch_name);
    assert_eq!(imported.repos, export.repos);
    assert!(env.workspace_dir("TEST-EX").join("api/.git").exists());
}

#[test]
fn run_git_across_worktrees() {
    let env = TestEnv::with_origins(&["api", "web"]);
    env.service
        .create_workspace(
            &ctx(),
            "TEST-RUN",
            "",
            &["api".to_string(), "web".to_string()],
            &CreateOptions::default(),
        )
        .unwrap();

    let results = env
        .service
        .run_git_in_workspace(
            &ctx(),
            "TEST-RUN",
            &["rev-parse".to_string(), "--abbrev-ref".to_string(), "HEAD".to_string()],
            canopy::service::GitRunOptions::default(),
        )
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].repo, "api");
    assert_eq!(results[1].repo, "web");
    for result in &results {
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "TEST-RUN");
    }
}
