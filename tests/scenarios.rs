#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::wildcard_imports,
    clippy::indexing_slicing
)]
//! End-to-end scenarios on real temporary directories.
//!
//! Each test drives the [`Client`](dot_cli::Client) against an isolated
//! package directory and home directory and checks what ends up on disk
//! and in the manifest.

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::TestEnv;
use dot_cli::DotError;
use dot_cli::config::ConflictPolicy;
use dot_cli::doctor::{IssueKind, Overall, ScanConfig, ScanMode};
use dot_cli::executor::{ExecOptions, Executor};
use dot_cli::fs::OsFs;
use dot_cli::logging::Logger;
use dot_cli::manifest::PackageSource;
use dot_cli::paths::FilePath;
use dot_cli::plan::{Operation, OperationKind, Plan, UnmanageOptions};

fn links(paths: &[&str]) -> std::collections::BTreeSet<PathBuf> {
    paths.iter().map(PathBuf::from).collect()
}

fn resolves_to(link: &Path, expected: &Path) -> bool {
    std::fs::symlink_metadata(link).is_ok_and(|m| m.file_type().is_symlink())
        && dunce::canonicalize(link).ok() == dunce::canonicalize(expected).ok()
}

// ---------------------------------------------------------------------------
// Basic manage
// ---------------------------------------------------------------------------

#[test]
fn manage_links_translated_file() {
    let env = TestEnv::new();
    let source = env.package_file("vim/dot-vimrc", "set nu");

    let report = env.client().manage(&env.ct, &["vim"]).unwrap();
    assert_eq!(report.summary.link_create, 1);

    assert!(resolves_to(&env.target(".vimrc"), &source));
    assert_eq!(std::fs::read_to_string(env.target(".vimrc")).unwrap(), "set nu");

    let manifest = env.manifest();
    assert_eq!(manifest.packages.len(), 1);
    let vim = &manifest.packages["vim"];
    assert_eq!(vim.links, links(&[".vimrc"]));
    assert_eq!(vim.link_count, 1);
    assert_eq!(vim.source, PackageSource::Managed);
}

#[test]
fn links_are_relative_by_default() {
    let env = TestEnv::new();
    env.package_file("vim/dot-vimrc", "set nu");
    env.client().manage(&env.ct, &["vim"]).unwrap();
    let contents = std::fs::read_link(env.target(".vimrc")).unwrap();
    assert!(contents.is_relative(), "{}", contents.display());
}

#[test]
fn dry_run_leaves_disk_untouched() {
    let env = TestEnv::new();
    env.package_file("vim/dot-vimrc", "set nu");
    let report = env
        .client_with(|c| c.dry_run = true)
        .manage(&env.ct, &["vim"])
        .unwrap();
    assert!(report.dry_run);
    assert_eq!(report.executed, 0);
    assert!(env.snapshot().is_empty());
    assert!(env.manifest().packages.is_empty());
}

// ---------------------------------------------------------------------------
// Folding
// ---------------------------------------------------------------------------

#[test]
fn folding_links_whole_directory() {
    let env = TestEnv::new();
    env.package_file("tools/bin/a", "a");
    env.package_file("tools/bin/b", "b");

    env.client().manage(&env.ct, &["tools"]).unwrap();

    assert!(resolves_to(&env.target("bin"), &env.package_dir.join("tools/bin")));
    assert_eq!(env.manifest().packages["tools"].links, links(&["bin"]));
}

#[test]
fn no_folding_links_each_file() {
    let env = TestEnv::new();
    env.package_file("tools/bin/a", "a");
    env.package_file("tools/bin/b", "b");

    env.client_with(|c| c.folding = false)
        .manage(&env.ct, &["tools"])
        .unwrap();

    let bin = env.target("bin");
    assert!(std::fs::symlink_metadata(&bin).unwrap().is_dir());
    assert!(resolves_to(&bin.join("a"), &env.package_dir.join("tools/bin/a")));
    assert!(resolves_to(&bin.join("b"), &env.package_dir.join("tools/bin/b")));
    assert_eq!(
        env.manifest().packages["tools"].links,
        links(&["bin/a", "bin/b"])
    );
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

#[test]
fn conflict_blocks_manage_by_default() {
    let env = TestEnv::new();
    env.target_file(".bashrc", "old");
    env.package_file("bash/dot-bashrc", "new");

    let err = env.client().manage(&env.ct, &["bash"]).unwrap_err();
    assert!(matches!(err, DotError::Conflict(_)), "{err}");
    assert_eq!(err.exit_code(), 3);
    assert_eq!(std::fs::read_to_string(env.target(".bashrc")).unwrap(), "old");
    assert!(env.manifest().packages.is_empty());
}

#[test]
fn conflict_with_backup_keeps_old_file() {
    let env = TestEnv::new();
    env.target_file(".bashrc", "old");
    let source = env.package_file("bash/dot-bashrc", "new");

    env.client_with(|c| {
        c.conflict_policy = ConflictPolicy::Backup;
        c.backup_suffix = ".bak".to_string();
    })
    .manage(&env.ct, &["bash"])
    .unwrap();

    assert!(resolves_to(&env.target(".bashrc"), &source));
    let backup = env.target(".bashrc.bak");
    assert!(std::fs::symlink_metadata(&backup).unwrap().is_file());
    assert_eq!(std::fs::read_to_string(&backup).unwrap(), "old");
    assert_eq!(
        env.manifest().packages["bash"].backups.get(Path::new(".bashrc")),
        Some(&PathBuf::from(".bashrc.bak"))
    );
}

// ---------------------------------------------------------------------------
// Round trips
// ---------------------------------------------------------------------------

#[test]
fn manage_then_unmanage_restores_target() {
    let env = TestEnv::new();
    env.target_file(".bashrc", "old");
    env.target_file("notes.txt", "keep");
    env.package_file("bash/dot-bashrc", "new");
    env.package_file("bash/dot-config/bash/aliases", "alias ll='ls -l'");
    let before = env.snapshot();

    let client = env.client_with(|c| c.conflict_policy = ConflictPolicy::Backup);
    client.manage(&env.ct, &["bash"]).unwrap();
    assert_ne!(env.snapshot(), before);

    client
        .unmanage(&env.ct, &["bash"], UnmanageOptions::default())
        .unwrap();
    assert_eq!(env.snapshot(), before);
    assert!(!env.manifest().packages.contains_key("bash"));
}

#[test]
fn adopt_then_restore() {
    let env = TestEnv::new();
    env.target_file(".config/nvim/init.vim", "C");
    let client = env.client();

    let report = client
        .adopt(&env.ct, "nvim", &[PathBuf::from(".config/nvim/init.vim")])
        .unwrap();
    assert!(report.executed > 0);

    let stored = env.package_dir.join("nvim/dot-config/nvim/init.vim");
    assert_eq!(std::fs::read_to_string(&stored).unwrap(), "C");
    assert!(resolves_to(&env.target(".config/nvim/init.vim"), &stored));
    assert_eq!(env.manifest().packages["nvim"].source, PackageSource::Adopted);

    client
        .unmanage(
            &env.ct,
            &["nvim"],
            UnmanageOptions {
                restore: true,
                cleanup: false,
            },
        )
        .unwrap();
    let restored = env.target(".config/nvim/init.vim");
    let meta = std::fs::symlink_metadata(&restored).unwrap();
    assert!(meta.is_file());
    assert_eq!(std::fs::read_to_string(&restored).unwrap(), "C");
    assert!(!env.manifest().packages.contains_key("nvim"));
}

#[test]
fn cleanup_removes_empty_manifest() {
    let env = TestEnv::new();
    env.package_file("vim/dot-vimrc", "set nu");
    let client = env.client();
    client.manage(&env.ct, &["vim"]).unwrap();
    assert!(client.manifest_path().exists());

    client
        .unmanage(
            &env.ct,
            &["vim"],
            UnmanageOptions {
                restore: false,
                cleanup: true,
            },
        )
        .unwrap();
    assert!(!client.manifest_path().exists());
}

// ---------------------------------------------------------------------------
// Boundaries
// ---------------------------------------------------------------------------

#[test]
fn fully_ignored_package_does_not_touch_manifest() {
    let env = TestEnv::new();
    env.package_file("junk/notes.swp", "x");
    let client = env.client_with(|c| c.ignore_patterns = vec!["*.swp".to_string()]);

    let report = client.manage(&env.ct, &["junk"]).unwrap();
    assert_eq!(report.executed, 0);
    assert!(!client.manifest_path().exists());
    assert!(env.snapshot().is_empty());
}

#[test]
fn unknown_package_is_not_found() {
    let env = TestEnv::new();
    let err = env.client().manage(&env.ct, &["ghost"]).unwrap_err();
    assert!(matches!(err, DotError::PackageNotFound(_)), "{err}");
    assert_eq!(err.exit_code(), 5);
}

#[test]
fn cancelled_token_stops_manage() {
    let env = TestEnv::new();
    env.package_file("vim/dot-vimrc", "set nu");
    env.ct.cancel();
    let err = env.client().manage(&env.ct, &["vim"]).unwrap_err();
    assert!(err.is_cancelled(), "{err}");
    assert!(env.snapshot().is_empty());
}

// ---------------------------------------------------------------------------
// Doctor
// ---------------------------------------------------------------------------

#[test]
fn doctor_is_clean_after_manage() {
    let env = TestEnv::new();
    env.package_file("vim/dot-vimrc", "set nu");
    let client = env.client();
    client.manage(&env.ct, &["vim"]).unwrap();

    let report = client.doctor(&env.ct, None).unwrap();
    assert_eq!(report.overall, Overall::Ok, "{:?}", report.issues);
    assert_eq!(report.stats.managed_links, 1);
    assert_eq!(report.stats.healthy, 1);
}

#[test]
fn doctor_detects_broken_link() {
    let env = TestEnv::new();
    let source = env.package_file("vim/dot-vimrc", "set nu");
    let client = env.client();
    client.manage(&env.ct, &["vim"]).unwrap();
    std::fs::remove_file(&source).unwrap();

    let report = client.doctor(&env.ct, None).unwrap();
    assert_eq!(report.overall, Overall::Errors);
    assert_eq!(report.overall.exit_code(), 2);
    let broken: Vec<_> = report
        .issues
        .iter()
        .filter(|i| i.kind == IssueKind::BrokenLink)
        .collect();
    assert_eq!(broken.len(), 1, "{:?}", report.issues);
    assert_eq!(broken[0].path, PathBuf::from(".vimrc"));
    assert!(
        broken[0]
            .suggestion
            .as_deref()
            .is_some_and(|s| s.contains("dot remanage vim")),
        "{:?}",
        broken[0].suggestion
    );
}

#[cfg(unix)]
#[test]
fn doctor_reports_and_ignores_orphans() {
    let env = TestEnv::new();
    env.package_file("vim/dot-vimrc", "set nu");
    let client = env.client();
    client.manage(&env.ct, &["vim"]).unwrap();
    std::os::unix::fs::symlink("/nonexistent/thing", env.target(".stray")).unwrap();

    let report = client.doctor(&env.ct, None).unwrap();
    assert_eq!(report.overall, Overall::Warnings);
    assert_eq!(report.stats.orphaned, 1);
    assert_eq!(report.orphans[0].path, PathBuf::from(".stray"));

    client
        .ignore_link(&env.ct, Path::new(".stray"), "known")
        .unwrap();
    let report = client.doctor(&env.ct, None).unwrap();
    assert_eq!(report.overall, Overall::Ok, "{:?}", report.issues);
    assert_eq!(report.stats.ignored, 1);
}

#[cfg(unix)]
#[test]
fn symlink_cycle_does_not_hang_orphan_scan() {
    let env = TestEnv::new();
    env.package_file("vim/dot-vimrc", "set nu");
    let client = env.client_with(|c| c.scan = ScanConfig::new(ScanMode::Deep));
    client.manage(&env.ct, &["vim"]).unwrap();
    std::fs::create_dir_all(env.target("loop")).unwrap();
    std::os::unix::fs::symlink(env.target("loop"), env.target("loop/self")).unwrap();

    let report = client.doctor(&env.ct, None).unwrap();
    assert!(report.stats.orphaned <= 1);
}

// ---------------------------------------------------------------------------
// Cyclic plans
// ---------------------------------------------------------------------------

#[test]
fn cyclic_plan_is_rejected_before_execution() {
    let env = TestEnv::new();
    let a = env.target("a");
    let b = env.target("b");
    let make = |path: &Path, dep: &Path| {
        let dep_id = OperationKind::DirCreate {
            path: FilePath::new(dep).unwrap(),
        }
        .id();
        Operation::new(
            OperationKind::DirCreate {
                path: FilePath::new(path).unwrap(),
            },
            vec![dep_id],
        )
    };
    let plan = Plan {
        operations: vec![make(&a, &b), make(&b, &a)],
        ..Plan::default()
    };

    assert!(matches!(plan.ordered(), Err(DotError::CyclicDependency(_))));

    let executor = Executor::new(
        Arc::new(OsFs::new()),
        ExecOptions::default(),
        Arc::new(Logger::new("test")),
    );
    let err = executor.execute(&env.ct, &plan).unwrap_err();
    assert!(matches!(err, DotError::CyclicDependency(_)), "{err}");
    assert!(!a.exists());
    assert!(!b.exists());
}
