#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::wildcard_imports,
    clippy::indexing_slicing
)]
//! Integration tests for the `dot` binary: argument handling, output formats
//! and exit codes.

mod common;

use std::process::{Command, Output};

use common::TestEnv;

fn dot(env: &TestEnv, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dot"))
        .arg("--dir")
        .arg(&env.package_dir)
        .arg("--target")
        .arg(&env.target_dir)
        .arg("--color")
        .arg("never")
        .args(args)
        .env("DOT_CONFIG", env.target_dir.join("no-such-config.toml"))
        .env("XDG_CACHE_HOME", env.target_dir.join(".cache-for-tests"))
        .env_remove("DOT_LOG")
        .output()
        .expect("run dot")
}

fn code(output: &Output) -> i32 {
    output.status.code().expect("exit code")
}

// ---------------------------------------------------------------------------
// Exit codes
// ---------------------------------------------------------------------------

#[test]
fn manage_then_list_as_json() {
    let env = TestEnv::new();
    env.package_file("vim/dot-vimrc", "set nu");

    let out = dot(&env, &["manage", "vim"]);
    assert_eq!(code(&out), 0, "{}", String::from_utf8_lossy(&out.stderr));

    let out = dot(&env, &["--format", "json", "list"]);
    assert_eq!(code(&out), 0);
    let list: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(list[0]["name"], "vim");
    assert_eq!(list[0]["link_count"], 1);
}

#[test]
fn missing_package_exits_with_not_found() {
    let env = TestEnv::new();
    let out = dot(&env, &["manage", "ghost"]);
    assert_eq!(code(&out), 5);
}

#[test]
fn conflict_exits_with_three() {
    let env = TestEnv::new();
    env.target_file(".bashrc", "old");
    env.package_file("bash/dot-bashrc", "new");
    let out = dot(&env, &["manage", "bash"]);
    assert_eq!(code(&out), 3);
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains(".bashrc"), "{stderr}");
}

#[test]
fn doctor_exit_code_follows_health() {
    let env = TestEnv::new();
    let source = env.package_file("vim/dot-vimrc", "set nu");
    assert_eq!(code(&dot(&env, &["manage", "vim"])), 0);
    assert_eq!(code(&dot(&env, &["doctor"])), 0);

    std::fs::remove_file(source).unwrap();
    let out = dot(&env, &["--format", "json", "doctor"]);
    assert_eq!(code(&out), 2);
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["overall"], "errors");
    assert_eq!(report["issues"][0]["kind"], "broken_link");
}

#[test]
fn unmanage_all_removes_every_package() {
    let env = TestEnv::new();
    env.package_file("vim/dot-vimrc", "set nu");
    env.package_file("git/dot-gitconfig", "[user]");
    assert_eq!(code(&dot(&env, &["manage", "vim", "git"])), 0);

    assert_eq!(code(&dot(&env, &["unmanage", "--all"])), 0);
    assert!(!env.target(".vimrc").exists());
    assert!(!env.target(".gitconfig").exists());
    assert!(env.manifest().packages.is_empty());
}

#[test]
fn version_prints_name() {
    let env = TestEnv::new();
    let out = dot(&env, &["version"]);
    assert_eq!(code(&out), 0);
    assert!(String::from_utf8_lossy(&out.stdout).starts_with("dot "));
}
