//! End-to-end tests of the `rtbuild` binary.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}

/// A source tree with two tests, shared default scripts, a known failure
/// and a config using the built-in tar archiver.
fn tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    fs::create_dir_all(root.join("etc")).unwrap();
    write_script(&root.join("etc/default-build"), r#"echo "building $TEST_NAME $1""#);
    write_script(&root.join("etc/default-run"), "exit 0");
    write_script(&root.join("etc/default-check"), "exit 0");

    for test in ["001-alpha", "002-beta"] {
        fs::create_dir_all(root.join("tests").join(test).join("src")).unwrap();
        fs::write(
            root.join("tests").join(test).join("src/Main.java"),
            "class Main {}\n",
        )
        .unwrap();
    }
    fs::create_dir_all(root.join("tests/not-a-test")).unwrap();

    fs::write(
        root.join("known.json"),
        r#"[{"tests": ["002-beta"], "variant": "jvm"}]"#,
    )
    .unwrap();

    fs::write(
        root.join("rtbuild.toml"),
        format!(
            r#"
[build]
build_top = "{}"
tests_dir = "tests"
default_scripts_dir = "etc"
known_failures = "known.json"
sandbox_dir = "sbox"
max_parallel = 2

[package.archiver]
type = "tar"
"#,
            root.display()
        ),
    )
    .unwrap();

    dir
}

fn rtbuild(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("rtbuild").unwrap();
    cmd.current_dir(dir.path()).env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_init_creates_config_once() {
    let dir = TempDir::new().unwrap();

    rtbuild(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created rtbuild.toml"));
    let content = fs::read_to_string(dir.path().join("rtbuild.toml")).unwrap();
    assert!(content.contains("[package.archiver]"));

    rtbuild(&dir)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_validate_reports_settings() {
    let dir = tree();

    rtbuild(&dir)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid!"))
        .stdout(predicate::str::contains("Known failures: 1 rules"))
        .stdout(predicate::str::contains("Tests:          2"));
}

#[test]
fn test_validate_rejects_bad_known_failures() {
    let dir = tree();
    fs::write(dir.path().join("known.json"), r#"[{"variant": "host"}]"#).unwrap();

    rtbuild(&dir)
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Known failures error"));
}

#[test]
fn test_list_text_shows_plan_and_skips() {
    let dir = tree();

    rtbuild(&dir)
        .args(["list", "--mode", "host", "--mode", "jvm"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Planned 3 builds:"))
        .stdout(predicate::str::contains("host/001-alpha"))
        .stdout(predicate::str::contains("jvm/001-alpha"))
        .stdout(predicate::str::contains("jvm/002-beta").count(1))
        .stdout(predicate::str::contains("not-a-test").not());
}

#[test]
fn test_list_json() {
    let dir = tree();

    let output = rtbuild(&dir)
        .args(["list", "--format", "json", "--test", "001-alpha"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let jobs = plan["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 3);
    assert!(jobs.iter().all(|j| j["test"]["id"] == "001-alpha"));
}

#[test]
fn test_build_packages_sandbox() {
    let dir = tree();
    let out = dir.path().join("out/run-tests.tar");

    rtbuild(&dir)
        .args(["build", "--mode", "host", "--out"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("sha256"));

    let file = fs::File::open(&out).unwrap();
    let mut archive = tar::Archive::new(file);
    let names: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect();
    assert!(names.contains(&"host/001-alpha/build".to_string()));
    assert!(names.contains(&"host/002-beta/src/Main.java".to_string()));
}

#[test]
fn test_failed_build_exits_with_its_code() {
    let dir = tree();
    write_script(
        &dir.path().join("tests/002-beta/build"),
        "echo 'Main.java:1: error' >&2\nexit 3",
    );
    let out = dir.path().join("out/run-tests.tar");

    rtbuild(&dir)
        .args(["build", "--mode", "host", "--jobs", "1", "--out"])
        .arg(&out)
        .assert()
        .code(3)
        .stdout(predicate::str::contains("Main.java:1: error"));

    assert!(!out.exists());
}

#[test]
fn test_reused_sandbox_fails() {
    let dir = tree();
    fs::create_dir_all(dir.path().join("sbox/zip/host")).unwrap();

    rtbuild(&dir)
        .args(["build", "--out", "a.tar"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("sbox"));
}

#[test]
fn test_build_rejects_zero_jobs() {
    let dir = tree();

    rtbuild(&dir)
        .args(["build", "--jobs", "0", "--out", "a.tar"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_parallel"));
}

#[test]
fn test_empty_known_failures_builds_every_pair() {
    let dir = tree();
    fs::remove_file(dir.path().join("known.json")).unwrap();
    let config = fs::read_to_string(dir.path().join("rtbuild.toml")).unwrap();
    fs::write(
        dir.path().join("rtbuild.toml"),
        config.replace(r#"known_failures = "known.json""#, r#"known_failures = """#),
    )
    .unwrap();

    rtbuild(&dir)
        .args(["list", "--mode", "jvm"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Planned 2 builds:"))
        .stdout(predicate::str::contains("Skipped").not());
}

#[test]
fn test_no_known_failures_flag_ignores_table() {
    let dir = tree();
    fs::remove_file(dir.path().join("known.json")).unwrap();
    let out = dir.path().join("out/run-tests.tar");

    rtbuild(&dir)
        .args(["build", "--mode", "jvm", "--no-known-failures", "--out"])
        .arg(&out)
        .assert()
        .success();

    let file = fs::File::open(&out).unwrap();
    let mut archive = tar::Archive::new(file);
    let names: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect();
    assert!(names.contains(&"jvm/002-beta/build".to_string()));
}

#[test]
fn test_stream_logs_build_output() {
    let dir = tree();
    let out = dir.path().join("out/run-tests.tar");

    rtbuild(&dir)
        .args(["build", "--mode", "host", "--test", "001-alpha", "--stream", "--out"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("building 001-alpha").not())
        .stderr(predicate::str::contains("[host/001-alpha] building 001-alpha --host"));
}
