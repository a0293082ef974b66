//! Command-line surface tests that never reach a child process.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn loam() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("loam").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_commands() {
    loam()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("configure"))
        .stdout(predicate::str::contains("illustrate"))
        .stdout(predicate::str::contains("workflow"));
}

#[test]
fn test_version() {
    loam()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("loam "));
}

#[test]
fn test_missing_project_root_is_usage_error() {
    loam()
        .args(["--project-root", "/foo/baz", "run", "wordcount"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No such directory /foo/baz"));
}

#[test]
fn test_unknown_script_lists_available() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("pigscripts")).unwrap();
    fs::write(temp.path().join("pigscripts/alpha.pig"), "").unwrap();

    loam()
        .current_dir(temp.path())
        .args(["run", "nope"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains(
            "Unable to find a pigscript or controlscript for nope",
        ))
        .stderr(predicate::str::contains("pigscripts/alpha.pig"))
        .stderr(predicate::str::contains("No controlscripts found"));
}

#[test]
fn test_json_errors_go_to_stdout() {
    let temp = TempDir::new().unwrap();

    let output = loam()
        .current_dir(temp.path())
        .args(["--json", "validate", "missing"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout
        .lines()
        .find(|l| l.contains("\"status\":\"error\""))
        .unwrap_or_else(|| panic!("no error envelope in {stdout}"));
    let envelope: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(envelope["error"]["code"], "config");
    assert_eq!(envelope["error"]["exit_code"], 2);
}

#[test]
fn test_unsupported_pig_version_is_rejected() {
    loam()
        .args(["run", "wordcount", "-g", "0.11"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("0.9 (default), 0.12"));
}

#[test]
fn test_malformed_parameter_is_usage_error() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("pigscripts")).unwrap();
    fs::write(temp.path().join("pigscripts/alpha.pig"), "").unwrap();

    loam()
        .current_dir(temp.path())
        .args(["run", "alpha", "-p", "novalue"])
        .assert()
        .code(2);
}

#[test]
fn test_parameter_with_line_break_is_usage_error() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("pigscripts")).unwrap();
    fs::write(temp.path().join("pigscripts/alpha.pig"), "").unwrap();

    loam()
        .current_dir(temp.path())
        .args(["run", "alpha", "-p", "A=x\nB=y"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("line break"));
}
