//! Integration tests for mprobe CLI functionality

#![allow(clippy::unwrap_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;

fn task_file(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("mprobe-{}-{}.json", name, std::process::id()));
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_help_output() {
    let mut cmd = Command::cargo_bin("mprobe").expect("Failed to find mprobe binary");
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Scheduled UDP ping"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("trace"))
        .stdout(predicate::str::contains("next-run"))
        .stdout(predicate::str::contains("--verbose"));
}

#[test]
fn test_version_output() {
    let mut cmd = Command::cargo_bin("mprobe").expect("Failed to find mprobe binary");
    cmd.arg("--version");

    let output = cmd.output().expect("Failed to execute command");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("mprobe "));
    if cfg!(debug_assertions) {
        assert!(stdout.contains("-UNRELEASED"));
    }
}

#[test]
fn test_next_run_preview() {
    let path = task_file(
        "next-run",
        r#"[
            {
                "task_id": 1,
                "method": "traceroute",
                "options": {"host": "example.com"},
                "timing": {"calendar": {
                    "months": [1,2,3,4,5,6,7,8,9,10,11,12],
                    "days_of_week": [1,2,3,4,5,6,7],
                    "days_of_month": [15],
                    "hours": [9],
                    "minutes": [0],
                    "seconds": [0]
                }}
            },
            {
                "task_id": 2,
                "method": "udpping",
                "options": {"host": "192.0.2.1"},
                "timing": {"periodic": {"interval": 1800000, "start": "2024-01-15T08:00:00"}}
            }
        ]"#,
    );

    let mut cmd = Command::cargo_bin("mprobe").expect("Failed to find mprobe binary");
    cmd.args(["next-run", "--tasks"])
        .arg(&path)
        .args(["--from", "2024-01-15T08:30:00", "-n", "2"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("task 1 (traceroute, calendar):"))
        .stdout(predicate::str::contains("2024-01-15 09:00:00"))
        .stdout(predicate::str::contains("2024-02-15 09:00:00"))
        .stdout(predicate::str::contains("task 2 (udpping, periodic):"))
        .stdout(predicate::str::contains("2024-01-15 08:30:00"))
        .stdout(predicate::str::contains("2024-01-15 09:00:00"));

    let _ = std::fs::remove_file(path);
}

#[test]
fn test_next_run_rejects_malformed_task_file() {
    let path = task_file("malformed", r#"[{"task_id": 1}]"#);

    let mut cmd = Command::cargo_bin("mprobe").expect("Failed to find mprobe binary");
    cmd.args(["next-run", "--tasks"]).arg(&path);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse task file"));

    let _ = std::fs::remove_file(path);
}

#[test]
fn test_missing_task_file() {
    let mut cmd = Command::cargo_bin("mprobe").expect("Failed to find mprobe binary");
    cmd.args(["next-run", "--tasks", "/nonexistent/mprobe-tasks.json"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read task file"));
}

#[test]
fn test_invalid_config_file() {
    let path = std::env::temp_dir().join(format!("mprobe-config-{}.toml", std::process::id()));
    std::fs::write(&path, "[scheduler]\nmax_concurrent_tasks = 0\n").unwrap();

    let mut cmd = Command::cargo_bin("mprobe").expect("Failed to find mprobe binary");
    cmd.arg("--config")
        .arg(&path)
        .args(["next-run", "--tasks", "/nonexistent/mprobe-tasks.json"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("max_concurrent_tasks"));

    let _ = std::fs::remove_file(path);
}
