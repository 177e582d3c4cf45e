// End-to-end tests for the leasehold binary
//
// Every test gets its own database and config file in a temp dir, so the
// user's global and project configuration never leak in.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const QUICK_CONFIG: &str = r"
default_ttl_secs = 60
default_limit = 2

[shared_retry]
interval_ms = 20
max_attempts = 3

[exclusive_retry]
interval_ms = 20
max_attempts = 3

[wait]
poll_interval_ms = 20
";

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("config.toml"), QUICK_CONFIG).expect("write config");
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn cmd(&self, context: &str) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_leasehold"));
        cmd.current_dir(self.path())
            .env_remove("LEASEHOLD_CONTEXT")
            .env("RUST_LOG", "warn")
            .arg("--db")
            .arg(self.path().join("leases.db"))
            .arg("--config")
            .arg(self.path().join("config.toml"))
            .arg("--context")
            .arg(context);
        cmd
    }
}

#[test]
fn test_acquire_count_release_round_trip() {
    let ws = Workspace::new();

    ws.cmd("worker-1")
        .args(["acquire", "reports"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Acquired exclusive lock on 'reports'"));

    ws.cmd("worker-1")
        .args(["count", "reports"])
        .assert()
        .success()
        .stdout("1\n");

    ws.cmd("worker-1")
        .args(["status", "reports"])
        .assert()
        .success()
        .stdout(predicate::str::contains("SINGLE_LOCK"))
        .stdout(predicate::str::contains("worker-1"));

    ws.cmd("worker-1")
        .args(["release", "reports"])
        .assert()
        .success();

    ws.cmd("worker-1")
        .args(["count", "reports"])
        .assert()
        .success()
        .stdout("0\n");
}

#[test]
fn test_second_exclusive_is_not_admitted() {
    let ws = Workspace::new();

    ws.cmd("worker-1")
        .args(["acquire", "reports"])
        .assert()
        .success();

    ws.cmd("worker-2")
        .args(["acquire", "reports", "--no-wait"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("not admitted"));

    // Blocking acquire gives up after the configured attempts.
    ws.cmd("worker-2")
        .args(["acquire", "reports"])
        .assert()
        .code(4);
}

#[test]
fn test_release_without_lease_is_not_found() {
    let ws = Workspace::new();

    ws.cmd("worker-1")
        .args(["release", "reports"])
        .assert()
        .code(3);

    ws.cmd("worker-1")
        .args(["extend", "reports", "--ttl", "30"])
        .assert()
        .code(3);
}

#[test]
fn test_invalid_resource_name_is_caller_error() {
    let ws = Workspace::new();

    ws.cmd("worker-1")
        .args(["acquire", "   "])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid resource name"));
}

#[test]
fn test_shared_leases_respect_limit_and_release_by_token() {
    let ws = Workspace::new();

    let first = ws
        .cmd("worker-1")
        .args(["--json", "acquire", "pool", "--shared"])
        .output()
        .expect("run acquire");
    assert!(first.status.success());
    let lease: serde_json::Value = serde_json::from_slice(&first.stdout).expect("lease json");
    let token = lease["token"].as_str().expect("token").to_string();
    assert_eq!(lease["ttl_secs"], 60.0);
    assert_eq!(lease["kind"], "shared");
    assert_eq!(lease["limit"], 2);
    assert_eq!(lease["owner"], "worker-1");

    ws.cmd("worker-2")
        .args(["acquire", "pool", "--shared"])
        .assert()
        .success();

    // default_limit = 2
    ws.cmd("worker-3")
        .args(["acquire", "pool", "--shared", "--no-wait"])
        .assert()
        .code(4);

    ws.cmd("worker-1")
        .args(["release", "pool", "--token", &token])
        .assert()
        .success();

    ws.cmd("worker-3")
        .args(["acquire", "pool", "--shared", "--limit", "2", "--no-wait"])
        .assert()
        .success();
}

#[test]
fn test_json_error_output() {
    let ws = Workspace::new();

    let output = ws
        .cmd("worker-1")
        .args(["release", "reports", "--json"])
        .output()
        .expect("run release");
    assert_eq!(output.status.code(), Some(3));

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("error json");
    assert_eq!(value["success"], false);
    assert_eq!(value["error"]["code"], "LEASE_NOT_FOUND");
}

#[test]
fn test_wait_returns_once_free() {
    let ws = Workspace::new();

    ws.cmd("worker-1")
        .args(["wait", "reports"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is free"));

    ws.cmd("worker-1")
        .args(["acquire", "reports", "--ttl", "1"])
        .assert()
        .success();

    // The lease lapses after a second; wait notices on a later poll.
    ws.cmd("worker-2")
        .args(["wait", "reports"])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .success();
}

#[cfg(unix)]
#[test]
fn test_run_releases_and_passes_exit_code() {
    let ws = Workspace::new();

    ws.cmd("worker-1")
        .args(["run", "reports", "--", "true"])
        .assert()
        .success();

    ws.cmd("worker-1")
        .args(["run", "reports", "--", "sh", "-c", "exit 3"])
        .assert()
        .code(3);

    ws.cmd("worker-1")
        .args(["count", "reports"])
        .assert()
        .success()
        .stdout("0\n");
}

#[cfg(unix)]
#[test]
fn test_run_holds_lease_while_child_runs() {
    let ws = Workspace::new();
    let db = ws.path().join("leases.db");
    let config = ws.path().join("config.toml");

    let count_cmd = format!(
        "{} --db {} --config {} count reports",
        env!("CARGO_BIN_EXE_leasehold"),
        db.display(),
        config.display()
    );

    ws.cmd("worker-1")
        .args(["run", "reports", "--renew", "--", "sh", "-c", &count_cmd])
        .assert()
        .success()
        .stdout("1\n");
}

#[cfg(unix)]
#[test]
fn test_run_reports_lease_lapsed_while_child_ran() {
    let ws = Workspace::new();

    ws.cmd("worker-1")
        .args(["run", "reports", "--ttl", "1", "--", "sleep", "2"])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .code(3);

    ws.cmd("worker-1")
        .args(["count", "reports"])
        .assert()
        .success()
        .stdout("0\n");
}

#[test]
fn test_run_with_missing_program_releases_lease() {
    let ws = Workspace::new();

    ws.cmd("worker-1")
        .args(["run", "reports", "--", "definitely-not-a-real-program-4821"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to start"));

    ws.cmd("worker-1")
        .args(["count", "reports"])
        .assert()
        .success()
        .stdout("0\n");
}

#[test]
fn test_missing_subcommand_shows_help() {
    Command::new(env!("CARGO_BIN_EXE_leasehold"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}
