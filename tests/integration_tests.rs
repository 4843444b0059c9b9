//! CLI integration tests for Foreman.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Helper to create a foreman Command
fn foreman() -> Command {
    cargo_bin_cmd!("foreman")
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_foreman_help() {
        foreman().arg("--help").assert().success();
    }

    #[test]
    fn test_foreman_version() {
        foreman().arg("--version").assert().success();
    }

    #[test]
    fn test_status_without_daemon() {
        let dir = create_temp_project();
        foreman()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("not running"));
    }

    #[test]
    fn test_stop_without_daemon_fails() {
        let dir = create_temp_project();
        foreman()
            .current_dir(dir.path())
            .arg("stop")
            .assert()
            .failure()
            .stderr(predicate::str::contains("PID file"));
    }
}

// =============================================================================
// Task Store Tests
// =============================================================================

mod tasks {
    use super::*;

    #[test]
    fn test_tasks_list_empty() {
        let dir = create_temp_project();
        foreman()
            .current_dir(dir.path())
            .args(["tasks", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No tasks"));
    }

    #[test]
    fn test_tasks_add_and_list() {
        let dir = create_temp_project();
        foreman()
            .current_dir(dir.path())
            .args(["tasks", "add", "Fix login bug", "-d", "Session cookie expires early"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Added task"));

        foreman()
            .current_dir(dir.path())
            .args(["tasks", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Fix login bug"))
            .stdout(predicate::str::contains("open"));

        // The store file lives under .foreman/
        assert!(dir.path().join(".foreman/tasks.json").exists());
    }

    #[test]
    fn test_tasks_close() {
        let dir = create_temp_project();
        foreman()
            .current_dir(dir.path())
            .args(["tasks", "add", "Short-lived"])
            .assert()
            .success();

        let tasks = std::fs::read_to_string(dir.path().join(".foreman/tasks.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&tasks).unwrap();
        let id = parsed[0]["id"].as_str().unwrap().to_string();

        foreman()
            .current_dir(dir.path())
            .args(["tasks", "close", &id])
            .assert()
            .success()
            .stdout(predicate::str::contains("Closed task"));

        foreman()
            .current_dir(dir.path())
            .args(["tasks", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("closed"));
    }

    #[test]
    fn test_tasks_close_unknown_id_fails() {
        let dir = create_temp_project();
        foreman()
            .current_dir(dir.path())
            .args(["tasks", "close", "t-nope"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Global Flags
// =============================================================================

mod global_flags {
    use super::*;

    #[test]
    fn test_project_dir_flag() {
        let dir = create_temp_project();
        foreman()
            .args(["--project-dir", dir.path().to_str().unwrap(), "tasks", "add", "Remote add"])
            .assert()
            .success();
        assert!(dir.path().join(".foreman/tasks.json").exists());
    }

    #[test]
    fn test_missing_project_dir_fails() {
        foreman()
            .args(["--project-dir", "/definitely/not/a/dir", "tasks", "list"])
            .assert()
            .failure();
    }
}
