//! Integration tests for the pr-reviewer binary.
//!
//! These drive the CLI end to end; HTTP flows live in `api_flow.rs`.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a pr-reviewer Command isolated from the caller's env.
fn reviewer(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("pr-reviewer");
    cmd.current_dir(dir.path())
        .env_remove("HTTP_PORT")
        .env_remove("HTTP_HOST")
        .env_remove("DB_PATH")
        .env_remove("LOG_LEVEL")
        .env_remove("LOG_FORMAT")
        .env_remove("REQUEST_TIMEOUT_SECS");
    cmd
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        let dir = TempDir::new().unwrap();
        reviewer(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("init-db"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        reviewer(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_serve_rejects_db_path_with_in_memory() {
        let dir = TempDir::new().unwrap();
        reviewer(&dir)
            .args(["serve", "--in-memory", "--db-path", "x.db"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Database initialization
// =============================================================================

mod init_db {
    use super::*;

    #[test]
    fn test_init_db_creates_file() {
        let dir = TempDir::new().unwrap();
        reviewer(&dir)
            .args(["init-db", "--db-path", "nested/reviewer.db"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Reviewer database initialized"));
        assert!(dir.path().join("nested/reviewer.db").exists());
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let dir = TempDir::new().unwrap();
        for _ in 0..2 {
            reviewer(&dir)
                .args(["init-db", "--db-path", "reviewer.db"])
                .assert()
                .success();
        }
    }

    #[test]
    fn test_init_db_uses_config_file_path() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("reviewer.toml"),
            "[database]\npath = \"from-config.db\"\n",
        )
        .unwrap();
        reviewer(&dir).arg("init-db").assert().success();
        assert!(dir.path().join("from-config.db").exists());
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        reviewer(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 8080"));
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("reviewer.toml"), "[http]\nport = 9000\n").unwrap();
        reviewer(&dir)
            .env("HTTP_PORT", "7000")
            .arg("config")
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 7000"));
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = TempDir::new().unwrap();
        reviewer(&dir)
            .args(["--config", "missing.toml", "config"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to load configuration"));
    }

    #[test]
    fn test_malformed_dotenv_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env"), "HTTP_PORT='7000\n").unwrap();
        reviewer(&dir)
            .arg("config")
            .assert()
            .failure()
            .stderr(predicate::str::contains(".env"));
    }

    #[test]
    fn test_validate_reports_warnings() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("reviewer.toml"),
            "[http]\nrequest_timeout_secs = 0\n",
        )
        .unwrap();
        reviewer(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("request_timeout_secs"));
    }

    #[test]
    fn test_validate_clean_config() {
        let dir = TempDir::new().unwrap();
        reviewer(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }
}
