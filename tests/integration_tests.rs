//! Integration tests for the conductor CLI
//!
//! These tests drive the binary end to end in a temporary project directory.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a conductor Command with a clean environment
fn conductor() -> Command {
    let mut cmd = cargo_bin_cmd!("conductor");
    for var in [
        "CONDUCTOR_PROFILE",
        "CONDUCTOR_TOOL_CMD",
        "CONDUCTOR_TIMEOUT_SECS",
        "CONDUCTOR_MAX_ATTEMPTS",
        "CONDUCTOR_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

/// Helper to initialize a conductor project in a temp directory
fn init_project(dir: &TempDir) {
    conductor()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
}

/// Write `.conductor/conductor.toml` directly.
fn write_config(dir: &TempDir, content: &str) {
    let conductor_dir = dir.path().join(".conductor");
    fs::create_dir_all(&conductor_dir).unwrap();
    fs::write(conductor_dir.join("conductor.toml"), content).unwrap();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_conductor_help() {
        conductor().arg("--help").assert().success();
    }

    #[test]
    fn test_conductor_version() {
        conductor().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = create_temp_project();

        conductor()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized conductor project"));

        assert!(dir.path().join(".conductor/conductor.toml").exists());
        assert!(dir.path().join(".conductor/manifests").is_dir());
        assert!(dir.path().join(".conductor/logs").is_dir());
        assert!(dir.path().join("prompts/phase1.md").exists());
        assert!(dir.path().join("prompts/phase3.md").exists());
    }

    #[test]
    fn test_init_keeps_existing_config() {
        let dir = create_temp_project();
        init_project(&dir);
        let config = dir.path().join(".conductor/conductor.toml");
        fs::write(&config, "[tool]\nprofile = \"analyst\"\n").unwrap();

        conductor()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
        assert_eq!(
            fs::read_to_string(&config).unwrap(),
            "[tool]\nprofile = \"analyst\"\n"
        );
    }

    #[test]
    fn test_project_dir_flag() {
        let dir = create_temp_project();
        conductor()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("init")
            .assert()
            .success();
        assert!(dir.path().join(".conductor/conductor.toml").exists());
    }
}

// =============================================================================
// Feature Name Validation
// =============================================================================

mod validation {
    use super::*;

    #[test]
    fn test_valid_name_is_normalized() {
        let dir = create_temp_project();
        conductor()
            .current_dir(dir.path())
            .args(["validate", "INITIAL_user-auth"])
            .assert()
            .success()
            .stdout(predicate::str::contains("user-auth"));
    }

    #[test]
    fn test_path_traversal_exits_with_rejection_code() {
        let dir = create_temp_project();
        conductor()
            .current_dir(dir.path())
            .args(["validate", "../../etc/passwd"])
            .assert()
            .code(4)
            .stderr(predicate::str::contains("path traversal"));
    }

    #[test]
    fn test_shell_metacharacters_are_rejected() {
        let dir = create_temp_project();
        conductor()
            .current_dir(dir.path())
            .args(["validate", "auth;rm -rf"])
            .assert()
            .code(4);
    }

    #[test]
    fn test_redundant_prefix_suggests_name() {
        let dir = create_temp_project();
        conductor()
            .current_dir(dir.path())
            .args(["validate", "prp_auth"])
            .assert()
            .code(4)
            .stderr(predicate::str::contains("auth"));
    }

    #[test]
    fn test_redundant_prefix_check_can_be_disabled() {
        let dir = create_temp_project();
        write_config(&dir, "[security]\ncheck_redundant_prefix = false\n");
        conductor()
            .current_dir(dir.path())
            .args(["validate", "prp_auth"])
            .assert()
            .success()
            .stdout(predicate::str::contains("prp_auth"));
    }

    #[test]
    fn test_run_rejects_bad_name_before_touching_disk() {
        let dir = create_temp_project();
        conductor()
            .current_dir(dir.path())
            .args(["run", "..", "--ui", "minimal"])
            .assert()
            .code(4);
        assert!(!dir.path().join(".conductor/manifests").exists());
    }
}

// =============================================================================
// Configuration Tests
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();
        conductor()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No conductor.toml found"))
            .stdout(predicate::str::contains("tool.command = \"claude\""))
            .stdout(predicate::str::contains("(not set)"));
    }

    #[test]
    fn test_config_show_env_override() {
        let dir = create_temp_project();
        init_project(&dir);
        conductor()
            .current_dir(dir.path())
            .env("CONDUCTOR_PROFILE", "analyst")
            .env("CONDUCTOR_TIMEOUT_SECS", "42")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("tool.profile = \"analyst\""))
            .stdout(predicate::str::contains("timeout_secs = 42"));
    }

    #[test]
    fn test_config_validate_requires_profile() {
        let dir = create_temp_project();
        init_project(&dir);
        conductor()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("phase1"));

        conductor()
            .current_dir(dir.path())
            .env("CONDUCTOR_PROFILE", "analyst")
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));
    }

    #[test]
    fn test_cyclic_pipeline_is_a_config_error() {
        let dir = create_temp_project();
        write_config(
            &dir,
            r#"
[[phases]]
name = "a"
depends_on = ["b"]
command = ["true"]

[[phases]]
name = "b"
depends_on = ["a"]
command = ["true"]
"#,
        );
        conductor()
            .current_dir(dir.path())
            .arg("graph")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Cycle"));
    }

    #[test]
    fn test_graph_shows_waves() {
        let dir = create_temp_project();
        init_project(&dir);
        conductor()
            .current_dir(dir.path())
            .arg("graph")
            .assert()
            .success()
            .stdout(predicate::str::contains("Execution waves"))
            .stdout(predicate::str::contains("2. phase2a, phase2b, phase2c"))
            .stdout(predicate::str::contains("3. phase3"));
    }
}

// =============================================================================
// Quality Score
// =============================================================================

mod score {
    use super::*;

    #[test]
    fn test_score_meets_threshold() {
        let dir = create_temp_project();
        fs::write(dir.path().join("plan.md"), "# Plan\n\nConfidence Score: 8/10\n").unwrap();
        conductor()
            .current_dir(dir.path())
            .args(["score", "plan.md"])
            .assert()
            .success()
            .stdout(predicate::str::contains("score 8/10"));
    }

    #[test]
    fn test_score_below_threshold() {
        let dir = create_temp_project();
        fs::write(dir.path().join("plan.md"), "**Quality Score**: 7.5/10\n").unwrap();
        conductor()
            .current_dir(dir.path())
            .args(["score", "plan.md", "--threshold", "9"])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("below threshold"));
    }

    #[test]
    fn test_missing_score_is_error() {
        let dir = create_temp_project();
        fs::write(dir.path().join("plan.md"), "no score here\n").unwrap();
        conductor()
            .current_dir(dir.path())
            .args(["score", "plan.md"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("No quality score found"));
    }
}

// =============================================================================
// Pipeline Runs
// =============================================================================

#[cfg(unix)]
mod runs {
    use super::*;

    const PASSING: &str = r#"
[[phases]]
name = "prepare"
command = ["sh", "-c", "echo preparing $CONDUCTOR_FEATURE"]

[[phases]]
name = "build"
depends_on = ["prepare"]
command = ["sh", "-c", "echo building"]
"#;

    #[test]
    fn test_run_writes_manifest_and_logs() {
        let dir = create_temp_project();
        write_config(&dir, PASSING);

        conductor()
            .current_dir(dir.path())
            .args(["run", "INITIAL_auth", "--ui", "minimal"])
            .assert()
            .success();

        let manifest =
            fs::read_to_string(dir.path().join(".conductor/manifests/auth.jsonl")).unwrap();
        assert_eq!(manifest.lines().count(), 4);
        let log = fs::read_to_string(
            dir.path()
                .join(".conductor/logs/auth/prepare.attempt-1.log"),
        )
        .unwrap();
        assert!(log.contains("preparing auth"));

        conductor()
            .current_dir(dir.path())
            .args(["manifest", "verify", "auth"])
            .assert()
            .success()
            .stdout(predicate::str::contains("4 well-formed entries"));

        conductor()
            .current_dir(dir.path())
            .args(["manifest", "last", "auth", "build"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"status\":\"success\""));
    }

    #[test]
    fn test_failed_phase_exits_with_failure() {
        let dir = create_temp_project();
        write_config(
            &dir,
            r#"
[[phases]]
name = "build"
command = ["sh", "-c", "exit 2"]

[[phases]]
name = "package"
depends_on = ["build"]
command = ["true"]
"#,
        );

        conductor()
            .current_dir(dir.path())
            .args(["run", "auth", "--ui", "minimal"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("build"));

        conductor()
            .current_dir(dir.path())
            .args(["manifest", "last", "auth", "package"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("No entry"));
    }

    #[test]
    fn test_json_ui_streams_events() {
        let dir = create_temp_project();
        write_config(&dir, PASSING);

        conductor()
            .current_dir(dir.path())
            .args(["run", "auth", "--ui", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"type\":\"run_started\""))
            .stdout(predicate::str::contains("\"type\":\"run_finished\""));
    }

    #[test]
    fn test_exhausted_quality_gate_exit_code() {
        let dir = create_temp_project();
        write_config(
            &dir,
            r#"
[quality]
enabled = true
artifact = "{feature}.md"
threshold = 9.0
max_attempts = 2

[[phases]]
name = "draft"
command = ["sh", "-c", "echo 'Quality Score: 5/10' > {feature}.md"]
"#,
        );

        conductor()
            .current_dir(dir.path())
            .args(["run", "auth", "--ui", "minimal"])
            .assert()
            .code(3);

        conductor()
            .current_dir(dir.path())
            .args(["run", "auth", "--ui", "minimal", "--accept-low-quality"])
            .assert()
            .success();
    }

    #[test]
    fn test_malformed_manifest_is_reported() {
        let dir = create_temp_project();
        write_config(&dir, PASSING);
        let manifests = dir.path().join(".conductor/manifests");
        fs::create_dir_all(&manifests).unwrap();
        fs::write(manifests.join("auth.jsonl"), "not json\n").unwrap();

        conductor()
            .current_dir(dir.path())
            .args(["manifest", "verify", "auth"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("line 1"));

        conductor()
            .current_dir(dir.path())
            .args(["run", "auth", "--ui", "minimal"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Malformed manifest"));
    }
}
