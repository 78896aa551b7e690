//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use tempfile::TempDir;

/// Runs the binary from an empty directory so no configuration file or
/// ambient region leaks into the test.
fn isolated(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("bastion");
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path())
        .env_remove("AWS_REGION")
        .env_remove("AWS_DEFAULT_REGION")
        .env_remove("BASTION_REGION")
        .env_remove("BASTION_PROFILE")
        .env_remove("BASTION_CONFIG_PATH")
        .env_remove("BASTION_AWS_BIN");
    cmd
}

fn temp_dir() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("temp dir: {err}"))
}

#[test]
fn cli_without_arguments_prints_usage() {
    let mut cmd = cargo_bin_cmd!("bastion");
    cmd.assert().failure().stderr(contains("Usage"));
}

#[test]
fn help_lists_every_command() {
    let mut cmd = cargo_bin_cmd!("bastion");
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(contains("launch"))
        .stdout(contains("launch-windows"))
        .stdout(contains("start-session"))
        .stdout(contains("port-forward"))
        .stdout(contains("terminate"));
}

#[test]
fn missing_region_names_the_environment_variable() {
    let dir = temp_dir();
    let mut cmd = isolated(&dir);
    cmd.args(["terminate", "--session-id", "abc"]);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("BASTION_REGION"));
}

#[test]
fn invalid_image_is_rejected_before_any_call() {
    let dir = temp_dir();
    let mut cmd = isolated(&dir);
    cmd.env("BASTION_REGION", "eu-west-1")
        .env("BASTION_AWS_BIN", dir.path().join("missing-aws"))
        .args(["launch", "--ami", "ubuntu"]);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("invalid input"));
}

#[cfg(unix)]
mod fake_aws {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    use predicates::str::contains;
    use tempfile::TempDir;

    use super::{isolated, temp_dir};

    const SCRIPT: &str = r#"#!/bin/sh
echo "$*" >> "$FAKE_AWS_LOG"
case "$1 $2" in
  "ec2 describe-instances")
    if [ -n "$FAKE_AWS_INSTANCE" ]; then
      echo "{\"Reservations\":[{\"Instances\":[{\"InstanceId\":\"$FAKE_AWS_INSTANCE\"}]}]}"
    else
      echo '{"Reservations":[]}'
    fi
    ;;
  *)
    echo '{}'
    ;;
esac
"#;

    fn install(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("aws");
        fs::write(&path, SCRIPT).unwrap_or_else(|err| panic!("write script: {err}"));
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .unwrap_or_else(|err| panic!("chmod script: {err}"));
        path
    }

    fn calls(dir: &TempDir) -> String {
        fs::read_to_string(dir.path().join("calls.log"))
            .unwrap_or_else(|err| panic!("read call log: {err}"))
    }

    #[test]
    fn terminate_removes_the_instance_and_its_credentials() {
        let dir = temp_dir();
        let script = install(&dir);
        let mut cmd = isolated(&dir);
        cmd.env("BASTION_REGION", "eu-west-1")
            .env("BASTION_AWS_BIN", &script)
            .env("FAKE_AWS_LOG", dir.path().join("calls.log"))
            .env("FAKE_AWS_INSTANCE", "i-0abc")
            .args(["terminate", "--session-id", "abc"]);
        cmd.assert().success();

        let log = calls(&dir);
        assert!(
            log.contains("ec2 terminate-instances --instance-ids i-0abc"),
            "{log}"
        );
        assert!(log.contains("ssm delete-parameter"), "{log}");
        assert!(log.contains("ec2 delete-key-pair"), "{log}");
        assert!(log.contains("--region eu-west-1"), "{log}");
    }

    #[test]
    fn terminate_without_a_live_instance_fails_but_still_cleans_up() {
        let dir = temp_dir();
        let script = install(&dir);
        let mut cmd = isolated(&dir);
        cmd.env("BASTION_REGION", "eu-west-1")
            .env("BASTION_AWS_BIN", &script)
            .env("FAKE_AWS_LOG", dir.path().join("calls.log"))
            .env_remove("FAKE_AWS_INSTANCE")
            .args(["terminate", "--session-id", "abc"]);
        cmd.assert()
            .failure()
            .code(1)
            .stderr(contains("no running instance found for session abc"));

        let log = calls(&dir);
        assert!(!log.contains("terminate-instances"), "{log}");
        assert!(log.contains("ssm delete-parameter"), "{log}");
        assert!(log.contains("ec2 delete-key-pair"), "{log}");
    }
}
