//! Unit tests for the `bastion` CLI binary implementation.
//!
//! Keeping these tests in a separate module helps keep `src/main.rs` focused
//! on wiring.

use std::io::Write as _;

use bastion::orchestrator::{BastionError, SessionSummary};
use bastion::provision::{ImageReference, SecurityGroupChoice};
use bastion::teardown::{TeardownFailure, TeardownReport, UndoAction};
use bastion::test_support::test_settings;
use rstest::rstest;

use super::*;

fn parse(args: &[&str]) -> Command {
    let mut argv = vec!["bastion"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv)
        .unwrap_or_else(|err| panic!("arguments should parse: {err}"))
        .command
}

fn planned(args: &[&str]) -> Plan {
    plan(parse(args), &test_settings()).unwrap_or_else(|err| panic!("plan failed: {err}"))
}

#[test]
fn launch_defaults_to_a_spot_amazon_linux_shell() {
    let Plan::Launch(request) = planned(&["launch"]) else {
        panic!("expected a launch plan");
    };
    assert_eq!(
        request.spec.image,
        ImageReference::Platform(PlatformFamily::AmazonLinux)
    );
    assert_eq!(request.spec.instance_type, DEFAULT_LINUX_INSTANCE_TYPE);
    assert_eq!(request.spec.pricing, PricingMode::Spot);
    assert!(request.spec.associate_public_ip);
    assert!(request.spec.volume.encrypted);
    assert_eq!(request.policy, TerminationPolicy::Terminate);
    assert_eq!(request.expire_after, Some(Duration::from_secs(120 * 60)));
    assert_eq!(request.access, LinuxAccess::Shell);
    assert_eq!(
        request.spec.instance_profile.as_deref(),
        Some("BastionCliSessionManager")
    );
    assert!(request.spec.bootstrap.contains("at now + 120 minutes"));
}

#[test]
fn launch_overrides_reach_the_spec() {
    let Plan::Launch(request) = planned(&[
        "launch",
        "--ami",
        "ami-0123",
        "--instance-type",
        "t3.nano",
        "--subnet-id",
        "subnet-9",
        "--security-group-id",
        "default",
        "--no-spot",
        "--private",
        "--volume-size",
        "20",
        "--volume-type",
        "gp3",
        "--no-volume-encryption",
        "--no-terminate",
        "--no-expire",
    ]) else {
        panic!("expected a launch plan");
    };
    assert_eq!(
        request.spec.image,
        ImageReference::Concrete(String::from("ami-0123"))
    );
    assert_eq!(request.spec.instance_type, "t3.nano");
    assert_eq!(
        request.spec.placement.subnet_id.as_deref(),
        Some("subnet-9")
    );
    assert_eq!(
        request.spec.placement.security_group,
        SecurityGroupChoice::NetworkDefault
    );
    assert_eq!(request.spec.pricing, PricingMode::OnDemand);
    assert!(!request.spec.associate_public_ip);
    assert_eq!(request.spec.volume.size_gib, 20);
    assert_eq!(request.spec.volume.volume_type, "gp3");
    assert!(!request.spec.volume.encrypted);
    assert_eq!(request.policy, TerminationPolicy::Retain);
    assert_eq!(request.expire_after, None);
    assert!(!request.spec.bootstrap.contains("halt"));
}

#[test]
fn ssh_launch_reads_and_installs_the_public_key() {
    let mut key_file = tempfile::NamedTempFile::new()
        .unwrap_or_else(|err| panic!("temp file: {err}"));
    writeln!(key_file, "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAA operator@laptop")
        .unwrap_or_else(|err| panic!("write key: {err}"));
    let path = key_file.path().to_string_lossy().into_owned();

    let Plan::Launch(request) = planned(&[
        "launch",
        "--ssh",
        "--ssh-key",
        path.as_str(),
        "--ssh-user",
        "admin",
        "--ssh-opts",
        "-L 3306:db.internal:3306",
    ]) else {
        panic!("expected a launch plan");
    };
    assert_eq!(
        request.access,
        LinuxAccess::Ssh {
            user: String::from("admin"),
            options: vec![String::from("-L"), String::from("3306:db.internal:3306")],
        }
    );
    assert!(request.spec.bootstrap.contains("operator@laptop"));
    assert!(request.spec.bootstrap.contains("~admin/.ssh/authorized_keys"));
}

#[test]
fn missing_public_key_file_is_reported() {
    let err = plan(
        parse(&["launch", "--ssh-key", "/nonexistent/bastion/id.pub"]),
        &test_settings(),
    )
    .err()
    .unwrap_or_else(|| panic!("missing key file should fail"));
    assert!(matches!(err, CliError::ReadFile { .. }), "{err}");
}

#[test]
fn efs_access_points_are_split_on_commas() {
    let Plan::Launch(request) = planned(&[
        "launch",
        "--efs",
        "fs-1234",
        "--access-points",
        "fsap-1,fsap-2",
    ]) else {
        panic!("expected a launch plan");
    };
    assert!(request.spec.bootstrap.contains("accesspoint=fsap-1"));
    assert!(request.spec.bootstrap.contains("accesspoint=fsap-2"));
}

#[rstest]
#[case(&["launch", "--ami", "ubuntu"])]
#[case(&["launch", "--subnet-id", "vpc-1"])]
#[case(&["launch", "--ssh", "--ssh-user", "Root User"])]
#[case(&["launch", "--efs", "not-an-fs"])]
fn invalid_launch_input_is_rejected(#[case] args: &[&str]) {
    let err = plan(parse(args), &test_settings())
        .err()
        .unwrap_or_else(|| panic!("{args:?} should be rejected"));
    assert!(matches!(err, CliError::Input(_)), "{err}");
}

#[test]
fn windows_launch_uses_windows_defaults() {
    let Plan::LaunchWindows(request) = planned(&["launch-windows", "--rdp", "--local-port", "53389"])
    else {
        panic!("expected a windows plan");
    };
    assert_eq!(
        request.spec.image,
        ImageReference::Platform(PlatformFamily::Windows)
    );
    assert_eq!(request.spec.instance_type, DEFAULT_WINDOWS_INSTANCE_TYPE);
    assert_eq!(request.spec.volume.size_gib, WINDOWS_VOLUME_SIZE_GIB);
    assert!(request.rdp);
    assert_eq!(request.local_port, Some(53389));
    assert!(request.spec.bootstrap.starts_with("<powershell>"));
}

#[rstest]
#[case(&["start-session"], TargetSelector::Interactive)]
#[case(&["start-session", "--instance-id", "i-1"], TargetSelector::InstanceId(String::from("i-1")))]
#[case(&["start-session", "--session-id", "abc"], TargetSelector::SessionId(String::from("abc")))]
fn start_session_targets(#[case] args: &[&str], #[case] expected: TargetSelector) {
    let Plan::StartSession(request) = planned(args) else {
        panic!("expected a start-session plan");
    };
    assert_eq!(request.target, expected);
    assert_eq!(request.mode, ConnectMode::Shell);
}

#[test]
fn start_session_rdp_carries_the_key_parameter() {
    let Plan::StartSession(request) = planned(&[
        "start-session",
        "--instance-id",
        "i-1",
        "--rdp",
        "--keypair-parameter",
        "/keys/win",
    ]) else {
        panic!("expected a start-session plan");
    };
    assert_eq!(
        request.mode,
        ConnectMode::Rdp {
            local_port: None,
            keypair_parameter: Some(String::from("/keys/win")),
        }
    );
}

#[rstest]
#[case(&["start-session", "--instance-id", "i-1", "--session-id", "abc"])]
#[case(&["start-session", "--ssh", "--rdp"])]
#[case(&["port-forward"])]
#[case(&["terminate"])]
#[case(&["launch", "--access-points", "fsap-1"])]
fn conflicting_or_missing_flags_fail_to_parse(#[case] args: &[&str]) {
    let mut argv = vec!["bastion"];
    argv.extend_from_slice(args);
    assert!(Cli::try_parse_from(argv).is_err(), "{args:?} should not parse");
}

#[test]
fn port_forward_keeps_ports_and_host() {
    let Plan::PortForward(request) = planned(&[
        "port-forward",
        "--remote-port",
        "5432",
        "--remote-host",
        "db.internal",
        "--local-port",
        "15432",
    ]) else {
        panic!("expected a port-forward plan");
    };
    assert_eq!(request.remote_port, 5432);
    assert_eq!(request.remote_host.as_deref(), Some("db.internal"));
    assert_eq!(request.local_port, Some(15432));
}

#[test]
fn global_flags_are_accepted_after_the_subcommand() {
    let cli = Cli::try_parse_from(["bastion", "terminate", "--session-id", "abc", "-r", "eu-west-2", "-vv"])
        .unwrap_or_else(|err| panic!("arguments should parse: {err}"));
    assert_eq!(cli.region.as_deref(), Some("eu-west-2"));
    assert_eq!(cli.verbose, 2);
    assert!(matches!(cli.command, Command::Terminate(ref args) if args.session_id == "abc"));
}

#[test]
fn report_lists_teardown_failures_for_manual_cleanup() {
    let report = FlowReport {
        outcome: Err(BastionError::Interrupted),
        teardown: TeardownReport {
            failures: vec![TeardownFailure {
                action: UndoAction::TerminateInstance {
                    instance_id: String::from("i-0abc"),
                },
                message: String::from("throttled"),
            }],
            ..TeardownReport::default()
        },
    };
    let mut buf = Vec::new();
    write_report(&mut buf, &report);
    let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
    assert!(rendered.contains("error: interrupted"), "{rendered}");
    assert!(rendered.contains("i-0abc"), "{rendered}");
    assert!(rendered.contains("throttled"), "{rendered}");
    assert_eq!(report.exit_code(), FAILURE_EXIT_CODE);
}

#[test]
fn clean_report_writes_nothing() {
    let report = FlowReport {
        outcome: Ok(SessionSummary::default()),
        teardown: TeardownReport::default(),
    };
    let mut buf = Vec::new();
    write_report(&mut buf, &report);
    assert!(buf.is_empty());
    assert_eq!(report.exit_code(), 0);
}

#[test]
fn write_error_writes_cli_error() {
    let mut buf = Vec::new();
    let err = CliError::ReadFile {
        path: String::from("id.pub"),
        message: String::from("not found"),
    };
    write_error(&mut buf, &err);
    let rendered = String::from_utf8(buf).unwrap_or_else(|utf8| panic!("utf8: {utf8}"));
    assert_eq!(rendered, "error: failed to read id.pub: not found\n");
}
