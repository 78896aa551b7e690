//! Binary entry point for the `bastion` CLI.

mod cli;

use std::io::{self, Write};
use std::process;
use std::time::Duration;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use clap::Parser;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use bastion::aws::AwsCli;
use bastion::config::{BastionConfig, ConfigError, ConfigOverrides, Settings};
use bastion::interrupt::InterruptGate;
use bastion::orchestrator::{
    ConnectMode, ConnectRequest, FAILURE_EXIT_CODE, FlowReport, LaunchRequest, LinuxAccess,
    Orchestrator, PortForwardRequest, TargetSelector, WindowsLaunchRequest,
};
use bastion::provision::{
    DEFAULT_LINUX_INSTANCE_TYPE, DEFAULT_VOLUME_SIZE_GIB, DEFAULT_VOLUME_TYPE,
    DEFAULT_WINDOWS_INSTANCE_TYPE, EfsMount, LaunchSpec, LaunchSpecError, LinuxBootstrap,
    PlatformFamily, PricingMode, VolumeSpec, validate_public_key, validate_ssh_user,
    windows_bootstrap,
};
use bastion::teardown::TerminationPolicy;

use cli::{
    Cli, Command, ExpiryArgs, InstanceArgs, LaunchCommand, LaunchWindowsCommand,
    PortForwardCommand, SshArgs, StartSessionCommand,
};

/// Windows Server needs a larger root volume than Amazon Linux.
const WINDOWS_VOLUME_SIZE_GIB: u32 = 30;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid input: {0}")]
    Input(#[from] LaunchSpecError),
    #[error("failed to read {path}: {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to install the interrupt handler: {0}")]
    Signals(#[from] io::Error),
}

/// A parsed command turned into the request its flow takes.
#[derive(Debug, Eq, PartialEq)]
enum Plan {
    Launch(LaunchRequest),
    LaunchWindows(WindowsLaunchRequest),
    StartSession(ConnectRequest),
    PortForward(PortForwardRequest),
    Terminate(String),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            FAILURE_EXIT_CODE
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "bastion=info",
        1 => "bastion=debug",
        _ => "bastion=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<i32, CliError> {
    let overrides = ConfigOverrides {
        region: cli.region,
        profile: cli.profile,
    };
    let settings = BastionConfig::load_without_cli_args()?.resolve(&overrides)?;
    debug!(region = settings.aws.region, "configuration resolved");
    let flow = plan(cli.command, &settings)?;

    let gate = InterruptGate::new();
    let signals = gate.install()?;
    let orchestrator = Orchestrator::new(
        AwsCli::from_settings(&settings).into_ports(),
        settings,
        gate,
    );
    let report = execute(&orchestrator, &flow).await;
    signals.abort();

    write_report(io::stderr(), &report);
    Ok(report.exit_code())
}

async fn execute(orchestrator: &Orchestrator, flow: &Plan) -> FlowReport {
    match flow {
        Plan::Launch(request) => orchestrator.launch(request).await,
        Plan::LaunchWindows(request) => orchestrator.launch_windows(request).await,
        Plan::StartSession(request) => orchestrator.start_session(request).await,
        Plan::PortForward(request) => orchestrator.port_forward(request).await,
        Plan::Terminate(session_id) => orchestrator.terminate(session_id).await,
    }
}

fn plan(command: Command, settings: &Settings) -> Result<Plan, CliError> {
    match command {
        Command::Launch(args) => plan_launch(&args, settings).map(Plan::Launch),
        Command::LaunchWindows(args) => {
            plan_launch_windows(&args, settings).map(Plan::LaunchWindows)
        }
        Command::StartSession(args) => plan_start_session(args).map(Plan::StartSession),
        Command::PortForward(args) => plan_port_forward(args, settings).map(Plan::PortForward),
        Command::Terminate(args) => Ok(Plan::Terminate(args.session_id)),
    }
}

fn plan_launch(args: &LaunchCommand, settings: &Settings) -> Result<LaunchRequest, CliError> {
    let expire_after = expiry(&args.expiry);
    let ssh_user = validate_ssh_user(&args.ssh.ssh_user)?;
    let ssh_public_key = args
        .ssh_key
        .as_deref()
        .map(|path| {
            read_to_string_ambient(path)
                .and_then(|key| validate_public_key(&key).map_err(CliError::from))
        })
        .transpose()?;
    let efs = args
        .efs
        .as_deref()
        .map(|fs| EfsMount::new(fs, &args.access_points))
        .transpose()?;
    let bootstrap = LinuxBootstrap {
        ssh_public_key,
        ssh_user: ssh_user.clone(),
        expire_after,
        efs,
    };
    let spec = build_spec(
        &args.instance,
        settings,
        PlatformFamily::AmazonLinux,
        bootstrap.render(),
    )?;
    let access = if args.ssh.ssh {
        LinuxAccess::Ssh {
            user: ssh_user,
            options: ssh_options(&args.ssh),
        }
    } else {
        LinuxAccess::Shell
    };
    Ok(LaunchRequest {
        spec,
        policy: policy(&args.instance),
        expire_after,
        access,
    })
}

fn plan_launch_windows(
    args: &LaunchWindowsCommand,
    settings: &Settings,
) -> Result<WindowsLaunchRequest, CliError> {
    let spec = build_spec(
        &args.instance,
        settings,
        PlatformFamily::Windows,
        windows_bootstrap(),
    )?;
    Ok(WindowsLaunchRequest {
        spec,
        policy: policy(&args.instance),
        expire_after: None,
        rdp: args.rdp,
        local_port: args.local_port,
    })
}

fn plan_start_session(args: StartSessionCommand) -> Result<ConnectRequest, CliError> {
    let target = match (args.instance_id, args.session_id) {
        (Some(instance_id), _) => TargetSelector::InstanceId(instance_id),
        (None, Some(session_id)) => TargetSelector::SessionId(session_id),
        (None, None) => TargetSelector::Interactive,
    };
    let mode = if args.rdp {
        ConnectMode::Rdp {
            local_port: args.local_port,
            keypair_parameter: args.keypair_parameter,
        }
    } else if args.ssh.ssh {
        ConnectMode::Ssh {
            user: validate_ssh_user(&args.ssh.ssh_user)?,
            options: ssh_options(&args.ssh),
        }
    } else {
        ConnectMode::Shell
    };
    Ok(ConnectRequest { target, mode })
}

fn plan_port_forward(
    args: PortForwardCommand,
    settings: &Settings,
) -> Result<PortForwardRequest, CliError> {
    let expire_after = expiry(&args.expiry);
    let bootstrap = LinuxBootstrap {
        expire_after,
        ..LinuxBootstrap::default()
    };
    let spec = build_spec(
        &args.instance,
        settings,
        PlatformFamily::AmazonLinux,
        bootstrap.render(),
    )?;
    Ok(PortForwardRequest {
        spec,
        policy: policy(&args.instance),
        expire_after,
        remote_port: args.remote_port,
        remote_host: args.remote_host,
        local_port: args.local_port,
    })
}

fn build_spec(
    args: &InstanceArgs,
    settings: &Settings,
    family: PlatformFamily,
    bootstrap: String,
) -> Result<LaunchSpec, LaunchSpecError> {
    let (default_type, default_size) = match family {
        PlatformFamily::AmazonLinux => (DEFAULT_LINUX_INSTANCE_TYPE, DEFAULT_VOLUME_SIZE_GIB),
        PlatformFamily::Windows => (DEFAULT_WINDOWS_INSTANCE_TYPE, WINDOWS_VOLUME_SIZE_GIB),
    };
    LaunchSpec::builder()
        .image(args.ami.as_deref().unwrap_or(family.as_str()))
        .instance_type(args.instance_type.as_deref().unwrap_or(default_type))
        .subnet_id(args.subnet_id.clone())
        .security_group(args.security_group_id.clone())
        .private(args.private)
        .volume(VolumeSpec {
            size_gib: args.volume_size.unwrap_or(default_size),
            volume_type: args
                .volume_type
                .clone()
                .unwrap_or_else(|| DEFAULT_VOLUME_TYPE.to_owned()),
            encrypted: !args.no_volume_encryption,
        })
        .pricing(if args.no_spot {
            PricingMode::OnDemand
        } else {
            PricingMode::Spot
        })
        .bootstrap(bootstrap)
        .instance_profile(Some(
            args.instance_profile
                .clone()
                .unwrap_or_else(|| settings.instance_profile.clone()),
        ))
        .build()
}

const fn policy(args: &InstanceArgs) -> TerminationPolicy {
    if args.no_terminate {
        TerminationPolicy::Retain
    } else {
        TerminationPolicy::Terminate
    }
}

fn expiry(args: &ExpiryArgs) -> Option<Duration> {
    (!args.no_expire).then(|| Duration::from_secs(args.expire_after.saturating_mul(60)))
}

fn ssh_options(args: &SshArgs) -> Vec<String> {
    args.ssh_opts
        .as_deref()
        .map(|opts| opts.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default()
}

fn read_to_string_ambient(path: &str) -> Result<String, CliError> {
    let path_buf = Utf8Path::new(path);
    let read_error = |message: String| CliError::ReadFile {
        path: path.to_owned(),
        message,
    };

    let (dir_path, file_path) = if path_buf.is_absolute() {
        let parent = path_buf
            .parent()
            .ok_or_else(|| read_error(String::from("path has no parent directory")))?;
        let file_name = path_buf
            .file_name()
            .ok_or_else(|| read_error(String::from("path has no file name")))?;
        (parent, Utf8Path::new(file_name))
    } else {
        (Utf8Path::new("."), path_buf)
    };

    let dir = Dir::open_ambient_dir(dir_path, ambient_authority())
        .map_err(|err| read_error(err.to_string()))?;
    dir.read_to_string(file_path)
        .map_err(|err| read_error(err.to_string()))
}

fn write_report(mut target: impl Write, report: &FlowReport) {
    if let Err(err) = &report.outcome {
        writeln!(target, "error: {err}").ok();
    }
    for failure in &report.teardown.failures {
        writeln!(
            target,
            "warning: could not {} {}: {}; remove it manually",
            failure.action.kind(),
            failure.action.resource_id(),
            failure.message
        )
        .ok();
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "error: {err}").ok();
}

#[cfg(test)]
mod main_tests;
