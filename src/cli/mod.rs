//! Command-line interface definitions for the `bastion` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `bastion` binary.
#[derive(Debug, Parser)]
#[command(
    name = "bastion",
    about = "Manage on-demand EC2 bastions reached through AWS Session Manager",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// AWS region; falls back to configuration, `AWS_REGION`, then
    /// `AWS_DEFAULT_REGION`.
    #[arg(long, short = 'r', global = true, value_name = "REGION")]
    pub(crate) region: Option<String>,
    /// Named AWS credentials profile.
    #[arg(long, short = 'p', global = true, value_name = "PROFILE")]
    pub(crate) profile: Option<String>,
    /// Raise log verbosity (`-v` debug, `-vv` trace).
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,
    /// Command to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands of the `bastion` binary.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Launch a Linux bastion and open a session to it.
    #[command(name = "launch")]
    Launch(LaunchCommand),
    /// Launch a Windows bastion and open a shell or remote desktop.
    #[command(name = "launch-windows")]
    LaunchWindows(LaunchWindowsCommand),
    /// Start a session with an existing instance.
    #[command(name = "start-session")]
    StartSession(StartSessionCommand),
    /// Forward a local port to a remote host through a new bastion.
    #[command(name = "port-forward")]
    PortForward(PortForwardCommand),
    /// Terminate a bastion left running by `--no-terminate`.
    #[command(name = "terminate")]
    Terminate(TerminateCommand),
}

/// Resource overrides shared by every command that creates a bastion.
#[derive(Debug, Args)]
pub(crate) struct InstanceArgs {
    /// Image id, parameter path holding an image id, `amazon-linux`, or
    /// `windows`.
    #[arg(long, value_name = "AMI")]
    pub(crate) ami: Option<String>,
    /// EC2 instance type.
    #[arg(long, short = 't', value_name = "TYPE")]
    pub(crate) instance_type: Option<String>,
    /// Subnet to launch into; a selector is shown when omitted.
    #[arg(long, short = 's', value_name = "SUBNET")]
    pub(crate) subnet_id: Option<String>,
    /// Security group, or `default` for the network's default group; a
    /// selector is shown when omitted.
    #[arg(long, short = 'g', value_name = "GROUP")]
    pub(crate) security_group_id: Option<String>,
    /// Use on-demand pricing instead of a spot request.
    #[arg(long)]
    pub(crate) no_spot: bool,
    /// Do not attach a public IP address.
    #[arg(long)]
    pub(crate) private: bool,
    /// Root volume size in GiB.
    #[arg(long, value_name = "GIB")]
    pub(crate) volume_size: Option<u32>,
    /// Root volume type.
    #[arg(long, value_name = "TYPE", value_parser = ["gp2", "gp3", "io1", "io2"])]
    pub(crate) volume_type: Option<String>,
    /// Leave the root volume unencrypted.
    #[arg(long)]
    pub(crate) no_volume_encryption: bool,
    /// Instance profile granting Session Manager access; created when missing.
    #[arg(long, value_name = "NAME")]
    pub(crate) instance_profile: Option<String>,
    /// Keep the bastion running after the session ends.
    #[arg(long)]
    pub(crate) no_terminate: bool,
}

/// Self-expiry controls for Linux bastions.
#[derive(Debug, Args)]
pub(crate) struct ExpiryArgs {
    /// Halt the bastion after this many minutes.
    #[arg(long, short = 'e', value_name = "MINUTES", default_value_t = 120)]
    pub(crate) expire_after: u64,
    /// Never halt the bastion on its own.
    #[arg(long)]
    pub(crate) no_expire: bool,
}

/// SSH session options.
#[derive(Debug, Args)]
pub(crate) struct SshArgs {
    /// Connect with SSH, using Session Manager as the proxy.
    #[arg(long)]
    pub(crate) ssh: bool,
    /// SSH login user.
    #[arg(long, short = 'u', value_name = "USER", default_value = "ec2-user")]
    pub(crate) ssh_user: String,
    /// Extra SSH options, for example `-L 3306:db.internal:3306`.
    #[arg(long, short = 'o', value_name = "OPTS", allow_hyphen_values = true)]
    pub(crate) ssh_opts: Option<String>,
}

/// Arguments for `bastion launch`.
#[derive(Debug, Args)]
pub(crate) struct LaunchCommand {
    #[command(flatten)]
    pub(crate) instance: InstanceArgs,
    #[command(flatten)]
    pub(crate) expiry: ExpiryArgs,
    #[command(flatten)]
    pub(crate) ssh: SshArgs,
    /// Public key file appended to the login user's `authorized_keys`.
    #[arg(long, short = 'k', value_name = "PATH")]
    pub(crate) ssh_key: Option<String>,
    /// EFS file system id to mount under `/efs`.
    #[arg(long, value_name = "FS")]
    pub(crate) efs: Option<String>,
    /// Comma-delimited access point ids to mount from `--efs`.
    #[arg(long, value_name = "IDS", value_delimiter = ',', requires = "efs")]
    pub(crate) access_points: Vec<String>,
}

/// Arguments for `bastion launch-windows`.
#[derive(Debug, Args)]
pub(crate) struct LaunchWindowsCommand {
    #[command(flatten)]
    pub(crate) instance: InstanceArgs,
    /// Open a remote desktop session and launch the local client.
    #[arg(long)]
    pub(crate) rdp: bool,
    /// Local port for the remote desktop tunnel; random when omitted.
    #[arg(long, short = 'l', value_name = "PORT", requires = "rdp")]
    pub(crate) local_port: Option<u16>,
}

/// Arguments for `bastion start-session`.
#[derive(Debug, Args)]
pub(crate) struct StartSessionCommand {
    /// Connect to this instance.
    #[arg(long, short = 'i', value_name = "INSTANCE", conflicts_with = "session_id")]
    pub(crate) instance_id: Option<String>,
    /// Connect to the bastion created for this session.
    #[arg(long, value_name = "SESSION")]
    pub(crate) session_id: Option<String>,
    #[command(flatten)]
    pub(crate) ssh: SshArgs,
    /// Open a remote desktop session.
    #[arg(long, conflicts_with = "ssh")]
    pub(crate) rdp: bool,
    /// Local port for the remote desktop tunnel; random when omitted.
    #[arg(long, short = 'l', value_name = "PORT", requires = "rdp")]
    pub(crate) local_port: Option<u16>,
    /// Parameter holding the private key that decrypts the Windows password.
    #[arg(long, value_name = "NAME", requires = "rdp")]
    pub(crate) keypair_parameter: Option<String>,
}

/// Arguments for `bastion port-forward`.
#[derive(Debug, Args)]
pub(crate) struct PortForwardCommand {
    #[command(flatten)]
    pub(crate) instance: InstanceArgs,
    #[command(flatten)]
    pub(crate) expiry: ExpiryArgs,
    /// Port on the remote host.
    #[arg(long, value_name = "PORT", required = true)]
    pub(crate) remote_port: u16,
    /// Remote host; an RDS database is selected when omitted.
    #[arg(long, value_name = "HOST")]
    pub(crate) remote_host: Option<String>,
    /// Local port; defaults to the remote port.
    #[arg(long, short = 'l', value_name = "PORT")]
    pub(crate) local_port: Option<u16>,
}

/// Arguments for `bastion terminate`.
#[derive(Debug, Args)]
pub(crate) struct TerminateCommand {
    /// Session id printed when the bastion was launched.
    #[arg(long, value_name = "SESSION", required = true)]
    pub(crate) session_id: String,
}
