//! Configuration loading via `ortho-config`.
//!
//! [`BastionConfig`] merges defaults, `bastion.toml`, and `BASTION_*`
//! environment variables. Command-line overrides are applied on top by
//! [`BastionConfig::resolve`], which freezes the result into [`Settings`]:
//! the immutable value every component receives.

use std::env;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::wait::PollPolicy;

/// Instance profile created on demand so the broker agent can register.
pub const DEFAULT_INSTANCE_PROFILE: &str = "BastionCliSessionManager";

const NEGOTIATION_INTERVAL: Duration = Duration::from_secs(1);
const PASSWORD_INTERVAL: Duration = Duration::from_secs(15);
const PASSWORD_ATTEMPTS: u32 = 30;
const VIEWER_INTERVAL: Duration = Duration::from_secs(1);
const VIEWER_ATTEMPTS: u32 = 60;
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Settings loaded from files and the environment.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "BASTION",
    discovery(
        app_name = "bastion",
        env_var = "BASTION_CONFIG_PATH",
        config_file_name = "bastion.toml",
        dotfile_name = ".bastion.toml",
        project_file_name = "bastion.toml"
    )
)]
pub struct BastionConfig {
    /// Region to operate in. Falls back to `AWS_REGION` and
    /// `AWS_DEFAULT_REGION`.
    pub region: Option<String>,
    /// Named credentials profile passed to every provider call.
    pub profile: Option<String>,
    /// Path to the `aws` executable.
    #[ortho_config(default = "aws".to_owned())]
    pub aws_bin: String,
    /// Path to the `session-manager-plugin` executable.
    #[ortho_config(default = "session-manager-plugin".to_owned())]
    pub plugin_bin: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Initial delay between readiness polls, in seconds.
    #[ortho_config(default = 5)]
    pub poll_interval_secs: u64,
    /// Upper bound for each readiness condition, in seconds.
    #[ortho_config(default = 600)]
    pub wait_timeout_secs: u64,
    /// Upper bound for the broker agent to register, in seconds.
    #[ortho_config(default = 300)]
    pub connect_timeout_secs: u64,
    /// Upper bound for a single provider CLI call, in seconds.
    #[ortho_config(default = 120)]
    pub command_timeout_secs: u64,
    /// Instance profile attached to bastions.
    #[ortho_config(default = DEFAULT_INSTANCE_PROFILE.to_owned())]
    pub instance_profile: String,
}

/// Values given on the command line, which win over every other source.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigOverrides {
    /// `--region`.
    pub region: Option<String>,
    /// `--profile`.
    pub profile: Option<String>,
}

/// Region and credentials profile for provider calls.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AwsContext {
    /// Region name.
    pub region: String,
    /// Credentials profile, `None` for the default chain.
    pub profile: Option<String>,
}

impl AwsContext {
    /// Profile argument for tools that take it positionally; empty selects
    /// the default chain.
    #[must_use]
    pub fn profile_arg(&self) -> &str {
        self.profile.as_deref().unwrap_or_default()
    }
}

/// Resolved, immutable settings for one invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Settings {
    /// Region and profile.
    pub aws: AwsContext,
    /// Path to the `aws` executable.
    pub aws_bin: String,
    /// Path to the `session-manager-plugin` executable.
    pub plugin_bin: String,
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Instance profile attached to bastions.
    pub instance_profile: String,
    /// Upper bound for a single provider CLI call.
    pub command_timeout: Duration,
    /// Policy for each readiness condition.
    pub readiness: PollPolicy,
    /// Policy for waiting on the broker agent.
    pub negotiation: PollPolicy,
    /// Policy for the administrator password to be published.
    pub password: PollPolicy,
    /// Policy for the local tunnel port to accept connections.
    pub viewer_port: PollPolicy,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: pass --{}, set {} or add {} to bastion.toml",
            self.description,
            self.toml_key.replace('_', "-"),
            self.env_var,
            self.toml_key
        ))
    }
}

impl BastionConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("bastion")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Applies `overrides` and the ambient `AWS_REGION` / `AWS_DEFAULT_REGION`
    /// fallback, then validates.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required value is missing or invalid.
    pub fn resolve(self, overrides: &ConfigOverrides) -> Result<Settings, ConfigError> {
        let ambient = env::var("AWS_REGION")
            .ok()
            .or_else(|| env::var("AWS_DEFAULT_REGION").ok());
        self.resolve_with(overrides, ambient)
    }

    /// Like [`Self::resolve`] with an explicit ambient region.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required value is missing or invalid.
    pub fn resolve_with(
        self,
        overrides: &ConfigOverrides,
        ambient_region: Option<String>,
    ) -> Result<Settings, ConfigError> {
        let region = first_non_blank([overrides.region.clone(), self.region, ambient_region])
            .ok_or_else(|| FieldMetadata::new("AWS region", "BASTION_REGION", "region").missing())?;
        let profile = first_non_blank([overrides.profile.clone(), self.profile]);

        let aws_bin = require(
            self.aws_bin,
            &FieldMetadata::new("aws CLI path", "BASTION_AWS_BIN", "aws_bin"),
        )?;
        let plugin_bin = require(
            self.plugin_bin,
            &FieldMetadata::new(
                "session-manager-plugin path",
                "BASTION_PLUGIN_BIN",
                "plugin_bin",
            ),
        )?;
        let ssh_bin = require(
            self.ssh_bin,
            &FieldMetadata::new("ssh path", "BASTION_SSH_BIN", "ssh_bin"),
        )?;
        let instance_profile = require(
            self.instance_profile,
            &FieldMetadata::new(
                "instance profile name",
                "BASTION_INSTANCE_PROFILE",
                "instance_profile",
            ),
        )?;

        let poll_interval = positive_secs("poll_interval_secs", self.poll_interval_secs)?;
        let wait_timeout = positive_secs("wait_timeout_secs", self.wait_timeout_secs)?;
        let connect_timeout = positive_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        let command_timeout = positive_secs("command_timeout_secs", self.command_timeout_secs)?;

        Ok(Settings {
            aws: AwsContext { region, profile },
            aws_bin,
            plugin_bin,
            ssh_bin,
            instance_profile,
            command_timeout,
            readiness: PollPolicy::exponential_budget(
                poll_interval,
                MAX_POLL_INTERVAL.max(poll_interval),
                wait_timeout,
            ),
            negotiation: PollPolicy::fixed_budget(NEGOTIATION_INTERVAL, connect_timeout),
            password: PollPolicy::fixed_attempts(PASSWORD_INTERVAL, PASSWORD_ATTEMPTS),
            viewer_port: PollPolicy::fixed_attempts(VIEWER_INTERVAL, VIEWER_ATTEMPTS),
        })
    }
}

fn first_non_blank<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_owned())
        .find(|value| !value.is_empty())
}

fn require(value: String, metadata: &FieldMetadata) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(metadata.missing());
    }
    Ok(trimmed.to_owned())
}

fn positive_secs(field: &'static str, value: u64) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field,
            message: String::from("must be greater than zero"),
        });
    }
    Ok(Duration::from_secs(value))
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("{0}")]
    MissingField(String),
    /// Indicates a field holds an unusable value.
    #[error("invalid {field}: {message}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
