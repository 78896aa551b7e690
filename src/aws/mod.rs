//! AWS adapter for the provider ports.
//!
//! Control-plane calls shell out to the `aws` CLI through a
//! [`CommandRunner`], so credentials, profiles, and SSO come from the
//! operator's usual CLI setup. Inputs that must not appear in `argv`, or that
//! the CLI shorthand syntax cannot express, are passed as
//! `--cli-input-json file://…` from a private temporary file. The broker's
//! `StartSession` is signed here and sent over HTTPS because the CLI would
//! otherwise spawn the data plane itself.

mod broker;
mod compute;
mod directory;
mod error;
mod identity;
mod parameters;
mod sigv4;

use std::ffi::OsString;
use std::io::Write;

use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::{AwsContext, Settings};
use crate::provider::{CloudPorts, ProviderError};
use crate::runner::{CommandRunner, ProcessCommandRunner};

pub use error::{classify_code, classify_output, from_runner};
pub use sigv4::{Credentials, SigningError, sign_json_request};

/// Adapter issuing AWS calls for one region and profile.
#[derive(Debug)]
pub struct AwsCli<R = ProcessCommandRunner> {
    runner: R,
    program: String,
    context: AwsContext,
    http: reqwest::Client,
}

impl AwsCli<ProcessCommandRunner> {
    /// Builds the production adapter from resolved settings.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            ProcessCommandRunner::new(settings.command_timeout),
            settings.aws_bin.clone(),
            settings.aws.clone(),
        )
    }
}

impl<R> AwsCli<R>
where
    R: CommandRunner + 'static,
{
    /// Creates an adapter that runs `program` through `runner`.
    #[must_use]
    pub fn new(runner: R, program: impl Into<String>, context: AwsContext) -> Self {
        Self {
            runner,
            program: program.into(),
            context,
            http: reqwest::Client::new(),
        }
    }

    /// Wraps the adapter as the full set of ports.
    #[must_use]
    pub fn into_ports(self) -> CloudPorts {
        CloudPorts::from_provider(std::sync::Arc::new(self))
    }

    /// Region every call targets.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.context.region
    }

    fn command_args<S: AsRef<str>>(&self, service: &str, operation: &str, extra: &[S]) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![service.into(), operation.into()];
        args.extend(extra.iter().map(|arg| OsString::from(arg.as_ref())));
        args.extend(["--output", "json", "--region"].map(OsString::from));
        args.push(OsString::from(&self.context.region));
        if let Some(profile) = &self.context.profile {
            args.push(OsString::from("--profile"));
            args.push(OsString::from(profile));
        }
        args
    }

    /// Runs one CLI operation and returns its stdout.
    async fn call<S: AsRef<str>>(
        &self,
        service: &str,
        operation: &str,
        extra: &[S],
    ) -> Result<String, ProviderError> {
        let args = self.command_args(service, operation, extra);
        debug!(service, operation, "aws call");
        let output = self
            .runner
            .run(&self.program, &args)
            .await
            .map_err(from_runner)?;
        if output.is_success() {
            Ok(output.stdout)
        } else {
            let err = classify_output(&output);
            debug!(service, operation, error = %err, "aws call failed");
            Err(err)
        }
    }

    /// Runs one CLI operation and decodes its JSON response.
    async fn call_json<T, S>(
        &self,
        service: &str,
        operation: &str,
        extra: &[S],
    ) -> Result<T, ProviderError>
    where
        T: DeserializeOwned,
        S: AsRef<str>,
    {
        let stdout = self.call(service, operation, extra).await?;
        parse_response(service, operation, &stdout)
    }

    /// Runs one CLI operation with its whole input read from a temporary
    /// file, which is removed once the call returns.
    async fn call_with_input<T>(
        &self,
        service: &str,
        operation: &str,
        input: &serde_json::Value,
    ) -> Result<T, ProviderError>
    where
        T: DeserializeOwned,
    {
        let file = write_input(operation, input)?;
        let reference = format!("file://{}", file.path().display());
        let stdout = self
            .call(service, operation, &["--cli-input-json", reference.as_str()])
            .await?;
        drop(file);
        if stdout.trim().is_empty() {
            // Operations with no output still decode into unit-like types.
            return parse_response(service, operation, "{}");
        }
        parse_response(service, operation, &stdout)
    }
}

fn write_input(operation: &str, input: &serde_json::Value) -> Result<NamedTempFile, ProviderError> {
    let local = |err: std::io::Error| ProviderError::Transport {
        endpoint: format!("{operation} input file"),
        message: err.to_string(),
    };
    let mut file = NamedTempFile::new().map_err(local)?;
    let body = serde_json::to_vec(input).map_err(|err| ProviderError::Parse {
        resource: operation.to_owned(),
        message: err.to_string(),
    })?;
    file.write_all(&body).map_err(local)?;
    file.flush().map_err(local)?;
    Ok(file)
}

fn parse_response<T: DeserializeOwned>(
    service: &str,
    operation: &str,
    stdout: &str,
) -> Result<T, ProviderError> {
    serde_json::from_str(stdout).map_err(|err| ProviderError::Parse {
        resource: format!("{service} {operation}"),
        message: err.to_string(),
    })
}

/// Key/value pair in AWS responses and inputs.
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "PascalCase")]
struct Tag {
    key: String,
    value: String,
}

fn tags_json(tags: &[(String, String)]) -> Vec<Tag> {
    tags.iter()
        .map(|(key, value)| Tag {
            key: key.clone(),
            value: value.clone(),
        })
        .collect()
}
