//! Data-plane child processes.
//!
//! The broker's data plane is spoken by the session plugin, either directly
//! or as an SSH `ProxyCommand`. The child owns the terminal: stdio is
//! inherited and the orchestrator only waits for it to exit.

use std::ffi::OsString;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use serde_json::{Map, Value, json};
use shell_escape::unix::escape;
use tokio::process::Command;

use super::ChannelError;
use crate::config::AwsContext;
use crate::provider::{BrokerSession, StartSessionRequest};

/// Exit status reported when the child was killed by a signal.
pub const SIGNALLED_EXIT_CODE: i32 = 130;

/// A program and its arguments.
#[derive(Clone, Eq, PartialEq)]
pub struct DataPlaneCommand {
    /// Executable.
    pub program: String,
    /// Arguments, passed without a shell.
    pub args: Vec<OsString>,
}

impl DataPlaneCommand {
    /// Renders the command as a single shell-escaped line.
    #[must_use]
    pub fn render(&self) -> String {
        let mut line = escape(self.program.as_str().into()).into_owned();
        for arg in &self.args {
            line.push(' ');
            let text = arg.to_string_lossy();
            line.push_str(escape(text).as_ref());
        }
        line
    }
}

impl fmt::Debug for DataPlaneCommand {
    // Arguments carry the broker token.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataPlaneCommand")
            .field("program", &self.program)
            .field("args", &self.args.len())
            .finish()
    }
}

/// How a data-plane child ended.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ExitReport {
    /// Exit code, absent when killed by a signal.
    pub code: Option<i32>,
    /// Terminating signal, if any.
    pub signal: Option<i32>,
}

impl ExitReport {
    /// Clean exit.
    #[must_use]
    pub const fn success() -> Self {
        Self {
            code: Some(0),
            signal: None,
        }
    }

    /// Status the orchestrator propagates to its own caller.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self.code {
            Some(code) => code,
            None => SIGNALLED_EXIT_CODE,
        }
    }
}

/// Boxed future returned by [`ProcessLauncher::launch`].
pub type LaunchFuture<'a> = Pin<Box<dyn Future<Output = Result<ExitReport, ChannelError>> + Send + 'a>>;

/// Runs a data-plane child to completion.
pub trait ProcessLauncher: Send + Sync {
    /// Spawns `command` attached to the terminal and waits for it to exit.
    fn launch<'a>(&'a self, command: &'a DataPlaneCommand) -> LaunchFuture<'a>;
}

/// Launcher that hands the terminal to the child.
#[derive(Clone, Copy, Debug, Default)]
pub struct InheritedStdioLauncher;

impl ProcessLauncher for InheritedStdioLauncher {
    fn launch<'a>(&'a self, command: &'a DataPlaneCommand) -> LaunchFuture<'a> {
        Box::pin(async move {
            let mut child = Command::new(&command.program)
                .args(&command.args)
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn()
                .map_err(|err| ChannelError::Launch {
                    program: command.program.clone(),
                    message: err.to_string(),
                })?;
            let status = child.wait().await.map_err(|err| ChannelError::Launch {
                program: command.program.clone(),
                message: err.to_string(),
            })?;

            #[cfg(unix)]
            let signal = std::os::unix::process::ExitStatusExt::signal(&status);
            #[cfg(not(unix))]
            let signal = None;

            Ok(ExitReport {
                code: status.code(),
                signal,
            })
        })
    }
}

/// Finds data-plane executables before any remote work starts.
pub trait ProgramLocator: Send + Sync {
    /// Path `program` resolves to, or `None` when it cannot be run.
    fn locate(&self, program: &str) -> Option<PathBuf>;
}

/// Resolves programs the way a shell would, through `PATH`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SearchPathLocator;

impl ProgramLocator for SearchPathLocator {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

/// Builds the plugin invocation for a negotiated session.
///
/// # Errors
///
/// Returns [`ChannelError::Encode`] when the session or request cannot be
/// serialized.
pub fn plugin_command(
    plugin_bin: &str,
    session: &BrokerSession,
    request: &StartSessionRequest,
    aws: &AwsContext,
) -> Result<DataPlaneCommand, ChannelError> {
    let session_json = json!({
        "SessionId": session.session_id,
        "TokenValue": session.token_value,
        "StreamUrl": session.stream_url,
    });

    let mut request_json = Map::new();
    request_json.insert(String::from("Target"), Value::String(request.target.clone()));
    if let Some(document) = &request.document {
        request_json.insert(String::from("DocumentName"), Value::String(document.clone()));
    }
    if !request.parameters.is_empty() {
        let parameters = serde_json::to_value(&request.parameters)
            .map_err(|err| ChannelError::Encode {
                message: err.to_string(),
            })?;
        request_json.insert(String::from("Parameters"), parameters);
    }

    Ok(DataPlaneCommand {
        program: plugin_bin.to_owned(),
        args: vec![
            OsString::from(session_json.to_string()),
            OsString::from(&aws.region),
            OsString::from("StartSession"),
            OsString::from(aws.profile_arg()),
            OsString::from(Value::Object(request_json).to_string()),
            OsString::from(&session.endpoint),
        ],
    })
}

/// Wraps a plugin invocation as the `ProxyCommand` of an SSH client.
#[must_use]
pub fn ssh_command(
    ssh_bin: &str,
    proxy: &DataPlaneCommand,
    user: &str,
    instance_id: &str,
    ssh_options: &[String],
) -> DataPlaneCommand {
    let mut args = vec![
        OsString::from("-o"),
        OsString::from(format!("ProxyCommand={}", proxy.render())),
        OsString::from(format!("{user}@{instance_id}")),
    ];
    args.extend(ssh_options.iter().map(OsString::from));
    DataPlaneCommand {
        program: ssh_bin.to_owned(),
        args,
    }
}
