//! Brokered sessions to a target.
//!
//! A [`SessionChannel`] negotiates a session with the broker, hands the
//! data plane to a child process, and closes the broker session afterwards.
//! Negotiation tolerates the target's agent not having registered yet; it
//! retries on a fixed interval until the connect budget is spent.

mod process;
mod purpose;
mod viewer;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Settings;
use crate::interrupt::InterruptGate;
use crate::provider::{BrokerSession, ProviderError, SessionBroker, StartSessionRequest};
use crate::wait::{PollError, PollStatus, poll_until};

pub use process::{
    DataPlaneCommand, ExitReport, InheritedStdioLauncher, LaunchFuture, ProcessLauncher,
    ProgramLocator, SIGNALLED_EXIT_CODE, SearchPathLocator, plugin_command, ssh_command,
};
pub use purpose::{RDP_PORT, SSH_PORT, SessionPurpose};
pub use viewer::{
    DesktopViewer, LOCAL_PORT_MIN, Viewer, ViewerError, ViewerFuture, random_local_port,
    rdp_file_contents, rdp_url, spawn_viewer, wait_for_port, write_rdp_file,
};

/// Lifecycle of a channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChannelState {
    /// Waiting for the broker to accept the session.
    Negotiating,
    /// The broker issued a session; the data plane may run.
    Open,
    /// The broker session is being terminated.
    Closing,
    /// The broker session is gone.
    Closed,
    /// Negotiation failed; nothing to close.
    Failed,
}

/// How the data plane is attached to the terminal.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DataPlane {
    /// Run the plugin directly.
    Plugin,
    /// Run an SSH client with the plugin as its proxy.
    Ssh {
        /// Login user on the target.
        user: String,
        /// Extra SSH client arguments.
        options: Vec<String>,
    },
}

/// Failures of a session channel.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ChannelError {
    /// The broker refused the session.
    #[error("failed to start session on {target}: {source}")]
    Negotiation {
        /// Session target.
        target: String,
        /// Underlying provider error.
        source: ProviderError,
    },
    /// The target's agent never registered within the connect budget.
    #[error("agent on {target} did not register after {attempts} attempts")]
    AgentNotRegistered {
        /// Session target.
        target: String,
        /// Negotiation attempts made.
        attempts: u32,
    },
    /// Negotiation was interrupted.
    #[error("session negotiation with {target} cancelled")]
    Cancelled {
        /// Session target.
        target: String,
    },
    /// An operation was attempted in the wrong state.
    #[error("cannot {operation} a channel in state {state:?}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// Current state.
        state: ChannelState,
    },
    /// The plugin arguments could not be encoded.
    #[error("failed to encode session request: {message}")]
    Encode {
        /// Encoder message.
        message: String,
    },
    /// The data-plane child could not be started or awaited.
    #[error("failed to run {program}: {message}")]
    Launch {
        /// Program invoked.
        program: String,
        /// OS error text.
        message: String,
    },
    /// The broker refused to terminate the session.
    #[error("failed to close session {session_id}: {source}")]
    Close {
        /// Broker session id.
        session_id: String,
        /// Underlying provider error.
        source: ProviderError,
    },
}

/// Terminates a broker session. A session that is already gone counts as
/// closed.
///
/// # Errors
///
/// Returns [`ChannelError::Close`] for any other failure.
pub async fn close_session(broker: &dyn SessionBroker, session_id: &str) -> Result<(), ChannelError> {
    match broker.terminate_session(session_id).await {
        Ok(()) => {
            info!(session_id, "broker session closed");
            Ok(())
        }
        Err(err) if err.is_not_found() => Ok(()),
        Err(source) => Err(ChannelError::Close {
            session_id: session_id.to_owned(),
            source,
        }),
    }
}

/// One brokered session.
pub struct SessionChannel<'a> {
    broker: &'a dyn SessionBroker,
    launcher: &'a dyn ProcessLauncher,
    settings: &'a Settings,
    state: ChannelState,
    negotiated: Option<(StartSessionRequest, BrokerSession)>,
}

impl<'a> SessionChannel<'a> {
    /// Creates a channel in [`ChannelState::Negotiating`].
    #[must_use]
    pub fn new(
        broker: &'a dyn SessionBroker,
        launcher: &'a dyn ProcessLauncher,
        settings: &'a Settings,
    ) -> Self {
        Self {
            broker,
            launcher,
            settings,
            state: ChannelState::Negotiating,
            negotiated: None,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ChannelState {
        self.state
    }

    /// Broker session id once negotiated.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.negotiated
            .as_ref()
            .map(|(_, session)| session.session_id.as_str())
    }

    /// Asks the broker for a session on `target`.
    ///
    /// "Target not connected" is retried on the negotiation policy; any other
    /// broker error fails immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::AgentNotRegistered`] when the budget runs out,
    /// [`ChannelError::Cancelled`] on interrupt, or
    /// [`ChannelError::Negotiation`].
    pub async fn negotiate(
        &mut self,
        target: &str,
        purpose: &SessionPurpose,
        cancel: &CancellationToken,
    ) -> Result<&BrokerSession, ChannelError> {
        if self.state != ChannelState::Negotiating {
            return Err(ChannelError::InvalidState {
                operation: "negotiate",
                state: self.state,
            });
        }

        let request = purpose.request(target);
        let broker = self.broker;
        let pending = &request;
        let result = poll_until(&self.settings.negotiation, cancel, || async move {
            match broker.start_session(pending).await {
                Ok(session) => Ok(PollStatus::Ready(session)),
                Err(err) if err.is_target_not_connected() => {
                    debug!(instance = pending.target, "agent not registered yet");
                    Ok(PollStatus::Pending)
                }
                Err(err) => Err(err),
            }
        })
        .await;

        let session = match result {
            Ok(session) => session,
            Err(err) => {
                self.state = ChannelState::Failed;
                return Err(match err {
                    PollError::Check(source) => ChannelError::Negotiation {
                        target: target.to_owned(),
                        source,
                    },
                    PollError::Exhausted { attempts, .. } => ChannelError::AgentNotRegistered {
                        target: target.to_owned(),
                        attempts,
                    },
                    PollError::Terminal(_) | PollError::Cancelled => ChannelError::Cancelled {
                        target: target.to_owned(),
                    },
                });
            }
        };

        info!(instance = target, session_id = session.session_id, "broker session started");
        self.state = ChannelState::Open;
        let (_, negotiated) = self.negotiated.insert((request, session));
        Ok(negotiated)
    }

    /// Runs the data plane in the foreground until the child exits.
    ///
    /// Interrupts are passed through to the child for as long as it runs.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidState`] before negotiation, or the
    /// launcher's failure.
    pub async fn open(
        &self,
        data_plane: &DataPlane,
        gate: &InterruptGate,
    ) -> Result<ExitReport, ChannelError> {
        let Some((request, session)) = self.negotiated.as_ref().filter(|_| self.state == ChannelState::Open)
        else {
            return Err(ChannelError::InvalidState {
                operation: "open",
                state: self.state,
            });
        };

        let proxy = plugin_command(&self.settings.plugin_bin, session, request, &self.settings.aws)?;
        let command = match data_plane {
            DataPlane::Plugin => proxy,
            DataPlane::Ssh { user, options } => {
                ssh_command(&self.settings.ssh_bin, &proxy, user, &request.target, options)
            }
        };

        debug!(program = command.program, "starting data plane");
        let _passthrough = gate.passthrough();
        let report = self.launcher.launch(&command).await?;
        info!(code = ?report.code, signal = ?report.signal, "data plane exited");
        Ok(report)
    }

    /// Terminates the broker session. Closing a channel that never opened,
    /// or that is already closed, does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Close`] when the broker refuses.
    pub async fn close(&mut self) -> Result<(), ChannelError> {
        if self.state != ChannelState::Open {
            return Ok(());
        }
        let Some((_, session)) = self.negotiated.as_ref() else {
            return Ok(());
        };
        self.state = ChannelState::Closing;
        close_session(self.broker, &session.session_id).await?;
        self.state = ChannelState::Closed;
        Ok(())
    }
}
