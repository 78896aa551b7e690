//! Command flows.
//!
//! Every flow follows the same shape: forward steps run under the
//! interrupt gate and record an undo action as soon as each remote resource
//! exists; the undo log is then unwound on every exit path, after which the
//! flow reports both its outcome and what teardown managed to do.

mod error;
mod launch;
mod notify;
mod port_forward;
mod session;
mod terminate;
mod windows;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::channel::{
    DataPlane, DesktopViewer, ExitReport, InheritedStdioLauncher, ProcessLauncher, ProgramLocator,
    SearchPathLocator, SessionChannel, SessionPurpose, Viewer, spawn_viewer,
};
use crate::config::Settings;
use crate::identity::{Session, new_session_id};
use crate::interrupt::InterruptGate;
use crate::provider::CloudPorts;
use crate::provision::{ComputeResource, LaunchSpec, Provisioner, ResourceState};
use crate::select::{PromptSelector, Selector};
use crate::teardown::{
    TeardownCoordinator, TeardownReport, TerminationPolicy, UndoAction, UndoLog,
};
use crate::wait::{ReadinessCondition, ReadinessWaiter, WaitError, WaitOutcome};

pub use error::BastionError;
pub use notify::{
    Clipboard, ClipboardError, ConsoleNotifier, Notice, Notifier, SystemClipboard,
};

/// Exit status for a flow that failed before or instead of the data plane.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// How the operator reaches a Linux bastion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LinuxAccess {
    /// Interactive shell through the broker.
    Shell,
    /// SSH with the broker as proxy.
    Ssh {
        /// Login user.
        user: String,
        /// Extra SSH client arguments.
        options: Vec<String>,
    },
}

/// Input to [`Orchestrator::launch`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchRequest {
    /// Validated launch spec.
    pub spec: LaunchSpec,
    /// Whether the bastion survives the command.
    pub policy: TerminationPolicy,
    /// Self-expiry recorded in the session tags.
    pub expire_after: Option<Duration>,
    /// Session type once the bastion is up.
    pub access: LinuxAccess,
}

/// Input to [`Orchestrator::launch_windows`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WindowsLaunchRequest {
    /// Validated launch spec.
    pub spec: LaunchSpec,
    /// Whether the bastion survives the command.
    pub policy: TerminationPolicy,
    /// Self-expiry recorded in the session tags.
    pub expire_after: Option<Duration>,
    /// Open a remote desktop instead of a shell.
    pub rdp: bool,
    /// Local port for the desktop tunnel; random when unset.
    pub local_port: Option<u16>,
}

/// How [`Orchestrator::start_session`] finds its target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TargetSelector {
    /// A known instance id.
    InstanceId(String),
    /// The live instance tagged with a session id.
    SessionId(String),
    /// Ask the operator to pick an online managed instance.
    Interactive,
}

/// Session type for [`Orchestrator::start_session`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConnectMode {
    /// Interactive shell.
    Shell,
    /// SSH with the broker as proxy.
    Ssh {
        /// Login user.
        user: String,
        /// Extra SSH client arguments.
        options: Vec<String>,
    },
    /// Remote desktop over a local tunnel.
    Rdp {
        /// Local port; random when unset.
        local_port: Option<u16>,
        /// Secret holding the key that decrypts the password.
        keypair_parameter: Option<String>,
    },
}

/// Input to [`Orchestrator::start_session`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectRequest {
    /// Target lookup.
    pub target: TargetSelector,
    /// Session type.
    pub mode: ConnectMode,
}

/// Input to [`Orchestrator::port_forward`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PortForwardRequest {
    /// Validated launch spec.
    pub spec: LaunchSpec,
    /// Whether the bastion survives the command.
    pub policy: TerminationPolicy,
    /// Self-expiry recorded in the session tags.
    pub expire_after: Option<Duration>,
    /// Port on the remote host.
    pub remote_port: u16,
    /// Remote host; a database is selected when unset.
    pub remote_host: Option<String>,
    /// Local port; defaults to `remote_port`.
    pub local_port: Option<u16>,
}

/// What a successful flow did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SessionSummary {
    /// Session id, when one was created or looked up.
    pub session_id: Option<String>,
    /// Instance the flow worked on.
    pub instance_id: Option<String>,
    /// How the data plane exited, when one ran.
    pub exit: Option<ExitReport>,
}

/// Outcome of a flow together with its teardown.
#[derive(Debug)]
pub struct FlowReport {
    /// Forward-flow result.
    pub outcome: Result<SessionSummary, BastionError>,
    /// What teardown did.
    pub teardown: TeardownReport,
}

impl FlowReport {
    /// Process exit status. Teardown failures never change it.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match &self.outcome {
            Ok(summary) => summary.exit.map_or(0, |report| report.exit_code()),
            Err(_) => FAILURE_EXIT_CODE,
        }
    }
}

/// Runs command flows against a set of cloud ports.
pub struct Orchestrator {
    cloud: CloudPorts,
    settings: Settings,
    gate: InterruptGate,
    selector: Arc<dyn Selector>,
    launcher: Arc<dyn ProcessLauncher>,
    notifier: Arc<dyn Notifier>,
    viewer: Arc<dyn Viewer>,
    locator: Arc<dyn ProgramLocator>,
}

impl Orchestrator {
    /// Creates an orchestrator with the interactive collaborators.
    #[must_use]
    pub fn new(cloud: CloudPorts, settings: Settings, gate: InterruptGate) -> Self {
        Self {
            cloud,
            settings,
            gate,
            selector: Arc::new(PromptSelector),
            launcher: Arc::new(InheritedStdioLauncher),
            notifier: Arc::new(ConsoleNotifier::default()),
            viewer: Arc::new(DesktopViewer),
            locator: Arc::new(SearchPathLocator),
        }
    }

    /// Replaces the selector.
    #[must_use]
    pub fn with_selector(mut self, selector: Arc<dyn Selector>) -> Self {
        self.selector = selector;
        self
    }

    /// Replaces the data-plane launcher.
    #[must_use]
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Replaces the notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replaces the remote desktop viewer.
    #[must_use]
    pub fn with_viewer(mut self, viewer: Arc<dyn Viewer>) -> Self {
        self.viewer = viewer;
        self
    }

    /// Replaces how data-plane programs are found.
    #[must_use]
    pub fn with_locator(mut self, locator: Arc<dyn ProgramLocator>) -> Self {
        self.locator = locator;
        self
    }

    /// Runs `forward` to completion, then unwinds `log`.
    ///
    /// `forward` is never dropped part-way: it observes interrupts itself,
    /// through [`Self::interruptible`] steps and [`Self::checkpoint`]s, so
    /// every create call it starts is followed by its undo entry.
    async fn finish<Fut>(&self, policy: TerminationPolicy, log: &UndoLog, forward: Fut) -> FlowReport
    where
        Fut: Future<Output = Result<SessionSummary, BastionError>>,
    {
        let outcome = forward.await;
        if let Err(err) = &outcome {
            warn!(error = %err, "command failed; cleaning up");
        }

        let teardown = TeardownCoordinator::new(policy)
            .unwind(log, &self.cloud)
            .await;
        for failure in &teardown.failures {
            warn!(
                action = failure.action.kind(),
                resource = failure.action.resource_id(),
                error = failure.message,
                "cleanup failed; remove the resource manually"
            );
        }

        let retained = teardown
            .skipped
            .iter()
            .any(|action| matches!(action, UndoAction::TerminateInstance { .. }));
        if retained
            && let Ok(SessionSummary {
                session_id: Some(session_id),
                ..
            }) = &outcome
        {
            self.notifier.notify(&Notice::Retained {
                session_id: session_id.clone(),
            });
        }

        FlowReport { outcome, teardown }
    }

    /// Runs a step that creates nothing; an interrupt abandons it.
    async fn interruptible<T, Fut>(&self, step: Fut) -> Result<T, BastionError>
    where
        Fut: Future<Output = Result<T, BastionError>>,
    {
        self.gate
            .run(step)
            .await
            .unwrap_or_else(|| Err(BastionError::Interrupted))
    }

    /// Stops the flow once an interrupt has arrived. Called after each
    /// create call has recorded its undo entry.
    fn checkpoint(&self) -> Result<(), BastionError> {
        if self.gate.is_interrupted() {
            Err(BastionError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Fails when the plugin, or the SSH client when `with_ssh` is set, is
    /// missing. Runs before any provider call.
    fn preflight(&self, with_ssh: bool) -> Result<(), BastionError> {
        let mut required = vec![("session manager plugin", self.settings.plugin_bin.as_str())];
        if with_ssh {
            required.push(("ssh client", self.settings.ssh_bin.as_str()));
        }
        for (label, program) in required {
            let Some(path) = self.locator.locate(program) else {
                return Err(BastionError::validation(format!(
                    "{label} `{program}` is not installed or not on PATH"
                )));
            };
            debug!(program, path = %path.display(), "found {label}");
        }
        Ok(())
    }

    async fn new_session(&self, expire_after: Option<Duration>) -> Result<Session, BastionError> {
        let created_by = self
            .interruptible(async {
                self.cloud.identity.caller_identity().await.map_err(BastionError::from)
            })
            .await?;
        let session = Session::new(new_session_id(), created_by, expire_after);
        info!(session_id = %session.id(), "bastion session id");
        Ok(session)
    }

    /// Creates the bastion and records its termination.
    ///
    /// The instance profile setup and the create call run to completion once
    /// started; an interrupt is honoured only after the instance's
    /// termination has been recorded.
    async fn provision(
        &self,
        spec: &LaunchSpec,
        session: &Session,
        log: &UndoLog,
    ) -> Result<ComputeResource, BastionError> {
        let provisioner = Provisioner::new(&self.cloud, self.selector.as_ref());
        self.checkpoint()?;
        provisioner.ensure_profile(spec).await?;
        let request = self
            .interruptible(async { provisioner.prepare(spec, session).await.map_err(BastionError::from) })
            .await?;

        let resource = provisioner.create(&request, session).await?;
        log.push(UndoAction::TerminateInstance {
            instance_id: resource.resource_id.clone(),
        });
        self.notifier.notify(&Notice::SessionCreated {
            session_id: session.id().to_string(),
            instance_id: resource.resource_id.clone(),
        });
        self.checkpoint()?;
        Ok(resource)
    }

    /// Waits for `condition` and advances the resource state.
    async fn await_condition(
        &self,
        resource: &mut ComputeResource,
        condition: ReadinessCondition,
    ) -> Result<(), BastionError> {
        let waiter = ReadinessWaiter::new(self.cloud.compute.as_ref(), self.gate.token());
        let outcome = waiter
            .wait_until(&resource.resource_id, condition, &self.settings.readiness)
            .await;
        match outcome {
            Ok(WaitOutcome::Ready) => {
                resource.advance(match condition {
                    ReadinessCondition::Running => ResourceState::Running,
                    ReadinessCondition::StatusOk => ResourceState::StatusOk,
                });
                info!(instance_id = resource.resource_id, condition = condition.label(), "instance ready");
                Ok(())
            }
            Ok(WaitOutcome::TimedOut { attempts, elapsed }) => Err(BastionError::ReadinessTimeout {
                instance_id: resource.resource_id.clone(),
                condition: condition.label(),
                attempts,
                elapsed_secs: elapsed.as_secs(),
            }),
            Err(WaitError::Cancelled { .. }) => Err(BastionError::Interrupted),
            Err(err) => {
                resource.advance(ResourceState::Failed);
                Err(err.into())
            }
        }
    }

    /// Negotiates a session, runs the data plane in the foreground, and
    /// closes the session whatever the child's exit status.
    async fn run_channel(
        &self,
        target: &str,
        purpose: &SessionPurpose,
        data_plane: &DataPlane,
        log: &UndoLog,
        open_viewer: bool,
    ) -> Result<ExitReport, BastionError> {
        let mut channel =
            SessionChannel::new(self.cloud.broker.as_ref(), self.launcher.as_ref(), &self.settings);
        let session_id = channel
            .negotiate(target, purpose, &self.gate.token())
            .await
            .map_err(BastionError::from_channel)?
            .session_id
            .clone();
        let ticket = log.push(UndoAction::CloseChannel { session_id });
        self.checkpoint()?;

        if let Some(local_port) = purpose.local_port() {
            self.notifier.notify(&Notice::Tunnel { local_port });
            if open_viewer {
                // Detached: the handle is dropped and the task outlives this call.
                drop(spawn_viewer(
                    Arc::clone(&self.viewer),
                    local_port,
                    self.settings.viewer_port,
                    self.gate.token(),
                ));
            }
        }

        let report = channel.open(data_plane, &self.gate).await;
        match channel.close().await {
            Ok(()) => log.settle(ticket),
            Err(err) => warn!(error = %err, "session close failed; retrying during cleanup"),
        }
        Ok(report?)
    }
}
