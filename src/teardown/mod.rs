//! Compensation of everything a flow created.
//!
//! Each forward step that creates a remote resource records the inverse
//! action in the [`UndoLog`] immediately after the create call succeeds.
//! The [`TeardownCoordinator`] replays the log in reverse, isolating each
//! action so one failure never prevents the rest from running, and treats
//! "already gone" as success.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::channel::close_session;
use crate::credentials::CredentialManager;
use crate::grant::{GrantHandle, NetworkGrantManager};
use crate::provider::CloudPorts;

/// Inverse of one create step.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UndoAction {
    /// Terminate a provisioned instance.
    TerminateInstance {
        /// Instance id.
        instance_id: String,
    },
    /// Remove an ingress grant.
    RevokeGrant(GrantHandle),
    /// Delete a key pair registration.
    DeleteKeyPair {
        /// Key pair name.
        key_name: String,
    },
    /// Delete a stored secret.
    DeleteSecret {
        /// Secret handle.
        handle: String,
    },
    /// Terminate a broker session.
    CloseChannel {
        /// Broker session id.
        session_id: String,
    },
}

impl UndoAction {
    /// Short name of the action.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TerminateInstance { .. } => "terminate-instance",
            Self::RevokeGrant(_) => "revoke-grant",
            Self::DeleteKeyPair { .. } => "delete-key-pair",
            Self::DeleteSecret { .. } => "delete-secret",
            Self::CloseChannel { .. } => "close-channel",
        }
    }

    /// Identifier of the resource the action targets.
    #[must_use]
    pub fn resource_id(&self) -> String {
        match self {
            Self::TerminateInstance { instance_id } => instance_id.clone(),
            Self::RevokeGrant(grant) => format!(
                "{}<-{}:{}/{}",
                grant.target_group_id, grant.source_group_id, grant.port, grant.protocol
            ),
            Self::DeleteKeyPair { key_name } => key_name.clone(),
            Self::DeleteSecret { handle } => handle.clone(),
            Self::CloseChannel { session_id } => session_id.clone(),
        }
    }
}

impl fmt::Display for UndoAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.resource_id())
    }
}

/// Whether the instance and its secret survive teardown.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TerminationPolicy {
    /// Compensate everything.
    #[default]
    Terminate,
    /// Keep the instance and its stored secret; compensate the rest.
    Retain,
}

impl TerminationPolicy {
    const fn skips(self, action: &UndoAction) -> bool {
        matches!(
            (self, action),
            (
                Self::Retain,
                UndoAction::TerminateInstance { .. } | UndoAction::DeleteSecret { .. }
            )
        )
    }
}

/// Receipt for an undo entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UndoTicket(usize);

#[derive(Clone, Debug)]
struct UndoEntry {
    action: UndoAction,
    settled: bool,
}

/// Ordered record of compensations, shared by the steps of one flow.
#[derive(Clone, Debug, Default)]
pub struct UndoLog {
    entries: Arc<Mutex<Vec<UndoEntry>>>,
}

impl UndoLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `action` after the resource it undoes has been created.
    pub fn push(&self, action: UndoAction) -> UndoTicket {
        debug!(%action, "undo recorded");
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.push(UndoEntry {
            action,
            settled: false,
        });
        UndoTicket(entries.len().saturating_sub(1))
    }

    /// Marks an entry as already compensated by the forward flow.
    pub fn settle(&self, ticket: UndoTicket) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(ticket.0) {
            entry.settled = true;
        }
    }

    /// Every recorded action in creation order.
    #[must_use]
    pub fn actions(&self) -> Vec<UndoAction> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|entry| entry.action.clone())
            .collect()
    }

    /// Number of recorded actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<UndoEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// One action that could not be completed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TeardownFailure {
    /// The action attempted.
    pub action: UndoAction,
    /// Why it failed.
    pub message: String,
}

impl fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.action, self.message)
    }
}

/// Outcome of replaying an undo log.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TeardownReport {
    /// Actions that succeeded or whose resource was already gone.
    pub completed: Vec<UndoAction>,
    /// Actions left alone by the termination policy.
    pub skipped: Vec<UndoAction>,
    /// Actions that failed; the resource may still exist.
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    /// Returns `true` when no action failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Replays undo logs.
#[derive(Clone, Copy, Debug, Default)]
pub struct TeardownCoordinator {
    policy: TerminationPolicy,
}

impl TeardownCoordinator {
    /// Creates a coordinator applying `policy`.
    #[must_use]
    pub const fn new(policy: TerminationPolicy) -> Self {
        Self { policy }
    }

    /// Runs every outstanding action in `log`, newest first.
    pub async fn unwind(&self, log: &UndoLog, ports: &CloudPorts) -> TeardownReport {
        let mut report = TeardownReport::default();
        for entry in log.snapshot().into_iter().rev() {
            let action = entry.action;
            if entry.settled {
                report.completed.push(action);
                continue;
            }
            if self.policy.skips(&action) {
                info!(%action, "retained");
                report.skipped.push(action);
                continue;
            }
            match execute(&action, ports).await {
                Ok(()) => {
                    debug!(%action, "compensated");
                    report.completed.push(action);
                }
                Err(message) => {
                    warn!(%action, error = message, "compensation failed");
                    report.failures.push(TeardownFailure { action, message });
                }
            }
        }
        report
    }
}

async fn execute(action: &UndoAction, ports: &CloudPorts) -> Result<(), String> {
    match action {
        UndoAction::TerminateInstance { instance_id } => {
            match ports.compute.terminate_instance(instance_id).await {
                Ok(()) => {
                    info!(instance_id, "instance terminated");
                    Ok(())
                }
                Err(err) if err.is_not_found() => Ok(()),
                Err(err) => Err(err.to_string()),
            }
        }
        UndoAction::RevokeGrant(grant) => NetworkGrantManager::new(ports.compute.as_ref())
            .revoke(grant)
            .await
            .map_err(|err| err.to_string()),
        UndoAction::DeleteKeyPair { key_name } => {
            CredentialManager::new(ports.compute.as_ref(), ports.parameters.as_ref())
                .delete_key_pair(key_name)
                .await
                .map_err(|err| err.to_string())
        }
        UndoAction::DeleteSecret { handle } => {
            CredentialManager::new(ports.compute.as_ref(), ports.parameters.as_ref())
                .delete_secret(handle)
                .await
                .map_err(|err| err.to_string())
        }
        UndoAction::CloseChannel { session_id } => close_session(ports.broker.as_ref(), session_id)
            .await
            .map_err(|err| err.to_string()),
    }
}
