//! Errors that abort a command flow.

use thiserror::Error;

use crate::channel::ChannelError;
use crate::credentials::CredentialError;
use crate::grant::GrantError;
use crate::provider::ProviderError;
use crate::provision::{LaunchSpecError, ProvisionError};
use crate::select::SelectionError;
use crate::wait::WaitError;

/// Failures of a command flow. Teardown has already run when a caller sees
/// one of these.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BastionError {
    /// Local input was rejected before any remote call.
    #[error("invalid input: {message}")]
    Validation {
        /// What was wrong.
        message: String,
    },
    /// The bastion could not be created.
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    /// The bastion did not reach a condition within its budget.
    #[error("instance {instance_id} was not {condition} after {attempts} checks ({elapsed_secs}s)")]
    ReadinessTimeout {
        /// Instance waited on.
        instance_id: String,
        /// Condition that never held.
        condition: &'static str,
        /// Polls performed.
        attempts: u32,
        /// Seconds spent waiting.
        elapsed_secs: u64,
    },
    /// Waiting stopped early.
    #[error(transparent)]
    Readiness(#[from] WaitError),
    /// Key material or the password could not be produced.
    #[error(transparent)]
    Credential(#[from] CredentialError),
    /// The database ingress grant could not be created.
    #[error(transparent)]
    Grant(#[from] GrantError),
    /// The session could not be established or run.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// A supporting provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// No live instance carries the session tag.
    #[error("no running instance found for session {session_id}")]
    SessionNotFound {
        /// Session looked up.
        session_id: String,
    },
    /// There is nothing to choose from.
    #[error("no {kind} available")]
    NoTargets {
        /// Kind of target that was listed.
        kind: &'static str,
    },
    /// The flow was interrupted.
    #[error("interrupted")]
    Interrupted,
    /// The user declined a selection.
    #[error(transparent)]
    Selection(#[from] SelectionError),
}

impl From<LaunchSpecError> for BastionError {
    fn from(value: LaunchSpecError) -> Self {
        Self::Validation {
            message: value.to_string(),
        }
    }
}

impl BastionError {
    /// Builds a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Converts a password wait failure; a wait cut short by an interrupt
    /// is [`Self::Interrupted`].
    pub(crate) fn from_password_wait(err: CredentialError) -> Self {
        match err {
            CredentialError::Cancelled => Self::Interrupted,
            other => Self::Credential(other),
        }
    }

    /// Converts a channel failure; a negotiation cut short by an interrupt
    /// is [`Self::Interrupted`].
    pub(crate) fn from_channel(err: ChannelError) -> Self {
        match err {
            ChannelError::Cancelled { .. } => Self::Interrupted,
            other => Self::Channel(other),
        }
    }
}
