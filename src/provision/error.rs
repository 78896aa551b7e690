//! Errors raised while provisioning a bastion.

use thiserror::Error;

use crate::provider::ProviderError;
use crate::select::SelectionError;

/// Failures of [`Provisioner::provision`](super::Provisioner::provision).
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// The image reference could not be turned into a bootable image id.
    #[error("invalid image reference `{reference}`: {reason}")]
    InvalidImageReference {
        /// Reference or parameter path involved.
        reference: String,
        /// Why resolution failed.
        reason: String,
    },
    /// The instance class reports no architecture the platform supports.
    #[error("no {platform} image for instance type {instance_type} (architectures: {architectures})")]
    UnsupportedArchitecture {
        /// Platform family requested.
        platform: String,
        /// Instance class requested.
        instance_type: String,
        /// Architectures reported by the provider.
        architectures: String,
    },
    /// No subnet or security group qualifies for the launch.
    #[error("no eligible placement: {reason}")]
    NoEligiblePlacement {
        /// What was missing.
        reason: String,
    },
    /// The provider is out of capacity or the account hit a quota.
    #[error("capacity or quota exhausted: {message}")]
    CapacityOrQuota {
        /// Provider message.
        message: String,
    },
    /// The caller may not launch instances or pass the profile.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Provider message.
        message: String,
    },
    /// The create call did not report back; an instance may exist.
    #[error(
        "instance creation outcome unknown ({message}); run `bastion terminate --session-id {session_id}` to clean up"
    )]
    AmbiguousCreation {
        /// Session whose tag any stray instance carries.
        session_id: String,
        /// Provider message.
        message: String,
    },
    /// The user declined to choose a placement.
    #[error(transparent)]
    Selection(#[from] SelectionError),
    /// Any other provider failure.
    #[error(transparent)]
    Provider(ProviderError),
}

impl ProvisionError {
    /// Maps failures of read-only calls made while preparing the launch.
    #[must_use]
    pub fn from_lookup(err: ProviderError) -> Self {
        match err {
            ProviderError::PermissionDenied { message } => Self::PermissionDenied { message },
            other => Self::Provider(other),
        }
    }

    /// Maps failures of the create call itself.
    #[must_use]
    pub fn from_create(err: ProviderError, session_id: &str) -> Self {
        match err {
            ProviderError::CapacityOrQuota { message } => Self::CapacityOrQuota { message },
            ProviderError::PermissionDenied { message } => Self::PermissionDenied { message },
            ProviderError::Timeout { message } => Self::AmbiguousCreation {
                session_id: session_id.to_owned(),
                message,
            },
            other => Self::Provider(other),
        }
    }
}
