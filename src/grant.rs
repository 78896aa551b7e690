//! Temporary ingress grants between two security groups.
//!
//! A grant is exactly one rule for one protocol/port/source tuple, carrying a
//! fixed description so it can be told apart from rules that existed before.
//! Revocation removes that tuple and nothing else.

use thiserror::Error;
use tracing::{info, warn};

use crate::provider::{ComputeApi, IngressRule, ProviderError};

/// Description attached to every rule this tool creates.
pub const GRANT_MARKER: &str = "Bastion Port Forward Access";

/// Protocol used for port-forward grants.
pub const GRANT_PROTOCOL: &str = "tcp";

/// An ingress rule created for one session.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct GrantHandle {
    /// Boundary receiving the rule.
    pub target_group_id: String,
    /// Boundary allowed in.
    pub source_group_id: String,
    /// Destination port.
    pub port: u16,
    /// Protocol.
    pub protocol: String,
}

impl GrantHandle {
    /// Provider rule matching this grant.
    #[must_use]
    pub fn rule(&self) -> IngressRule {
        IngressRule {
            group_id: self.target_group_id.clone(),
            source_group_id: self.source_group_id.clone(),
            protocol: self.protocol.clone(),
            port: self.port,
            description: GRANT_MARKER.to_owned(),
        }
    }
}

/// Failures of the grant manager.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GrantError {
    /// An identical rule already exists and was not created by this run.
    #[error("{target} already admits {source_group} on port {port}")]
    AlreadyPermitted {
        /// Boundary receiving the rule.
        target: String,
        /// Boundary allowed in.
        source_group: String,
        /// Destination port.
        port: u16,
    },
    /// The provider refused to add or remove the rule.
    #[error("ingress rule on {target}: {source}")]
    Provider {
        /// Boundary receiving the rule.
        target: String,
        /// Underlying provider error.
        source: ProviderError,
    },
}

/// Adds and removes grants.
pub struct NetworkGrantManager<'a> {
    compute: &'a dyn ComputeApi,
}

impl<'a> NetworkGrantManager<'a> {
    /// Creates a manager over `compute`.
    #[must_use]
    pub fn new(compute: &'a dyn ComputeApi) -> Self {
        Self { compute }
    }

    /// Admits `source` into `target` on TCP `port`.
    ///
    /// # Errors
    ///
    /// Returns [`GrantError::AlreadyPermitted`] when an identical rule exists
    /// (the caller must not revoke it), or [`GrantError::Provider`].
    pub async fn authorize(
        &self,
        target: &str,
        source: &str,
        port: u16,
    ) -> Result<GrantHandle, GrantError> {
        let handle = GrantHandle {
            target_group_id: target.to_owned(),
            source_group_id: source.to_owned(),
            port,
            protocol: GRANT_PROTOCOL.to_owned(),
        };
        match self.compute.authorize_ingress(&handle.rule()).await {
            Ok(()) => {
                info!(group = target, source, port, "ingress granted");
                Ok(handle)
            }
            Err(ProviderError::AlreadyExists { .. }) => Err(GrantError::AlreadyPermitted {
                target: target.to_owned(),
                source_group: source.to_owned(),
                port,
            }),
            Err(source_err) => Err(GrantError::Provider {
                target: target.to_owned(),
                source: source_err,
            }),
        }
    }

    /// Removes the rule described by `handle`. A rule that is already gone
    /// counts as removed.
    ///
    /// # Errors
    ///
    /// Returns [`GrantError::Provider`] when removal fails. Callers log it;
    /// revocation is never retried.
    pub async fn revoke(&self, handle: &GrantHandle) -> Result<(), GrantError> {
        match self.compute.revoke_ingress(&handle.rule()).await {
            Ok(()) => {
                info!(
                    group = handle.target_group_id,
                    source = handle.source_group_id,
                    port = handle.port,
                    "ingress revoked"
                );
                Ok(())
            }
            Err(err) if err.is_not_found() => Ok(()),
            Err(source) => {
                warn!(
                    group = handle.target_group_id,
                    source = handle.source_group_id,
                    port = handle.port,
                    error = %source,
                    "ingress rule left in place"
                );
                Err(GrantError::Provider {
                    target: handle.target_group_id.clone(),
                    source,
                })
            }
        }
    }
}
