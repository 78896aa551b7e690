//! Session identity and the naming conventions derived from it.
//!
//! A session id is the only thing that ties remote resources back to the run
//! that created them, so every name and tag below is a pure function of it.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Prefix shared by every resource name the tool creates.
pub const RESOURCE_PREFIX: &str = "bastion-";

/// Tag key holding the resource's human-readable name.
pub const TAG_NAME: &str = "Name";
/// Tag key holding the session id; also used as a lookup filter.
pub const TAG_SESSION_ID: &str = "bastion:session-id";
/// Tag key holding the identity of the caller who launched the session.
pub const TAG_LAUNCHED_BY: &str = "bastion:launched-by";
/// Tag key holding the configured self-expiry in minutes.
pub const TAG_EXPIRE_AFTER: &str = "bastion:expire-after";
/// Tag key holding the RFC 3339 instant at which the bastion halts itself.
pub const TAG_EXPIRE: &str = "bastion:expire";

/// Opaque, randomly generated session identifier.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an identifier supplied by the user, for example on `terminate`.
    ///
    /// Returns `None` when the value is blank.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_owned()))
        }
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns a new random session id.
#[must_use]
pub fn new_session_id() -> SessionId {
    SessionId::generate()
}

/// Path of the remote secret holding key material for `id`.
#[must_use]
pub fn default_credential_handle(id: &SessionId) -> String {
    format!("/bastion/{id}")
}

/// Name given to the compute resource created for `id`.
#[must_use]
pub fn default_resource_name(id: &SessionId) -> String {
    format!("{RESOURCE_PREFIX}{id}")
}

/// Name of the provider key pair registered for `id`.
#[must_use]
pub fn default_key_pair_name(id: &SessionId) -> String {
    default_resource_name(id)
}

/// One invocation of the tool. Immutable once created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Session {
    id: SessionId,
    created_by: String,
    expiry: Option<Duration>,
    started_at: DateTime<Utc>,
}

impl Session {
    /// Starts a session for the caller identified by `created_by`.
    #[must_use]
    pub fn new(id: SessionId, created_by: impl Into<String>, expiry: Option<Duration>) -> Self {
        Self {
            id,
            created_by: created_by.into(),
            expiry,
            started_at: Utc::now(),
        }
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// Caller identity recorded on created resources.
    #[must_use]
    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    /// Self-expiry requested for the bastion, if any.
    #[must_use]
    pub const fn expiry(&self) -> Option<Duration> {
        self.expiry
    }

    /// Tags applied to every resource created for this session.
    #[must_use]
    pub fn tags(&self) -> Vec<(String, String)> {
        let mut tags = vec![
            (TAG_NAME.to_owned(), default_resource_name(&self.id)),
            (TAG_SESSION_ID.to_owned(), self.id.to_string()),
            (TAG_LAUNCHED_BY.to_owned(), self.created_by.clone()),
        ];
        if let Some(expiry) = self.expiry {
            let minutes = expiry.as_secs().div_euclid(60);
            tags.push((TAG_EXPIRE_AFTER.to_owned(), minutes.to_string()));
            if let Ok(delta) = chrono::Duration::from_std(expiry) {
                let halt_at = self.started_at + delta;
                tags.push((TAG_EXPIRE.to_owned(), halt_at.to_rfc3339()));
            }
        }
        tags
    }
}
