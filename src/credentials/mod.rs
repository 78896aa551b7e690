//! Ephemeral key material and the remote secrets that hold it.
//!
//! Key pairs are generated by the provider, which hands the private half out
//! exactly once. The flows persist it immediately as an encrypted parameter
//! under the session's credential handle so the administrator password stays
//! recoverable for as long as the instance is retained.

mod decrypt;

use std::fmt;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::identity::{Session, default_credential_handle, default_key_pair_name};
use crate::provider::{ComputeApi, ParameterStore, ProviderError};
use crate::wait::{PollError, PollPolicy, PollStatus, poll_until};

pub use decrypt::decrypt_remote_password;

/// Failures of the credential manager.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CredentialError {
    /// The provider refused to create or delete a key pair.
    #[error("key pair {key_name}: {source}")]
    KeyPair {
        /// Key pair name.
        key_name: String,
        /// Underlying provider error.
        source: ProviderError,
    },
    /// The parameter store refused a read, write, or delete.
    #[error("secret {handle}: {source}")]
    Store {
        /// Secret handle.
        handle: String,
        /// Underlying provider error.
        source: ProviderError,
    },
    /// No secret exists under the handle.
    #[error("secret {handle} does not exist")]
    SecretNotFound {
        /// Secret handle.
        handle: String,
    },
    /// The private key is not a parseable RSA PEM block.
    #[error("invalid key material: {reason}")]
    InvalidKeyMaterial {
        /// Parser message.
        reason: String,
    },
    /// The platform has not published the encrypted password yet.
    #[error("password data is not available yet")]
    PasswordNotAvailable,
    /// The encrypted password is not valid base64.
    #[error("malformed password data: {reason}")]
    MalformedCiphertext {
        /// Decoder message.
        reason: String,
    },
    /// The key did not decrypt the password.
    #[error("password decryption failed: {reason}")]
    DecryptionFailed {
        /// Decryption message.
        reason: String,
    },
    /// The provider refused to return the encrypted password.
    #[error("password data for {instance_id}: {source}")]
    PasswordData {
        /// Instance queried.
        instance_id: String,
        /// Underlying provider error.
        source: ProviderError,
    },
    /// The password never became available within the retry policy.
    #[error("password for {instance_id} not available after {attempts} attempts")]
    PasswordTimeout {
        /// Instance queried.
        instance_id: String,
        /// Polls performed.
        attempts: u32,
    },
    /// Password retrieval was interrupted.
    #[error("password retrieval cancelled")]
    Cancelled,
}

/// Key material created for one session.
#[derive(Clone, Eq, PartialEq)]
pub struct Credential {
    /// Registered key pair name.
    pub key_name: String,
    /// PEM-encoded private key.
    pub private_key_pem: String,
    /// Handle of the remote secret that stores the private key.
    pub secret_handle: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("key_name", &self.key_name)
            .field("private_key_pem", &"<redacted>")
            .field("secret_handle", &self.secret_handle)
            .finish()
    }
}

/// Creates, stores, and destroys session key material.
pub struct CredentialManager<'a> {
    compute: &'a dyn ComputeApi,
    parameters: &'a dyn ParameterStore,
}

impl<'a> CredentialManager<'a> {
    /// Creates a manager over the given ports.
    #[must_use]
    pub fn new(compute: &'a dyn ComputeApi, parameters: &'a dyn ParameterStore) -> Self {
        Self {
            compute,
            parameters,
        }
    }

    /// Asks the provider for a key pair named after the session.
    ///
    /// The private half is returned once only; persist it with
    /// [`Self::store_secret`] or lose the ability to decrypt the password.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::KeyPair`] when the provider refuses.
    pub async fn create_ephemeral_key_pair(
        &self,
        session: &Session,
    ) -> Result<Credential, CredentialError> {
        let key_name = default_key_pair_name(session.id());
        let created = self
            .compute
            .create_key_pair(&key_name, &session.tags())
            .await
            .map_err(|source| CredentialError::KeyPair {
                key_name: key_name.clone(),
                source,
            })?;
        info!(key_name = created.key_name, "key pair created");
        Ok(Credential {
            key_name: created.key_name,
            private_key_pem: created.private_key_pem,
            secret_handle: default_credential_handle(session.id()),
        })
    }

    /// Stores `value` encrypted under `handle`, tagged with the session.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Store`] when the write fails.
    pub async fn store_secret(
        &self,
        handle: &str,
        value: &str,
        session: &Session,
    ) -> Result<(), CredentialError> {
        self.parameters
            .put_secure_parameter(handle, value, &session.tags())
            .await
            .map_err(|source| CredentialError::Store {
                handle: handle.to_owned(),
                source,
            })?;
        debug!(handle, "secret stored");
        Ok(())
    }

    /// Reads and decrypts the secret under `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::SecretNotFound`] when nothing is stored, or
    /// [`CredentialError::Store`] for other failures.
    pub async fn fetch_secret(&self, handle: &str) -> Result<String, CredentialError> {
        self.parameters
            .get_parameter(handle, true)
            .await
            .map_err(|source| {
                if source.is_not_found() {
                    CredentialError::SecretNotFound {
                        handle: handle.to_owned(),
                    }
                } else {
                    CredentialError::Store {
                        handle: handle.to_owned(),
                        source,
                    }
                }
            })
    }

    /// Deletes the secret under `handle`. Deleting an absent secret succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Store`] when the delete fails for any other
    /// reason.
    pub async fn delete_secret(&self, handle: &str) -> Result<(), CredentialError> {
        match self.parameters.delete_parameter(handle).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                debug!(handle, "secret already absent");
                Ok(())
            }
            Err(source) => Err(CredentialError::Store {
                handle: handle.to_owned(),
                source,
            }),
        }
    }

    /// Deletes a key pair registration. Deleting an absent key pair succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::KeyPair`] when the delete fails for any
    /// other reason.
    pub async fn delete_key_pair(&self, key_name: &str) -> Result<(), CredentialError> {
        match self.compute.delete_key_pair(key_name).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                debug!(key_name, "key pair already absent");
                Ok(())
            }
            Err(source) => Err(CredentialError::KeyPair {
                key_name: key_name.to_owned(),
                source,
            }),
        }
    }

    /// Polls the instance's encrypted password until it is published, then
    /// decrypts it with `private_key_pem`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::PasswordTimeout`] when `policy` runs out,
    /// [`CredentialError::Cancelled`] on interrupt, or the first
    /// non-retryable decryption or provider failure.
    pub async fn await_password(
        &self,
        instance_id: &str,
        private_key_pem: &str,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<String, CredentialError> {
        let compute = self.compute;
        let result = poll_until(policy, cancel, || async move {
            let blob = compute
                .password_data(instance_id)
                .await
                .map_err(|source| CredentialError::PasswordData {
                    instance_id: instance_id.to_owned(),
                    source,
                })?;
            match decrypt_remote_password(private_key_pem, &blob) {
                Ok(password) => Ok(PollStatus::Ready(password)),
                Err(CredentialError::PasswordNotAvailable) => Ok(PollStatus::Pending),
                Err(err) => Err(err),
            }
        })
        .await;

        match result {
            Ok(password) => Ok(password),
            Err(PollError::Check(err)) => Err(err),
            Err(PollError::Exhausted { attempts, .. }) => Err(CredentialError::PasswordTimeout {
                instance_id: instance_id.to_owned(),
                attempts,
            }),
            Err(PollError::Terminal(_) | PollError::Cancelled) => Err(CredentialError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests;
