//! Ports to the cloud control plane.
//!
//! Every remote collaborator the orchestrator needs is expressed as a trait
//! returning boxed futures, so the AWS adapter and the in-memory fakes used
//! in tests are interchangeable. All calls are treated as fallible and
//! potentially slow.

mod types;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

pub use types::{
    BrokerSession, CreateInstanceRequest, CreatedKeyPair, DatabaseTarget, IngressRule,
    InstanceDescription, InstanceHealth, InstanceState, ManagedInstance, SecurityGroup,
    StartSessionRequest, StatusCheck, Subnet,
};

/// Boxed future type returned by provider trait methods.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Failures reported by any provider port.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// The addressed resource does not exist (or no longer exists).
    #[error("not found: {message}")]
    NotFound {
        /// Provider message.
        message: String,
    },
    /// The resource already exists with the requested shape.
    #[error("already exists: {message}")]
    AlreadyExists {
        /// Provider message.
        message: String,
    },
    /// The target's in-band agent has not registered with the broker yet.
    #[error("target is not connected to the session broker: {message}")]
    TargetNotConnected {
        /// Provider message.
        message: String,
    },
    /// The caller is not allowed to perform the operation.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Provider message.
        message: String,
    },
    /// Capacity is exhausted or an account quota was hit.
    #[error("capacity or quota exhausted: {message}")]
    CapacityOrQuota {
        /// Provider message.
        message: String,
    },
    /// The call did not complete in time; its effect is unknown.
    #[error("request outcome unknown: {message}")]
    Timeout {
        /// Description of the interrupted call.
        message: String,
    },
    /// Any other error code returned by the provider.
    #[error("{code}: {message}")]
    Api {
        /// Provider error code.
        code: String,
        /// Provider message.
        message: String,
    },
    /// The provider could not be reached at all.
    #[error("failed to reach {endpoint}: {message}")]
    Transport {
        /// Program or URL that was being invoked.
        endpoint: String,
        /// Underlying error text.
        message: String,
    },
    /// A response arrived but could not be interpreted.
    #[error("failed to parse {resource} response: {message}")]
    Parse {
        /// Resource or operation being parsed.
        resource: String,
        /// Parser error message.
        message: String,
    },
}

impl ProviderError {
    /// Returns `true` when the error reports a missing resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` when the broker reported an unregistered target.
    #[must_use]
    pub const fn is_target_not_connected(&self) -> bool {
        matches!(self, Self::TargetNotConnected { .. })
    }
}

/// Compute control plane: instances, placement, firewall rules, key pairs.
pub trait ComputeApi: Send + Sync {
    /// Issues exactly one create call and returns the new instance id.
    fn run_instance<'a>(&'a self, request: &'a CreateInstanceRequest) -> ProviderFuture<'a, String>;

    /// Describes an instance, returning `None` when it is unknown.
    fn describe_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, Option<InstanceDescription>>;

    /// Reports lifecycle state and status checks for an instance.
    fn describe_health<'a>(&'a self, instance_id: &'a str)
    -> ProviderFuture<'a, Option<InstanceHealth>>;

    /// Requests termination of an instance.
    fn terminate_instance<'a>(&'a self, instance_id: &'a str) -> ProviderFuture<'a, ()>;

    /// Lists the processor architectures an instance class supports.
    fn supported_architectures<'a>(
        &'a self,
        instance_type: &'a str,
    ) -> ProviderFuture<'a, Vec<String>>;

    /// Lists the subnets visible to the caller.
    fn list_subnets(&self) -> ProviderFuture<'_, Vec<Subnet>>;

    /// Describes a single subnet.
    fn describe_subnet<'a>(&'a self, subnet_id: &'a str) -> ProviderFuture<'a, Subnet>;

    /// Lists the security groups belonging to a network.
    fn list_security_groups<'a>(&'a self, vpc_id: &'a str)
    -> ProviderFuture<'a, Vec<SecurityGroup>>;

    /// Adds exactly one ingress rule.
    fn authorize_ingress<'a>(&'a self, rule: &'a IngressRule) -> ProviderFuture<'a, ()>;

    /// Removes exactly one ingress rule, matched by its tuple.
    fn revoke_ingress<'a>(&'a self, rule: &'a IngressRule) -> ProviderFuture<'a, ()>;

    /// Asks the provider to generate a key pair and returns the private half.
    fn create_key_pair<'a>(
        &'a self,
        key_name: &'a str,
        tags: &'a [(String, String)],
    ) -> ProviderFuture<'a, CreatedKeyPair>;

    /// Deletes a key pair registration.
    fn delete_key_pair<'a>(&'a self, key_name: &'a str) -> ProviderFuture<'a, ()>;

    /// Returns the encrypted administrator password blob, empty until ready.
    fn password_data<'a>(&'a self, instance_id: &'a str) -> ProviderFuture<'a, String>;

    /// Finds the live instance tagged with `session_id`.
    fn find_session_instance<'a>(
        &'a self,
        session_id: &'a str,
    ) -> ProviderFuture<'a, Option<String>>;
}

/// Remote key/value store with at-rest encryption.
pub trait ParameterStore: Send + Sync {
    /// Reads a parameter, optionally decrypting it.
    fn get_parameter<'a>(&'a self, name: &'a str, decrypt: bool) -> ProviderFuture<'a, String>;

    /// Writes an encrypted parameter. Never overwrites an existing one.
    fn put_secure_parameter<'a>(
        &'a self,
        name: &'a str,
        value: &'a str,
        tags: &'a [(String, String)],
    ) -> ProviderFuture<'a, ()>;

    /// Deletes a parameter.
    fn delete_parameter<'a>(&'a self, name: &'a str) -> ProviderFuture<'a, ()>;
}

/// Managed session broker.
pub trait SessionBroker: Send + Sync {
    /// Starts a session against a target and returns its data-plane handle.
    fn start_session<'a>(
        &'a self,
        request: &'a StartSessionRequest,
    ) -> ProviderFuture<'a, BrokerSession>;

    /// Terminates a broker session.
    fn terminate_session<'a>(&'a self, session_id: &'a str) -> ProviderFuture<'a, ()>;
}

/// Caller identity and the instance identity-binding profile.
pub trait IdentityService: Send + Sync {
    /// Resolves the caller identity as an opaque tag value.
    fn caller_identity(&self) -> ProviderFuture<'_, String>;

    /// Makes sure the named instance profile exists, creating it if needed.
    fn ensure_instance_profile<'a>(&'a self, profile_name: &'a str) -> ProviderFuture<'a, ()>;
}

/// Discovery of connection targets that are not created by this tool.
pub trait TargetDirectory: Send + Sync {
    /// Lists managed databases that can be reached through a bastion.
    fn list_databases(&self) -> ProviderFuture<'_, Vec<DatabaseTarget>>;

    /// Lists instances whose broker agent is online.
    fn list_managed_instances(&self) -> ProviderFuture<'_, Vec<ManagedInstance>>;
}

/// Bundle of every port, shared by the orchestrator and its components.
#[derive(Clone)]
pub struct CloudPorts {
    /// Compute control plane.
    pub compute: Arc<dyn ComputeApi>,
    /// Parameter store.
    pub parameters: Arc<dyn ParameterStore>,
    /// Session broker.
    pub broker: Arc<dyn SessionBroker>,
    /// Identity service.
    pub identity: Arc<dyn IdentityService>,
    /// Target directory.
    pub directory: Arc<dyn TargetDirectory>,
}

impl CloudPorts {
    /// Uses a single provider value for every port.
    pub fn from_provider<P>(provider: Arc<P>) -> Self
    where
        P: ComputeApi + ParameterStore + SessionBroker + IdentityService + TargetDirectory + 'static,
    {
        Self {
            compute: provider.clone(),
            parameters: provider.clone(),
            broker: provider.clone(),
            identity: provider.clone(),
            directory: provider,
        }
    }
}
