//! Values exchanged with provider ports.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::provision::{PricingMode, VolumeSpec};

/// Lifecycle state reported for an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstanceState {
    /// Starting up.
    Pending,
    /// Running.
    Running,
    /// Terminating.
    ShuttingDown,
    /// Gone.
    Terminated,
    /// Stopping.
    Stopping,
    /// Stopped.
    Stopped,
    /// Any state this tool does not model.
    Other(String),
}

impl InstanceState {
    /// Returns `true` for states from which the instance never becomes ready.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ShuttingDown | Self::Terminated | Self::Stopping | Self::Stopped
        )
    }
}

impl From<&str> for InstanceState {
    fn from(value: &str) -> Self {
        match value {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "shutting-down" => Self::ShuttingDown,
            "terminated" => Self::Terminated,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Other(other) => other.as_str(),
        };
        f.write_str(text)
    }
}

/// Result of an instance or system status check.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StatusCheck {
    /// Check passed.
    Ok,
    /// Check still running.
    Initializing,
    /// Check failed.
    Impaired,
    /// Not enough data yet.
    InsufficientData,
    /// Check does not apply to this state.
    NotApplicable,
    /// Unmodelled status.
    Other(String),
}

impl From<&str> for StatusCheck {
    fn from(value: &str) -> Self {
        match value {
            "ok" => Self::Ok,
            "initializing" => Self::Initializing,
            "impaired" => Self::Impaired,
            "insufficient-data" => Self::InsufficientData,
            "not-applicable" => Self::NotApplicable,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// Snapshot used by the readiness waiter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceHealth {
    /// Lifecycle state.
    pub state: InstanceState,
    /// Instance reachability check.
    pub instance_status: StatusCheck,
    /// Host system check.
    pub system_status: StatusCheck,
}

/// Subset of instance attributes the flows rely on.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceDescription {
    /// Instance id.
    pub instance_id: String,
    /// Lifecycle state name.
    pub state: String,
    /// Attached security group ids.
    pub security_group_ids: Vec<String>,
    /// Instance tags.
    pub tags: HashMap<String, String>,
}

/// Candidate network placement.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Subnet {
    /// Subnet id.
    pub subnet_id: String,
    /// Parent network id.
    pub vpc_id: String,
    /// Availability zone.
    pub availability_zone: String,
    /// Free addresses left in the subnet.
    pub available_ips: u64,
    /// Provider state, `available` when usable.
    pub state: String,
    /// Value of the `Name` tag, if any.
    pub name: Option<String>,
}

impl Subnet {
    /// Returns `true` when an instance could be placed here.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        self.state == "available" && self.available_ips > 0
    }

    /// One-line label used in selection prompts.
    #[must_use]
    pub fn label(&self) -> String {
        let name = self.name.as_deref().unwrap_or("-");
        format!(
            "{} ({}, {}, {}, {} free)",
            self.subnet_id, name, self.vpc_id, self.availability_zone, self.available_ips
        )
    }
}

/// Network security boundary.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SecurityGroup {
    /// Group id.
    pub group_id: String,
    /// Group name.
    pub name: String,
    /// Group description.
    pub description: String,
}

impl SecurityGroup {
    /// One-line label used in selection prompts.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} ({}: {})", self.group_id, self.name, self.description)
    }
}

/// A single ingress rule between two security groups.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct IngressRule {
    /// Group receiving the rule.
    pub group_id: String,
    /// Group allowed to connect.
    pub source_group_id: String,
    /// Protocol, for example `tcp`.
    pub protocol: String,
    /// Destination port.
    pub port: u16,
    /// Marker identifying rules created by this tool.
    pub description: String,
}

/// Everything needed for one instance create call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateInstanceRequest {
    /// Concrete bootable image id.
    pub image_id: String,
    /// Instance class.
    pub instance_type: String,
    /// Subnet to launch into.
    pub subnet_id: Option<String>,
    /// Security groups; empty selects the network default.
    pub security_group_ids: Vec<String>,
    /// Whether to associate a public address.
    pub associate_public_ip: bool,
    /// Root volume.
    pub volume: VolumeSpec,
    /// Spot or on-demand.
    pub pricing: PricingMode,
    /// Bootstrap script passed as user data.
    pub user_data: String,
    /// Instance profile granting the broker agent its permissions.
    pub instance_profile: Option<String>,
    /// Key pair used to encrypt the administrator password.
    pub key_name: Option<String>,
    /// Tags for the instance and its volumes.
    pub tags: Vec<(String, String)>,
}

/// Private half of a provider-generated key pair.
#[derive(Clone, Eq, PartialEq)]
pub struct CreatedKeyPair {
    /// Registered key name.
    pub key_name: String,
    /// PEM-encoded private key. Returned once only.
    pub private_key_pem: String,
}

impl fmt::Debug for CreatedKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreatedKeyPair")
            .field("key_name", &self.key_name)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

/// Parameters for a broker session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StartSessionRequest {
    /// Target instance id.
    pub target: String,
    /// Document name; `None` opens the default shell.
    pub document: Option<String>,
    /// Document parameters.
    pub parameters: BTreeMap<String, Vec<String>>,
}

/// Handle returned by the broker for a started session.
#[derive(Clone, Eq, PartialEq)]
pub struct BrokerSession {
    /// Broker session id.
    pub session_id: String,
    /// Signed token authorising the data plane.
    pub token_value: String,
    /// Websocket URL for the data plane.
    pub stream_url: String,
    /// Service endpoint that issued the session.
    pub endpoint: String,
}

impl fmt::Debug for BrokerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerSession")
            .field("session_id", &self.session_id)
            .field("token_value", &"<redacted>")
            .field("stream_url", &self.stream_url)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Managed database reachable through a bastion.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DatabaseTarget {
    /// Database identifier.
    pub identifier: String,
    /// Engine name.
    pub engine: String,
    /// Endpoint address.
    pub address: String,
    /// Endpoint port.
    pub port: u16,
    /// Security groups guarding the database.
    pub security_group_ids: Vec<String>,
}

impl DatabaseTarget {
    /// One-line label used in selection prompts.
    #[must_use]
    pub fn label(&self) -> String {
        format!(
            "{} ({}, {}:{})",
            self.identifier, self.engine, self.address, self.port
        )
    }
}

/// Instance whose broker agent reports online.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ManagedInstance {
    /// Instance id.
    pub instance_id: String,
    /// Host name reported by the agent.
    pub computer_name: Option<String>,
    /// Operating system reported by the agent.
    pub platform: Option<String>,
}

impl ManagedInstance {
    /// One-line label used in selection prompts.
    #[must_use]
    pub fn label(&self) -> String {
        format!(
            "{} ({}, {})",
            self.instance_id,
            self.computer_name.as_deref().unwrap_or("-"),
            self.platform.as_deref().unwrap_or("-")
        )
    }
}
