//! Declarative launch specification and its validating builder.

use std::str::FromStr;

use thiserror::Error;

use super::image::ImageReference;

/// Instance class used for Linux bastions when none is given.
pub const DEFAULT_LINUX_INSTANCE_TYPE: &str = "t3.micro";
/// Instance class used for Windows bastions when none is given.
pub const DEFAULT_WINDOWS_INSTANCE_TYPE: &str = "t3.small";
/// Root volume size in GiB when none is given.
pub const DEFAULT_VOLUME_SIZE_GIB: u32 = 8;
/// Root volume type when none is given.
pub const DEFAULT_VOLUME_TYPE: &str = "gp2";
/// Literal selecting the network's default security group.
pub const DEFAULT_SECURITY_GROUP: &str = "default";

const VOLUME_TYPES: &[&str] = &["gp2", "gp3", "io1", "io2", "st1", "sc1", "standard"];
const MAX_VOLUME_SIZE_GIB: u32 = 16_384;

/// Errors raised while assembling a [`LaunchSpec`]. No remote call has been
/// made when one of these is returned.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LaunchSpecError {
    /// The image reference is neither an image id, a parameter path, nor a
    /// known platform name.
    #[error("invalid image reference `{reference}`: {reason}")]
    InvalidImageReference {
        /// Reference as supplied.
        reference: String,
        /// Why it was rejected.
        reason: String,
    },
    /// A field is missing or malformed.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Root volume settings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeSpec {
    /// Size in GiB.
    pub size_gib: u32,
    /// Provider volume type, for example `gp2`.
    pub volume_type: String,
    /// Whether the volume is encrypted at rest.
    pub encrypted: bool,
}

impl Default for VolumeSpec {
    fn default() -> Self {
        Self {
            size_gib: DEFAULT_VOLUME_SIZE_GIB,
            volume_type: DEFAULT_VOLUME_TYPE.to_owned(),
            encrypted: true,
        }
    }
}

/// Purchasing option for the instance.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PricingMode {
    /// One-time spot request that terminates on interruption.
    #[default]
    Spot,
    /// Regular on-demand capacity.
    OnDemand,
}

/// Security group selection.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum SecurityGroupChoice {
    /// Ask the user to choose among the placement network's groups.
    #[default]
    Unset,
    /// Use the network's default group.
    NetworkDefault,
    /// Use this group.
    Explicit(String),
}

/// Where the instance is launched.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Placement {
    /// Subnet, or `None` to choose interactively.
    pub subnet_id: Option<String>,
    /// Security group selection.
    pub security_group: SecurityGroupChoice,
}

/// Everything the provisioner needs to create one bastion. Never mutated
/// after construction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchSpec {
    /// Image to boot.
    pub image: ImageReference,
    /// Instance class.
    pub instance_type: String,
    /// Network placement.
    pub placement: Placement,
    /// Whether to associate a public address.
    pub associate_public_ip: bool,
    /// Root volume.
    pub volume: VolumeSpec,
    /// Purchasing option.
    pub pricing: PricingMode,
    /// Bootstrap script.
    pub bootstrap: String,
    /// Instance profile binding the broker agent's identity.
    pub instance_profile: Option<String>,
    /// Key pair used to encrypt the administrator password.
    pub key_name: Option<String>,
}

impl LaunchSpec {
    /// Starts a builder for a [`LaunchSpec`].
    #[must_use]
    pub fn builder() -> LaunchSpecBuilder {
        LaunchSpecBuilder::new()
    }

    /// Returns a copy of this spec that registers `key_name` on the instance.
    #[must_use]
    pub fn with_key_name(&self, key_name: impl Into<String>) -> Self {
        Self {
            key_name: Some(key_name.into()),
            ..self.clone()
        }
    }
}

/// Builder for [`LaunchSpec`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LaunchSpecBuilder {
    image: String,
    instance_type: String,
    subnet_id: Option<String>,
    security_group: Option<String>,
    private: bool,
    volume: VolumeSpec,
    pricing: PricingMode,
    bootstrap: String,
    instance_profile: Option<String>,
}

impl LaunchSpecBuilder {
    /// Creates a builder with default volume and spot pricing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the image reference.
    #[must_use]
    pub fn image(mut self, value: impl Into<String>) -> Self {
        self.image = value.into();
        self
    }

    /// Sets the instance class.
    #[must_use]
    pub fn instance_type(mut self, value: impl Into<String>) -> Self {
        self.instance_type = value.into();
        self
    }

    /// Sets the subnet, leaving it unset when `None`.
    #[must_use]
    pub fn subnet_id(mut self, value: Option<String>) -> Self {
        self.subnet_id = value;
        self
    }

    /// Sets the security group id, or `default` for the network default.
    #[must_use]
    pub fn security_group(mut self, value: Option<String>) -> Self {
        self.security_group = value;
        self
    }

    /// Suppresses the public address.
    #[must_use]
    pub const fn private(mut self, value: bool) -> Self {
        self.private = value;
        self
    }

    /// Sets the root volume.
    #[must_use]
    pub fn volume(mut self, value: VolumeSpec) -> Self {
        self.volume = value;
        self
    }

    /// Sets the purchasing option.
    #[must_use]
    pub const fn pricing(mut self, value: PricingMode) -> Self {
        self.pricing = value;
        self
    }

    /// Sets the bootstrap script.
    #[must_use]
    pub fn bootstrap(mut self, value: impl Into<String>) -> Self {
        self.bootstrap = value.into();
        self
    }

    /// Sets the instance profile name.
    #[must_use]
    pub fn instance_profile(mut self, value: Option<String>) -> Self {
        self.instance_profile = value;
        self
    }

    /// Builds and validates the [`LaunchSpec`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchSpecError`] when any field is missing or malformed.
    pub fn build(self) -> Result<LaunchSpec, LaunchSpecError> {
        let image = ImageReference::from_str(self.image.trim())?;

        let instance_type = self.instance_type.trim().to_owned();
        if instance_type.is_empty() {
            return Err(invalid("instance_type", "must not be empty"));
        }

        let subnet_id = non_blank(self.subnet_id);
        if let Some(subnet) = subnet_id.as_deref()
            && !subnet.starts_with("subnet-")
        {
            return Err(invalid("subnet_id", "expected an id starting with `subnet-`"));
        }

        let security_group = match non_blank(self.security_group) {
            None => SecurityGroupChoice::Unset,
            Some(group) if group == DEFAULT_SECURITY_GROUP => SecurityGroupChoice::NetworkDefault,
            Some(group) if group.starts_with("sg-") => SecurityGroupChoice::Explicit(group),
            Some(_) => {
                return Err(invalid(
                    "security_group_id",
                    "expected an id starting with `sg-` or `default`",
                ));
            }
        };

        let volume_type = self.volume.volume_type.trim().to_owned();
        if !VOLUME_TYPES.contains(&volume_type.as_str()) {
            return Err(invalid(
                "volume_type",
                &format!("expected one of {}", VOLUME_TYPES.join(", ")),
            ));
        }
        if self.volume.size_gib == 0 || self.volume.size_gib > MAX_VOLUME_SIZE_GIB {
            return Err(invalid(
                "volume_size",
                &format!("must be between 1 and {MAX_VOLUME_SIZE_GIB} GiB"),
            ));
        }

        if self.bootstrap.trim().is_empty() {
            return Err(invalid("bootstrap", "must not be empty"));
        }

        Ok(LaunchSpec {
            image,
            instance_type,
            placement: Placement {
                subnet_id,
                security_group,
            },
            associate_public_ip: !self.private,
            volume: VolumeSpec {
                volume_type,
                ..self.volume
            },
            pricing: self.pricing,
            bootstrap: self.bootstrap,
            instance_profile: non_blank(self.instance_profile),
            key_name: None,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|inner| inner.trim().to_owned())
        .filter(|inner| !inner.is_empty())
}

fn invalid(field: &'static str, reason: &str) -> LaunchSpecError {
    LaunchSpecError::InvalidField {
        field,
        reason: reason.to_owned(),
    }
}
