//! Image reference resolution.
//!
//! Resolution is a small pipeline of [`ImageStage`] transitions:
//!
//! ```text
//! Platform(family) --architectures--> FetchParameter(path) --value--> Resolved(id)
//! Parameter(path)  ---------------------------------------^
//! Concrete(id)     ------------------------------------------------> Resolved(id)
//! ```
//!
//! Each transition is a plain function, so unknown architectures, unsupported
//! platform/architecture pairs, and bad parameter values can be tested without
//! a provider.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use super::error::ProvisionError;
use super::spec::LaunchSpecError;
use crate::provider::{ComputeApi, ParameterStore};

/// Prefix shared by concrete image ids.
pub const IMAGE_ID_PREFIX: &str = "ami-";

/// Operating system family addressed by a symbolic image reference.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PlatformFamily {
    /// Amazon Linux 2.
    AmazonLinux,
    /// Windows Server 2019.
    Windows,
}

impl PlatformFamily {
    /// Canonical name accepted on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AmazonLinux => "amazon-linux",
            Self::Windows => "windows",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "amazon-linux" | "amazonlinux" | "amazon-linux-2" | "linux" => Some(Self::AmazonLinux),
            "windows" | "windows-2019" => Some(Self::Windows),
            _ => None,
        }
    }
}

impl fmt::Display for PlatformFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Abstract image reference supplied by the user.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ImageReference {
    /// Already a bootable image id.
    Concrete(String),
    /// Remote parameter path whose value is an image id.
    Parameter(String),
    /// Latest image for a platform family, matched to the instance class.
    Platform(PlatformFamily),
}

impl FromStr for ImageReference {
    type Err = LaunchSpecError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.starts_with(IMAGE_ID_PREFIX) && trimmed.len() > IMAGE_ID_PREFIX.len() {
            return Ok(Self::Concrete(trimmed.to_owned()));
        }
        if trimmed.starts_with('/') && trimmed.len() > 1 {
            return Ok(Self::Parameter(trimmed.to_owned()));
        }
        PlatformFamily::parse(trimmed)
            .map(Self::Platform)
            .ok_or_else(|| LaunchSpecError::InvalidImageReference {
                reference: trimmed.to_owned(),
                reason: String::from(
                    "expected an `ami-` id, a `/` parameter path, `amazon-linux`, or `windows`",
                ),
            })
    }
}

/// Processor architecture of an instance class.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Architecture {
    /// 64-bit x86.
    X86_64,
    /// 64-bit ARM.
    Arm64,
}

impl Architecture {
    /// Provider spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Arm64 => "arm64",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "x86_64" => Some(Self::X86_64),
            "arm64" => Some(Self::Arm64),
            _ => None,
        }
    }
}

/// Parameter path publishing the latest image for a family/architecture.
#[must_use]
pub const fn parameter_path(family: PlatformFamily, arch: Architecture) -> Option<&'static str> {
    match (family, arch) {
        (PlatformFamily::AmazonLinux, Architecture::X86_64) => {
            Some("/aws/service/ami-amazon-linux-latest/amzn2-ami-hvm-x86_64-gp2")
        }
        (PlatformFamily::AmazonLinux, Architecture::Arm64) => {
            Some("/aws/service/ami-amazon-linux-latest/amzn2-ami-hvm-arm64-gp2")
        }
        (PlatformFamily::Windows, Architecture::X86_64) => {
            Some("/aws/service/ami-windows-latest/Windows_Server-2019-English-Full-Base")
        }
        (PlatformFamily::Windows, Architecture::Arm64) => None,
    }
}

/// One step of image resolution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ImageStage {
    /// Resolution is complete.
    Resolved(String),
    /// Read this parameter to obtain the image id.
    FetchParameter(String),
    /// Ask the instance class which architectures it supports.
    DetectArchitecture(PlatformFamily),
}

impl ImageStage {
    /// First stage for a reference.
    #[must_use]
    pub fn start(reference: &ImageReference) -> Self {
        match reference {
            ImageReference::Concrete(id) => Self::Resolved(id.clone()),
            ImageReference::Parameter(path) => Self::FetchParameter(path.clone()),
            ImageReference::Platform(family) => Self::DetectArchitecture(*family),
        }
    }
}

/// Picks the architecture-specific parameter path for `family`.
///
/// x86-64 wins when the class supports both.
///
/// # Errors
///
/// Returns [`ProvisionError::UnsupportedArchitecture`] when the class reports
/// no architecture the family publishes images for.
pub fn after_architecture(
    family: PlatformFamily,
    instance_type: &str,
    reported: &[String],
) -> Result<ImageStage, ProvisionError> {
    let known: Vec<Architecture> = reported
        .iter()
        .filter_map(|arch| Architecture::parse(arch))
        .collect();
    [Architecture::X86_64, Architecture::Arm64]
        .into_iter()
        .filter(|arch| known.contains(arch))
        .find_map(|arch| parameter_path(family, arch))
        .map(|path| ImageStage::FetchParameter(path.to_owned()))
        .ok_or_else(|| ProvisionError::UnsupportedArchitecture {
            platform: family.to_string(),
            instance_type: instance_type.to_owned(),
            architectures: reported.join(", "),
        })
}

/// Accepts a parameter value as the resolved image id.
///
/// # Errors
///
/// Returns [`ProvisionError::InvalidImageReference`] when the value is not an
/// image id.
pub fn after_parameter(path: &str, value: &str) -> Result<ImageStage, ProvisionError> {
    let trimmed = value.trim();
    if trimmed.starts_with(IMAGE_ID_PREFIX) && trimmed.len() > IMAGE_ID_PREFIX.len() {
        Ok(ImageStage::Resolved(trimmed.to_owned()))
    } else {
        Err(ProvisionError::InvalidImageReference {
            reference: path.to_owned(),
            reason: format!("parameter value `{trimmed}` is not an image id"),
        })
    }
}

/// Drives [`ImageStage`] transitions against the provider.
pub struct ImageResolver<'a> {
    compute: &'a dyn ComputeApi,
    parameters: &'a dyn ParameterStore,
}

impl<'a> ImageResolver<'a> {
    /// Creates a resolver over the given ports.
    #[must_use]
    pub fn new(compute: &'a dyn ComputeApi, parameters: &'a dyn ParameterStore) -> Self {
        Self {
            compute,
            parameters,
        }
    }

    /// Resolves `reference` to a concrete image id for `instance_type`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when a transition rejects its input or a
    /// provider call fails.
    pub async fn resolve(
        &self,
        reference: &ImageReference,
        instance_type: &str,
    ) -> Result<String, ProvisionError> {
        let mut stage = ImageStage::start(reference);
        loop {
            debug!(?stage, "image resolution");
            stage = match stage {
                ImageStage::Resolved(id) => return Ok(id),
                ImageStage::DetectArchitecture(family) => {
                    let reported = self
                        .compute
                        .supported_architectures(instance_type)
                        .await
                        .map_err(ProvisionError::from_lookup)?;
                    after_architecture(family, instance_type, &reported)?
                }
                ImageStage::FetchParameter(path) => {
                    let value = self
                        .parameters
                        .get_parameter(&path, false)
                        .await
                        .map_err(|err| {
                            if err.is_not_found() {
                                ProvisionError::InvalidImageReference {
                                    reference: path.clone(),
                                    reason: String::from("parameter does not exist"),
                                }
                            } else {
                                ProvisionError::from_lookup(err)
                            }
                        })?;
                    after_parameter(&path, &value)?
                }
            };
        }
    }
}
