//! Turns a [`LaunchSpec`] into a running, tagged bastion instance.

mod bootstrap;
mod error;
mod image;
mod placement;
mod spec;

use tracing::{debug, info};

use crate::identity::Session;
use crate::provider::{CloudPorts, CreateInstanceRequest};
use crate::select::Selector;

pub use bootstrap::{
    DEFAULT_EXPIRE_AFTER, DEFAULT_SSH_USER, EfsMount, LinuxBootstrap, validate_public_key,
    validate_ssh_user, windows_bootstrap,
};
pub use error::ProvisionError;
pub use image::{
    Architecture, IMAGE_ID_PREFIX, ImageReference, ImageResolver, ImageStage, PlatformFamily,
    after_architecture, after_parameter, parameter_path,
};
pub use placement::{ResolvedPlacement, resolve_placement};
pub use spec::{
    DEFAULT_LINUX_INSTANCE_TYPE, DEFAULT_SECURITY_GROUP, DEFAULT_VOLUME_SIZE_GIB,
    DEFAULT_VOLUME_TYPE, DEFAULT_WINDOWS_INSTANCE_TYPE, LaunchSpec, LaunchSpecBuilder,
    LaunchSpecError, Placement, PricingMode, SecurityGroupChoice, VolumeSpec,
};

/// Lifecycle of the bastion as seen by this tool.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResourceState {
    /// Create call issued.
    Requested,
    /// Provider accepted the request.
    Pending,
    /// Instance reports running.
    Running,
    /// Status checks pass.
    StatusOk,
    /// Instance terminated.
    Terminated,
    /// Instance failed to come up.
    Failed,
}

/// The bastion created for a session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ComputeResource {
    /// Provider instance id.
    pub resource_id: String,
    /// Session that owns the instance.
    pub session: Session,
    /// Last observed state.
    pub state: ResourceState,
}

impl ComputeResource {
    /// Records a newly observed state.
    pub const fn advance(&mut self, state: ResourceState) {
        self.state = state;
    }
}

/// Creates bastion instances.
pub struct Provisioner<'a> {
    cloud: &'a CloudPorts,
    selector: &'a dyn Selector,
}

impl<'a> Provisioner<'a> {
    /// Creates a provisioner over `cloud` that asks `selector` for any
    /// placement left unset.
    #[must_use]
    pub fn new(cloud: &'a CloudPorts, selector: &'a dyn Selector) -> Self {
        Self { cloud, selector }
    }

    /// Ensures the instance profile, resolves the image and placement, then
    /// issues exactly one create call.
    ///
    /// The create call is never retried. A create call that times out is
    /// reported as [`ProvisionError::AmbiguousCreation`]; the instance may or
    /// may not exist and carries the session tag if it does.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when any preparation step or the create
    /// call fails.
    pub async fn provision(
        &self,
        spec: &LaunchSpec,
        session: &Session,
    ) -> Result<ComputeResource, ProvisionError> {
        self.ensure_profile(spec).await?;
        let request = self.prepare(spec, session).await?;
        self.create(&request, session).await
    }

    /// Creates the spec's instance profile when it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when the profile cannot be looked up or
    /// created.
    pub async fn ensure_profile(&self, spec: &LaunchSpec) -> Result<(), ProvisionError> {
        let Some(profile) = &spec.instance_profile else {
            return Ok(());
        };
        debug!(profile, "ensuring instance profile");
        self.cloud
            .identity
            .ensure_instance_profile(profile)
            .await
            .map_err(ProvisionError::from_lookup)
    }

    /// Resolves the image and placement into a create request. Nothing is
    /// created here.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when the image or placement cannot be
    /// resolved.
    pub async fn prepare(
        &self,
        spec: &LaunchSpec,
        session: &Session,
    ) -> Result<CreateInstanceRequest, ProvisionError> {
        let image_id = ImageResolver::new(
            self.cloud.compute.as_ref(),
            self.cloud.parameters.as_ref(),
        )
        .resolve(&spec.image, &spec.instance_type)
        .await?;

        let placement =
            resolve_placement(self.cloud.compute.as_ref(), self.selector, &spec.placement).await?;

        Ok(CreateInstanceRequest {
            image_id,
            instance_type: spec.instance_type.clone(),
            subnet_id: Some(placement.subnet_id),
            security_group_ids: placement.security_group_ids,
            associate_public_ip: spec.associate_public_ip,
            volume: spec.volume.clone(),
            pricing: spec.pricing,
            user_data: spec.bootstrap.clone(),
            instance_profile: spec.instance_profile.clone(),
            key_name: spec.key_name.clone(),
            tags: session.tags(),
        })
    }

    /// Issues the single create call for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::AmbiguousCreation`] when the call did not
    /// report back, or the classified create failure.
    pub async fn create(
        &self,
        request: &CreateInstanceRequest,
        session: &Session,
    ) -> Result<ComputeResource, ProvisionError> {
        info!(
            session_id = %session.id(),
            image_id = request.image_id,
            instance_type = request.instance_type,
            "creating bastion instance"
        );
        let resource_id = self
            .cloud
            .compute
            .run_instance(request)
            .await
            .map_err(|err| ProvisionError::from_create(err, session.id().as_str()))?;
        info!(session_id = %session.id(), instance_id = resource_id, "bastion instance requested");

        Ok(ComputeResource {
            resource_id,
            session: session.clone(),
            state: ResourceState::Pending,
        })
    }
}

#[cfg(test)]
mod tests;
