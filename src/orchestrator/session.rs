//! `start-session`: connect to an instance that already exists.

use tracing::{info, warn};

use super::{
    BastionError, ConnectMode, ConnectRequest, FlowReport, Notice, Orchestrator, SessionSummary,
    TargetSelector,
};
use crate::channel::{DataPlane, RDP_PORT, SessionPurpose, random_local_port};
use crate::credentials::CredentialManager;
use crate::identity::{SessionId, TAG_SESSION_ID, default_credential_handle};
use crate::teardown::{TerminationPolicy, UndoLog};

impl Orchestrator {
    /// Opens a session on an existing instance. Nothing but the broker
    /// session is created, so teardown only closes that.
    pub async fn start_session(&self, request: &ConnectRequest) -> FlowReport {
        let log = UndoLog::new();
        self.finish(
            TerminationPolicy::Terminate,
            &log,
            self.start_session_forward(request, &log),
        )
        .await
    }

    async fn start_session_forward(
        &self,
        request: &ConnectRequest,
        log: &UndoLog,
    ) -> Result<SessionSummary, BastionError> {
        self.preflight(matches!(request.mode, ConnectMode::Ssh { .. }))?;
        let instance_id = self.interruptible(self.resolve_target(&request.target)).await?;
        info!(instance_id, "starting session");

        let (purpose, data_plane, open_viewer) = match &request.mode {
            ConnectMode::Shell => (SessionPurpose::InteractiveShell, DataPlane::Plugin, false),
            ConnectMode::Ssh { user, options } => (
                SessionPurpose::ssh(),
                DataPlane::Ssh {
                    user: user.clone(),
                    options: options.clone(),
                },
                false,
            ),
            ConnectMode::Rdp {
                local_port,
                keypair_parameter,
            } => {
                self.reveal_password(&instance_id, &request.target, keypair_parameter.as_deref())
                    .await?;
                (
                    SessionPurpose::PortForwardToSelf {
                        remote_port: RDP_PORT,
                        local_port: local_port.unwrap_or_else(random_local_port),
                    },
                    DataPlane::Plugin,
                    true,
                )
            }
        };

        let exit = self
            .run_channel(&instance_id, &purpose, &data_plane, log, open_viewer)
            .await?;
        let session_id = match &request.target {
            TargetSelector::SessionId(session_id) => Some(session_id.clone()),
            TargetSelector::InstanceId(_) | TargetSelector::Interactive => None,
        };
        Ok(SessionSummary {
            session_id,
            instance_id: Some(instance_id),
            exit: Some(exit),
        })
    }

    async fn resolve_target(&self, target: &TargetSelector) -> Result<String, BastionError> {
        match target {
            TargetSelector::InstanceId(instance_id) => Ok(instance_id.clone()),
            TargetSelector::SessionId(session_id) => self
                .cloud
                .compute
                .find_session_instance(session_id)
                .await?
                .ok_or_else(|| BastionError::SessionNotFound {
                    session_id: session_id.clone(),
                }),
            TargetSelector::Interactive => {
                let instances = self.cloud.directory.list_managed_instances().await?;
                if instances.is_empty() {
                    return Err(BastionError::NoTargets {
                        kind: "online managed instances",
                    });
                }
                let labels: Vec<String> = instances.iter().map(|instance| instance.label()).collect();
                let index = self.selector.select("Select an instance", &labels)?;
                instances
                    .into_iter()
                    .nth(index)
                    .map(|instance| instance.instance_id)
                    .ok_or(BastionError::NoTargets {
                        kind: "online managed instances",
                    })
            }
        }
    }

    /// Finds the key for the instance's password, then decrypts and shows
    /// the password. A missing key is not fatal: the desktop still opens.
    async fn reveal_password(
        &self,
        instance_id: &str,
        target: &TargetSelector,
        keypair_parameter: Option<&str>,
    ) -> Result<(), BastionError> {
        let Some(handle) = self
            .interruptible(self.password_key_handle(instance_id, target, keypair_parameter))
            .await?
        else {
            warn!(instance_id, "no key pair secret for this instance; password not shown");
            return Ok(());
        };

        let credentials =
            CredentialManager::new(self.cloud.compute.as_ref(), self.cloud.parameters.as_ref());
        let private_key = self
            .interruptible(async { credentials.fetch_secret(&handle).await.map_err(BastionError::from) })
            .await?;
        let password = credentials
            .await_password(
                instance_id,
                &private_key,
                &self.settings.password,
                &self.gate.token(),
            )
            .await
            .map_err(BastionError::from_password_wait)?;
        self.notifier.notify(&Notice::Password {
            instance_id: instance_id.to_owned(),
            password,
        });
        Ok(())
    }

    async fn password_key_handle(
        &self,
        instance_id: &str,
        target: &TargetSelector,
        keypair_parameter: Option<&str>,
    ) -> Result<Option<String>, BastionError> {
        if let TargetSelector::SessionId(session_id) = target
            && let Some(id) = SessionId::parse(session_id)
        {
            return Ok(Some(default_credential_handle(&id)));
        }
        if let Some(parameter) = keypair_parameter {
            return Ok(Some(parameter.to_owned()));
        }
        let tagged = self
            .cloud
            .compute
            .describe_instance(instance_id)
            .await?
            .and_then(|description| description.tags.get(TAG_SESSION_ID).cloned())
            .and_then(|value| SessionId::parse(&value));
        Ok(tagged.map(|id| default_credential_handle(&id)))
    }
}
