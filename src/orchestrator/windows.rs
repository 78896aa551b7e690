//! `launch-windows`: a Windows bastion with a shell or remote desktop.

use super::{
    BastionError, FlowReport, Notice, Orchestrator, SessionSummary, WindowsLaunchRequest,
};
use crate::channel::{DataPlane, RDP_PORT, SessionPurpose, random_local_port};
use crate::credentials::CredentialManager;
use crate::teardown::{UndoAction, UndoLog};
use crate::wait::ReadinessCondition;

impl Orchestrator {
    /// Provisions a Windows bastion. With remote desktop, a key pair is
    /// created so the administrator password can be decrypted and printed
    /// before the desktop tunnel opens.
    pub async fn launch_windows(&self, request: &WindowsLaunchRequest) -> FlowReport {
        let log = UndoLog::new();
        self.finish(request.policy, &log, self.launch_windows_forward(request, &log))
            .await
    }

    async fn launch_windows_forward(
        &self,
        request: &WindowsLaunchRequest,
        log: &UndoLog,
    ) -> Result<SessionSummary, BastionError> {
        self.preflight(false)?;
        let session = self.new_session(request.expire_after).await?;
        let credentials =
            CredentialManager::new(self.cloud.compute.as_ref(), self.cloud.parameters.as_ref());

        // Each create runs to completion and is recorded before an interrupt
        // is honoured.
        let key_pair = if request.rdp {
            let created = credentials.create_ephemeral_key_pair(&session).await?;
            log.push(UndoAction::DeleteKeyPair {
                key_name: created.key_name.clone(),
            });
            self.checkpoint()?;
            credentials
                .store_secret(&created.secret_handle, &created.private_key_pem, &session)
                .await?;
            log.push(UndoAction::DeleteSecret {
                handle: created.secret_handle.clone(),
            });
            self.checkpoint()?;
            Some(created)
        } else {
            None
        };

        let spec = key_pair.as_ref().map_or_else(
            || request.spec.clone(),
            |created| request.spec.with_key_name(created.key_name.clone()),
        );
        let mut resource = self.provision(&spec, &session, log).await?;
        let instance_id = resource.resource_id.clone();

        let Some(credential) = key_pair else {
            self.await_condition(&mut resource, ReadinessCondition::Running)
                .await?;
            let exit = self
                .run_channel(
                    &instance_id,
                    &SessionPurpose::InteractiveShell,
                    &DataPlane::Plugin,
                    log,
                    false,
                )
                .await?;
            return Ok(SessionSummary {
                session_id: Some(session.id().to_string()),
                instance_id: Some(instance_id),
                exit: Some(exit),
            });
        };

        self.await_condition(&mut resource, ReadinessCondition::Running)
            .await?;
        self.await_condition(&mut resource, ReadinessCondition::StatusOk)
            .await?;
        let password = credentials
            .await_password(
                &instance_id,
                &credential.private_key_pem,
                &self.settings.password,
                &self.gate.token(),
            )
            .await
            .map_err(BastionError::from_password_wait)?;
        self.notifier.notify(&Notice::Password {
            instance_id: instance_id.clone(),
            password,
        });

        let purpose = SessionPurpose::PortForwardToSelf {
            remote_port: RDP_PORT,
            local_port: request.local_port.unwrap_or_else(random_local_port),
        };
        let exit = self
            .run_channel(&instance_id, &purpose, &DataPlane::Plugin, log, true)
            .await?;
        Ok(SessionSummary {
            session_id: Some(session.id().to_string()),
            instance_id: Some(instance_id),
            exit: Some(exit),
        })
    }
}
