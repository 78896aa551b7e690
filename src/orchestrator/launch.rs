//! `launch`: a Linux bastion with a shell or SSH session.

use super::{BastionError, FlowReport, LaunchRequest, LinuxAccess, Orchestrator, SessionSummary};
use crate::channel::{DataPlane, SessionPurpose};
use crate::teardown::UndoLog;
use crate::wait::ReadinessCondition;

impl Orchestrator {
    /// Provisions a Linux bastion, connects to it, and tears it down when
    /// the session ends.
    pub async fn launch(&self, request: &LaunchRequest) -> FlowReport {
        let log = UndoLog::new();
        self.finish(request.policy, &log, self.launch_forward(request, &log))
            .await
    }

    async fn launch_forward(
        &self,
        request: &LaunchRequest,
        log: &UndoLog,
    ) -> Result<SessionSummary, BastionError> {
        let (purpose, data_plane) = match &request.access {
            LinuxAccess::Shell => (SessionPurpose::InteractiveShell, DataPlane::Plugin),
            LinuxAccess::Ssh { user, options } => (
                SessionPurpose::ssh(),
                DataPlane::Ssh {
                    user: user.clone(),
                    options: options.clone(),
                },
            ),
        };
        self.preflight(matches!(data_plane, DataPlane::Ssh { .. }))?;

        let session = self.new_session(request.expire_after).await?;
        let mut resource = self.provision(&request.spec, &session, log).await?;

        self.await_condition(&mut resource, ReadinessCondition::Running)
            .await?;
        if matches!(data_plane, DataPlane::Ssh { .. }) {
            // User data installs the key; it has run once status checks pass.
            self.await_condition(&mut resource, ReadinessCondition::StatusOk)
                .await?;
        }

        let exit = self
            .run_channel(&resource.resource_id, &purpose, &data_plane, log, false)
            .await?;
        Ok(SessionSummary {
            session_id: Some(session.id().to_string()),
            instance_id: Some(resource.resource_id),
            exit: Some(exit),
        })
    }
}
