//! `port-forward`: a throwaway bastion forwarding a local port to a host
//! behind it, usually a managed database.

use tracing::{info, warn};

use super::{BastionError, FlowReport, Orchestrator, PortForwardRequest, SessionSummary};
use crate::channel::{DataPlane, SessionPurpose};
use crate::grant::{GrantError, NetworkGrantManager};
use crate::provider::DatabaseTarget;
use crate::teardown::{UndoAction, UndoLog};
use crate::wait::ReadinessCondition;

impl Orchestrator {
    /// Provisions a bastion, admits it into the database's security group if
    /// the database was selected here, and forwards the port until the
    /// tunnel exits.
    pub async fn port_forward(&self, request: &PortForwardRequest) -> FlowReport {
        let log = UndoLog::new();
        self.finish(request.policy, &log, self.port_forward_forward(request, &log))
            .await
    }

    async fn port_forward_forward(
        &self,
        request: &PortForwardRequest,
        log: &UndoLog,
    ) -> Result<SessionSummary, BastionError> {
        self.preflight(false)?;
        let session = self.new_session(request.expire_after).await?;
        let mut resource = self.provision(&request.spec, &session, log).await?;
        self.await_condition(&mut resource, ReadinessCondition::Running)
            .await?;

        let host = match &request.remote_host {
            Some(host) => host.clone(),
            None => {
                let database = self.interruptible(self.select_database()).await?;
                self.grant_database_access(&resource.resource_id, &database, request.remote_port, log)
                    .await?;
                database.address
            }
        };

        let purpose = SessionPurpose::PortForwardToRemoteHost {
            host,
            remote_port: request.remote_port,
            local_port: request.local_port.unwrap_or(request.remote_port),
        };
        let exit = self
            .run_channel(&resource.resource_id, &purpose, &DataPlane::Plugin, log, false)
            .await?;
        Ok(SessionSummary {
            session_id: Some(session.id().to_string()),
            instance_id: Some(resource.resource_id),
            exit: Some(exit),
        })
    }

    async fn select_database(&self) -> Result<DatabaseTarget, BastionError> {
        let databases = self.cloud.directory.list_databases().await?;
        if databases.is_empty() {
            return Err(BastionError::NoTargets { kind: "databases" });
        }
        let labels: Vec<String> = databases.iter().map(DatabaseTarget::label).collect();
        let index = self
            .selector
            .select("Select the database to connect to", &labels)?;
        databases
            .into_iter()
            .nth(index)
            .ok_or(BastionError::NoTargets { kind: "databases" })
    }

    /// Admits every security group of the bastion into every security group
    /// of the database, recording each grant as it is created.
    async fn grant_database_access(
        &self,
        instance_id: &str,
        database: &DatabaseTarget,
        port: u16,
        log: &UndoLog,
    ) -> Result<(), BastionError> {
        let bastion_groups = self
            .interruptible(async {
                self.cloud
                    .compute
                    .describe_instance(instance_id)
                    .await
                    .map_err(BastionError::from)
            })
            .await?
            .map(|description| description.security_group_ids)
            .unwrap_or_default();
        if bastion_groups.is_empty() || database.security_group_ids.is_empty() {
            warn!(
                instance_id,
                database = database.identifier,
                "no security groups to link; the database may refuse the tunnel"
            );
            return Ok(());
        }

        let grants = NetworkGrantManager::new(self.cloud.compute.as_ref());
        for target in &database.security_group_ids {
            for source in &bastion_groups {
                match grants.authorize(target, source, port).await {
                    Ok(handle) => {
                        log.push(UndoAction::RevokeGrant(handle));
                    }
                    Err(GrantError::AlreadyPermitted { .. }) => {
                        info!(group = target, source, port, "ingress already permitted; leaving it alone");
                    }
                    Err(err) => return Err(err.into()),
                }
                self.checkpoint()?;
            }
        }
        Ok(())
    }
}
