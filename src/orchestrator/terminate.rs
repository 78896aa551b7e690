//! `terminate`: clean up a session left running earlier.

use super::{BastionError, FlowReport, Orchestrator, SessionSummary};
use crate::identity::{SessionId, default_credential_handle, default_key_pair_name};
use crate::teardown::{TeardownReport, TerminationPolicy, UndoAction, UndoLog};

impl Orchestrator {
    /// Terminates the instance tagged with `session_id` and deletes the
    /// session's secret and key pair. The credentials are removed even when
    /// no live instance is found.
    pub async fn terminate(&self, session_id: &str) -> FlowReport {
        let log = UndoLog::new();
        let Some(id) = SessionId::parse(session_id) else {
            return FlowReport {
                outcome: Err(BastionError::validation("session id must not be empty")),
                teardown: TeardownReport::default(),
            };
        };
        self.finish(
            TerminationPolicy::Terminate,
            &log,
            self.terminate_forward(&id, &log),
        )
        .await
    }

    async fn terminate_forward(
        &self,
        session_id: &SessionId,
        log: &UndoLog,
    ) -> Result<SessionSummary, BastionError> {
        let found = self
            .interruptible(async {
                self.cloud
                    .compute
                    .find_session_instance(session_id.as_str())
                    .await
                    .map_err(BastionError::from)
            })
            .await?;

        // Teardown runs newest first: instance, then secret, then key pair.
        log.push(UndoAction::DeleteKeyPair {
            key_name: default_key_pair_name(session_id),
        });
        log.push(UndoAction::DeleteSecret {
            handle: default_credential_handle(session_id),
        });
        let Some(instance_id) = found else {
            return Err(BastionError::SessionNotFound {
                session_id: session_id.to_string(),
            });
        };
        log.push(UndoAction::TerminateInstance {
            instance_id: instance_id.clone(),
        });

        Ok(SessionSummary {
            session_id: Some(session_id.to_string()),
            instance_id: Some(instance_id),
            exit: None,
        })
    }
}
