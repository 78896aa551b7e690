//! STS and IAM behind [`IdentityService`].

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::AwsCli;
use crate::provider::{IdentityService, ProviderError, ProviderFuture};
use crate::runner::CommandRunner;

/// Actions the in-band agent needs to register with the broker.
const AGENT_ACTIONS: [&str; 8] = [
    "ec2messages:GetMessages",
    "ssm:ListAssociations",
    "ssm:ListInstanceAssociations",
    "ssm:UpdateInstanceInformation",
    "ssmmessages:CreateControlChannel",
    "ssmmessages:CreateDataChannel",
    "ssmmessages:OpenControlChannel",
    "ssmmessages:OpenDataChannel",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CallerIdentityOutput {
    account: String,
    arn: String,
}

pub(super) fn agent_policy_document() -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Action": AGENT_ACTIONS,
            "Resource": "*",
        }],
    })
}

pub(super) fn assume_role_document() -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": "ec2.amazonaws.com" },
            "Action": "sts:AssumeRole",
        }],
    })
}

/// Treats an existing resource as success so a half-finished earlier run can
/// be completed.
fn tolerate_existing(result: Result<String, ProviderError>) -> Result<(), ProviderError> {
    match result {
        Ok(_) | Err(ProviderError::AlreadyExists { .. }) => Ok(()),
        Err(err) => Err(err),
    }
}

impl<R> AwsCli<R>
where
    R: CommandRunner + 'static,
{
    async fn caller(&self) -> Result<CallerIdentityOutput, ProviderError> {
        self.call_json::<_, &str>("sts", "get-caller-identity", &[])
            .await
    }

    async fn create_instance_profile(&self, name: &str) -> Result<(), ProviderError> {
        let account = self.caller().await?.account;
        let policy = agent_policy_document().to_string();
        let trust = assume_role_document().to_string();
        let policy_arn = format!("arn:aws:iam::{account}:policy/{name}");

        info!(profile = name, "creating instance profile");
        tolerate_existing(
            self.call(
                "iam",
                "create-policy",
                &["--policy-name", name, "--policy-document", policy.as_str()],
            )
            .await,
        )?;
        tolerate_existing(
            self.call(
                "iam",
                "create-role",
                &[
                    "--role-name",
                    name,
                    "--path",
                    "/",
                    "--assume-role-policy-document",
                    trust.as_str(),
                ],
            )
            .await,
        )?;
        self.call(
            "iam",
            "attach-role-policy",
            &["--role-name", name, "--policy-arn", policy_arn.as_str()],
        )
        .await?;
        tolerate_existing(
            self.call(
                "iam",
                "create-instance-profile",
                &["--instance-profile-name", name],
            )
            .await,
        )?;
        // An instance profile holds at most one role.
        match self
            .call(
                "iam",
                "add-role-to-instance-profile",
                &["--instance-profile-name", name, "--role-name", name],
            )
            .await
        {
            Ok(_) | Err(ProviderError::CapacityOrQuota { .. } | ProviderError::AlreadyExists { .. }) => {}
            Err(err) => return Err(err),
        }
        self.call(
            "iam",
            "wait",
            &["instance-profile-exists", "--instance-profile-name", name],
        )
        .await
        .map(|_| ())
    }
}

impl<R> IdentityService for AwsCli<R>
where
    R: CommandRunner + 'static,
{
    fn caller_identity(&self) -> ProviderFuture<'_, String> {
        Box::pin(async move { Ok(self.caller().await?.arn) })
    }

    fn ensure_instance_profile<'a>(&'a self, profile_name: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            match self
                .call(
                    "iam",
                    "get-instance-profile",
                    &["--instance-profile-name", profile_name],
                )
                .await
            {
                Ok(_) => Ok(()),
                Err(ProviderError::NotFound { .. }) => {
                    self.create_instance_profile(profile_name).await
                }
                Err(err) => Err(err),
            }
        })
    }
}
