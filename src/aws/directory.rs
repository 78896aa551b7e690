//! RDS and Systems Manager inventory behind [`TargetDirectory`].

use serde::Deserialize;

use super::AwsCli;
use crate::provider::{DatabaseTarget, ManagedInstance, ProviderFuture, TargetDirectory};
use crate::runner::CommandRunner;

const ONLINE_FILTER: &str = "Key=PingStatus,Values=Online";

#[derive(Debug, Default, Deserialize)]
struct DescribeDbInstancesOutput {
    #[serde(rename = "DBInstances", default)]
    db_instances: Vec<DbInstanceRecord>,
}

#[derive(Debug, Default, Deserialize)]
struct DbInstanceRecord {
    #[serde(rename = "DBInstanceIdentifier")]
    identifier: String,
    #[serde(rename = "Engine", default)]
    engine: String,
    #[serde(rename = "Endpoint", default)]
    endpoint: Option<EndpointRecord>,
    #[serde(rename = "VpcSecurityGroups", default)]
    security_groups: Vec<VpcSecurityGroupRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EndpointRecord {
    address: String,
    port: u16,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VpcSecurityGroupRecord {
    vpc_security_group_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstanceInformationOutput {
    #[serde(default)]
    instance_information_list: Vec<InstanceInformationRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceInformationRecord {
    instance_id: String,
    #[serde(default)]
    computer_name: Option<String>,
    #[serde(default)]
    platform_name: Option<String>,
}

impl<R> TargetDirectory for AwsCli<R>
where
    R: CommandRunner + 'static,
{
    fn list_databases(&self) -> ProviderFuture<'_, Vec<DatabaseTarget>> {
        Box::pin(async move {
            let output: DescribeDbInstancesOutput = self
                .call_json::<_, &str>("rds", "describe-db-instances", &[])
                .await?;
            // Instances still being created have no endpoint yet.
            Ok(output
                .db_instances
                .into_iter()
                .filter_map(|db| {
                    let endpoint = db.endpoint?;
                    Some(DatabaseTarget {
                        identifier: db.identifier,
                        engine: db.engine,
                        address: endpoint.address,
                        port: endpoint.port,
                        security_group_ids: db
                            .security_groups
                            .into_iter()
                            .map(|group| group.vpc_security_group_id)
                            .collect(),
                    })
                })
                .collect())
        })
    }

    fn list_managed_instances(&self) -> ProviderFuture<'_, Vec<ManagedInstance>> {
        Box::pin(async move {
            let output: DescribeInstanceInformationOutput = self
                .call_json(
                    "ssm",
                    "describe-instance-information",
                    &["--filters", ONLINE_FILTER],
                )
                .await?;
            Ok(output
                .instance_information_list
                .into_iter()
                .map(|record| ManagedInstance {
                    instance_id: record.instance_id,
                    computer_name: record.computer_name,
                    platform: record.platform_name,
                })
                .collect())
        })
    }
}
