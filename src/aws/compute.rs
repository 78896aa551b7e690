//! EC2 calls behind [`ComputeApi`].

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{AwsCli, Tag, tags_json};
use crate::identity::TAG_SESSION_ID;
use crate::provider::{
    ComputeApi, CreateInstanceRequest, CreatedKeyPair, InstanceDescription, InstanceHealth,
    IngressRule, ProviderError, ProviderFuture, SecurityGroup, StatusCheck, Subnet,
};
use crate::provision::PricingMode;
use crate::runner::CommandRunner;

pub(super) const DEFAULT_ROOT_DEVICE: &str = "/dev/xvda";
const LIVE_STATES: &str = "Name=instance-state-name,Values=pending,running,stopping,stopped";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RunInstancesOutput {
    #[serde(default)]
    instances: Vec<InstanceRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstancesOutput {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<InstanceRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceRecord {
    instance_id: String,
    #[serde(default)]
    state: Option<StateName>,
    #[serde(default)]
    security_groups: Vec<GroupIdentifier>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StateName {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GroupIdentifier {
    group_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstanceStatusOutput {
    #[serde(default)]
    instance_statuses: Vec<InstanceStatusRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceStatusRecord {
    instance_state: StateName,
    #[serde(default)]
    instance_status: Option<StatusSummary>,
    #[serde(default)]
    system_status: Option<StatusSummary>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatusSummary {
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeImagesOutput {
    #[serde(default)]
    images: Vec<ImageRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageRecord {
    #[serde(default)]
    root_device_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstanceTypesOutput {
    #[serde(default)]
    instance_types: Vec<InstanceTypeRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceTypeRecord {
    #[serde(default)]
    processor_info: ProcessorInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProcessorInfo {
    #[serde(default)]
    supported_architectures: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeSubnetsOutput {
    #[serde(default)]
    subnets: Vec<SubnetRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SubnetRecord {
    subnet_id: String,
    vpc_id: String,
    #[serde(default)]
    availability_zone: String,
    #[serde(default)]
    available_ip_address_count: u64,
    #[serde(default)]
    state: String,
    #[serde(default)]
    tags: Vec<Tag>,
}

impl From<SubnetRecord> for Subnet {
    fn from(record: SubnetRecord) -> Self {
        let name = record
            .tags
            .into_iter()
            .find(|tag| tag.key == "Name")
            .map(|tag| tag.value);
        Self {
            subnet_id: record.subnet_id,
            vpc_id: record.vpc_id,
            availability_zone: record.availability_zone,
            available_ips: record.available_ip_address_count,
            state: record.state,
            name,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeSecurityGroupsOutput {
    #[serde(default)]
    security_groups: Vec<SecurityGroupRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SecurityGroupRecord {
    group_id: String,
    #[serde(default)]
    group_name: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateKeyPairOutput {
    key_name: String,
    key_material: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PasswordDataOutput {
    #[serde(default)]
    password_data: String,
}

/// Builds the `RunInstances` input. User data is base64-encoded here because
/// the CLI only encodes it for the `--user-data` flag.
pub(super) fn run_instances_input(request: &CreateInstanceRequest, root_device: &str) -> Value {
    let tags = tags_json(&request.tags);
    let mut interface = Map::new();
    interface.insert("DeviceIndex".into(), json!(0));
    interface.insert(
        "AssociatePublicIpAddress".into(),
        json!(request.associate_public_ip),
    );
    interface.insert("DeleteOnTermination".into(), json!(true));
    if let Some(subnet_id) = &request.subnet_id {
        interface.insert("SubnetId".into(), json!(subnet_id));
    }
    if !request.security_group_ids.is_empty() {
        interface.insert("Groups".into(), json!(request.security_group_ids));
    }

    let mut input = Map::new();
    input.insert("ImageId".into(), json!(request.image_id));
    input.insert("InstanceType".into(), json!(request.instance_type));
    input.insert("MinCount".into(), json!(1));
    input.insert("MaxCount".into(), json!(1));
    input.insert("InstanceInitiatedShutdownBehavior".into(), json!("terminate"));
    input.insert(
        "UserData".into(),
        json!(STANDARD.encode(request.user_data.as_bytes())),
    );
    input.insert("NetworkInterfaces".into(), json!([interface]));
    input.insert(
        "BlockDeviceMappings".into(),
        json!([{
            "DeviceName": root_device,
            "Ebs": {
                "VolumeSize": request.volume.size_gib,
                "VolumeType": request.volume.volume_type,
                "Encrypted": request.volume.encrypted,
                "DeleteOnTermination": true,
            },
        }]),
    );
    input.insert(
        "TagSpecifications".into(),
        json!([
            { "ResourceType": "instance", "Tags": tags },
            { "ResourceType": "volume", "Tags": tags },
            { "ResourceType": "network-interface", "Tags": tags },
        ]),
    );
    if request.pricing == PricingMode::Spot {
        input.insert(
            "InstanceMarketOptions".into(),
            json!({
                "MarketType": "spot",
                "SpotOptions": {
                    "SpotInstanceType": "one-time",
                    "InstanceInterruptionBehavior": "terminate",
                },
            }),
        );
    }
    if let Some(profile) = &request.instance_profile {
        input.insert("IamInstanceProfile".into(), json!({ "Name": profile }));
    }
    if let Some(key_name) = &request.key_name {
        input.insert("KeyName".into(), json!(key_name));
    }
    Value::Object(input)
}

fn ip_permissions(rule: &IngressRule) -> String {
    json!([{
        "IpProtocol": rule.protocol,
        "FromPort": rule.port,
        "ToPort": rule.port,
        "UserIdGroupPairs": [{
            "GroupId": rule.source_group_id,
            "Description": rule.description,
        }],
    }])
    .to_string()
}

fn describe(record: InstanceRecord) -> InstanceDescription {
    InstanceDescription {
        instance_id: record.instance_id,
        state: record.state.map(|state| state.name).unwrap_or_default(),
        security_group_ids: record
            .security_groups
            .into_iter()
            .map(|group| group.group_id)
            .collect(),
        tags: record
            .tags
            .into_iter()
            .map(|tag| (tag.key, tag.value))
            .collect::<HashMap<_, _>>(),
    }
}

fn not_found_as_none<T>(result: Result<T, ProviderError>) -> Result<Option<T>, ProviderError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

impl<R> AwsCli<R>
where
    R: CommandRunner + 'static,
{
    async fn root_device_name(&self, image_id: &str) -> Result<String, ProviderError> {
        let output: DescribeImagesOutput = self
            .call_json("ec2", "describe-images", &["--image-ids", image_id])
            .await?;
        Ok(output
            .images
            .into_iter()
            .find_map(|image| image.root_device_name)
            .unwrap_or_else(|| DEFAULT_ROOT_DEVICE.to_owned()))
    }
}

impl<R> ComputeApi for AwsCli<R>
where
    R: CommandRunner + 'static,
{
    fn run_instance<'a>(&'a self, request: &'a CreateInstanceRequest) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            let root_device = self.root_device_name(&request.image_id).await?;
            let input = run_instances_input(request, &root_device);
            let output: RunInstancesOutput = self
                .call_with_input("ec2", "run-instances", &input)
                .await?;
            output
                .instances
                .into_iter()
                .next()
                .map(|instance| instance.instance_id)
                .ok_or_else(|| ProviderError::Parse {
                    resource: String::from("ec2 run-instances"),
                    message: String::from("response lists no instance"),
                })
        })
    }

    fn describe_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, Option<InstanceDescription>> {
        Box::pin(async move {
            let output = not_found_as_none(
                self.call_json::<DescribeInstancesOutput, _>(
                    "ec2",
                    "describe-instances",
                    &["--instance-ids", instance_id],
                )
                .await,
            )?;
            Ok(output.and_then(|described| {
                described
                    .reservations
                    .into_iter()
                    .flat_map(|reservation| reservation.instances)
                    .next()
                    .map(describe)
            }))
        })
    }

    fn describe_health<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, Option<InstanceHealth>> {
        Box::pin(async move {
            let output = not_found_as_none(
                self.call_json::<DescribeInstanceStatusOutput, _>(
                    "ec2",
                    "describe-instance-status",
                    &["--instance-ids", instance_id, "--include-all-instances"],
                )
                .await,
            )?;
            Ok(output.and_then(|statuses| {
                statuses
                    .instance_statuses
                    .into_iter()
                    .next()
                    .map(|status| InstanceHealth {
                        state: status.instance_state.name.as_str().into(),
                        instance_status: status
                            .instance_status
                            .map_or(StatusCheck::NotApplicable, |check| {
                                check.status.as_str().into()
                            }),
                        system_status: status
                            .system_status
                            .map_or(StatusCheck::NotApplicable, |check| {
                                check.status.as_str().into()
                            }),
                    })
            }))
        })
    }

    fn terminate_instance<'a>(&'a self, instance_id: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.call("ec2", "terminate-instances", &["--instance-ids", instance_id])
                .await
                .map(|_| ())
        })
    }

    fn supported_architectures<'a>(
        &'a self,
        instance_type: &'a str,
    ) -> ProviderFuture<'a, Vec<String>> {
        Box::pin(async move {
            let output: DescribeInstanceTypesOutput = self
                .call_json(
                    "ec2",
                    "describe-instance-types",
                    &["--instance-types", instance_type],
                )
                .await?;
            Ok(output
                .instance_types
                .into_iter()
                .flat_map(|record| record.processor_info.supported_architectures)
                .collect())
        })
    }

    fn list_subnets(&self) -> ProviderFuture<'_, Vec<Subnet>> {
        Box::pin(async move {
            let output: DescribeSubnetsOutput = self
                .call_json::<_, &str>("ec2", "describe-subnets", &[])
                .await?;
            Ok(output.subnets.into_iter().map(Subnet::from).collect())
        })
    }

    fn describe_subnet<'a>(&'a self, subnet_id: &'a str) -> ProviderFuture<'a, Subnet> {
        Box::pin(async move {
            let output: DescribeSubnetsOutput = self
                .call_json("ec2", "describe-subnets", &["--subnet-ids", subnet_id])
                .await?;
            output
                .subnets
                .into_iter()
                .next()
                .map(Subnet::from)
                .ok_or_else(|| ProviderError::NotFound {
                    message: format!("subnet {subnet_id}"),
                })
        })
    }

    fn list_security_groups<'a>(
        &'a self,
        vpc_id: &'a str,
    ) -> ProviderFuture<'a, Vec<SecurityGroup>> {
        Box::pin(async move {
            let filter = format!("Name=vpc-id,Values={vpc_id}");
            let output: DescribeSecurityGroupsOutput = self
                .call_json(
                    "ec2",
                    "describe-security-groups",
                    &["--filters", filter.as_str()],
                )
                .await?;
            Ok(output
                .security_groups
                .into_iter()
                .map(|group| SecurityGroup {
                    group_id: group.group_id,
                    name: group.group_name,
                    description: group.description,
                })
                .collect())
        })
    }

    fn authorize_ingress<'a>(&'a self, rule: &'a IngressRule) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let permissions = ip_permissions(rule);
            self.call(
                "ec2",
                "authorize-security-group-ingress",
                &[
                    "--group-id",
                    rule.group_id.as_str(),
                    "--ip-permissions",
                    permissions.as_str(),
                ],
            )
            .await
            .map(|_| ())
        })
    }

    fn revoke_ingress<'a>(&'a self, rule: &'a IngressRule) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let permissions = ip_permissions(rule);
            self.call(
                "ec2",
                "revoke-security-group-ingress",
                &[
                    "--group-id",
                    rule.group_id.as_str(),
                    "--ip-permissions",
                    permissions.as_str(),
                ],
            )
            .await
            .map(|_| ())
        })
    }

    fn create_key_pair<'a>(
        &'a self,
        key_name: &'a str,
        tags: &'a [(String, String)],
    ) -> ProviderFuture<'a, CreatedKeyPair> {
        Box::pin(async move {
            let input = json!({
                "KeyName": key_name,
                "KeyType": "rsa",
                "KeyFormat": "pem",
                "TagSpecifications": [
                    { "ResourceType": "key-pair", "Tags": tags_json(tags) },
                ],
            });
            let output: CreateKeyPairOutput = self
                .call_with_input("ec2", "create-key-pair", &input)
                .await?;
            Ok(CreatedKeyPair {
                key_name: output.key_name,
                private_key_pem: output.key_material,
            })
        })
    }

    fn delete_key_pair<'a>(&'a self, key_name: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.call("ec2", "delete-key-pair", &["--key-name", key_name])
                .await
                .map(|_| ())
        })
    }

    fn password_data<'a>(&'a self, instance_id: &'a str) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            let output: PasswordDataOutput = self
                .call_json("ec2", "get-password-data", &["--instance-id", instance_id])
                .await?;
            Ok(output.password_data)
        })
    }

    fn find_session_instance<'a>(
        &'a self,
        session_id: &'a str,
    ) -> ProviderFuture<'a, Option<String>> {
        Box::pin(async move {
            let tag_filter = format!("Name=tag:{TAG_SESSION_ID},Values={session_id}");
            let output: DescribeInstancesOutput = self
                .call_json(
                    "ec2",
                    "describe-instances",
                    &["--filters", tag_filter.as_str(), LIVE_STATES],
                )
                .await?;
            Ok(output
                .reservations
                .into_iter()
                .flat_map(|reservation| reservation.instances)
                .map(|instance| instance.instance_id)
                .next())
        })
    }
}
