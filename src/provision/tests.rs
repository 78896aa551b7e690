//! Unit tests for launch specs, image resolution, placement, and creation.

use std::sync::Arc;

use rstest::{fixture, rstest};

use super::*;
use crate::identity::{Session, TAG_SESSION_ID, new_session_id};
use crate::provider::{CloudPorts, ProviderError, SecurityGroup, Subnet};
use crate::select::SelectionError;
use crate::test_support::{FakeCloud, FixedSelector};

const AL2_ARM_PATH: &str = "/aws/service/ami-amazon-linux-latest/amzn2-ami-hvm-arm64-gp2";
const AL2_X86_PATH: &str = "/aws/service/ami-amazon-linux-latest/amzn2-ami-hvm-x86_64-gp2";

#[fixture]
fn session() -> Session {
    Session::new(new_session_id(), "tester", None)
}

fn subnet(id: &str, vpc: &str, free: u64) -> Subnet {
    Subnet {
        subnet_id: id.to_owned(),
        vpc_id: vpc.to_owned(),
        availability_zone: String::from("eu-west-1a"),
        available_ips: free,
        state: String::from("available"),
        name: None,
    }
}

fn group(id: &str) -> SecurityGroup {
    SecurityGroup {
        group_id: id.to_owned(),
        name: id.to_owned(),
        description: String::from("test group"),
    }
}

fn builder(image: &str) -> LaunchSpecBuilder {
    LaunchSpec::builder()
        .image(image)
        .instance_type(DEFAULT_LINUX_INSTANCE_TYPE)
        .bootstrap("#!/bin/bash\n")
}

fn spec(image: &str, subnet: Option<&str>, group: Option<&str>) -> LaunchSpec {
    builder(image)
        .subnet_id(subnet.map(str::to_owned))
        .security_group(group.map(str::to_owned))
        .build()
        .unwrap_or_else(|err| panic!("spec should build: {err}"))
}

#[rstest]
#[case("ami-0abc", ImageReference::Concrete(String::from("ami-0abc")))]
#[case("  /my/image ", ImageReference::Parameter(String::from("/my/image")))]
#[case("amazon-linux", ImageReference::Platform(PlatformFamily::AmazonLinux))]
#[case("Windows", ImageReference::Platform(PlatformFamily::Windows))]
fn image_references_parse(#[case] input: &str, #[case] expected: ImageReference) {
    let parsed: ImageReference = input
        .parse()
        .unwrap_or_else(|err| panic!("reference should parse: {err}"));
    assert_eq!(parsed, expected);
}

#[rstest]
#[case("ami-")]
#[case("/")]
#[case("debian")]
#[case("")]
fn unknown_image_references_are_rejected(#[case] input: &str) {
    let err = input.parse::<ImageReference>().expect_err("invalid reference");
    assert!(matches!(err, LaunchSpecError::InvalidImageReference { .. }));
}

#[rstest]
#[case(builder("ami-1").instance_type("  "), "instance_type")]
#[case(builder("ami-1").subnet_id(Some(String::from("vpc-1"))), "subnet_id")]
#[case(builder("ami-1").security_group(Some(String::from("web"))), "security_group_id")]
#[case(builder("ami-1").bootstrap(" "), "bootstrap")]
#[case(
    builder("ami-1").volume(VolumeSpec { size_gib: 0, ..VolumeSpec::default() }),
    "volume_size"
)]
#[case(
    builder("ami-1").volume(VolumeSpec { volume_type: String::from("ssd"), ..VolumeSpec::default() }),
    "volume_type"
)]
fn builder_rejects_malformed_fields(#[case] input: LaunchSpecBuilder, #[case] field: &str) {
    let err = input.build().expect_err("malformed spec");
    assert!(
        matches!(&err, LaunchSpecError::InvalidField { field: actual, .. } if *actual == field),
        "unexpected: {err:?}"
    );
}

#[test]
fn builder_trims_and_maps_placement() {
    let spec = builder(" ami-1 ")
        .subnet_id(Some(String::from(" subnet-1 ")))
        .security_group(Some(String::from("default")))
        .instance_profile(Some(String::from("  ")))
        .private(true)
        .build()
        .unwrap_or_else(|err| panic!("spec should build: {err}"));

    assert_eq!(spec.image, ImageReference::Concrete(String::from("ami-1")));
    assert_eq!(spec.placement.subnet_id.as_deref(), Some("subnet-1"));
    assert_eq!(spec.placement.security_group, SecurityGroupChoice::NetworkDefault);
    assert_eq!(spec.instance_profile, None);
    assert!(!spec.associate_public_ip);
    assert_eq!(spec.pricing, PricingMode::Spot);
    assert_eq!(spec.key_name, None);
}

#[rstest]
#[case(PlatformFamily::AmazonLinux, &["arm64"], Some(AL2_ARM_PATH))]
#[case(PlatformFamily::AmazonLinux, &["arm64", "x86_64"], Some(AL2_X86_PATH))]
#[case(PlatformFamily::Windows, &["x86_64"], Some("/aws/service/ami-windows-latest/Windows_Server-2019-English-Full-Base"))]
#[case(PlatformFamily::Windows, &["arm64"], None)]
#[case(PlatformFamily::AmazonLinux, &["i386"], None)]
#[case(PlatformFamily::AmazonLinux, &[], None)]
fn architecture_stage_picks_parameter_path(
    #[case] family: PlatformFamily,
    #[case] architectures: &[&str],
    #[case] expected: Option<&str>,
) {
    let reported: Vec<String> = architectures.iter().map(|arch| (*arch).to_owned()).collect();
    let stage = after_architecture(family, "t4g.micro", &reported);
    match expected {
        Some(path) => assert_eq!(stage, Ok(ImageStage::FetchParameter(path.to_owned()))),
        None => assert!(matches!(
            stage,
            Err(ProvisionError::UnsupportedArchitecture { .. })
        )),
    }
}

#[rstest]
#[case(" ami-0123 ", true)]
#[case("ami-", false)]
#[case("not-an-image", false)]
fn parameter_stage_accepts_only_image_ids(#[case] value: &str, #[case] accepted: bool) {
    let stage = after_parameter("/images/bastion", value);
    assert_eq!(stage.is_ok(), accepted, "{stage:?}");
}

#[tokio::test]
async fn missing_parameter_is_an_invalid_reference() {
    let cloud = FakeCloud::new();
    let err = ImageResolver::new(&cloud, &cloud)
        .resolve(&ImageReference::Parameter(String::from("/missing")), "t3.micro")
        .await
        .expect_err("parameter is absent");
    assert!(matches!(err, ProvisionError::InvalidImageReference { .. }));
}

#[rstest]
#[tokio::test]
async fn explicit_values_skip_every_lookup(session: Session) {
    let cloud = Arc::new(FakeCloud::new());
    let ports = CloudPorts::from_provider(cloud.clone());
    let selector = FixedSelector::declining();
    let spec = spec("ami-0explicit", Some("subnet-explicit"), Some("sg-explicit"));

    let resource = Provisioner::new(&ports, &selector)
        .provision(&spec, &session)
        .await
        .unwrap_or_else(|err| panic!("provision failed: {err}"));

    assert_eq!(resource.state, ResourceState::Pending);
    let ops: Vec<String> = cloud
        .calls()
        .into_iter()
        .filter_map(|call| call.split_whitespace().next().map(str::to_owned))
        .collect();
    assert_eq!(ops, ["run_instance"]);
    assert!(selector.prompts().is_empty());

    let requests = cloud.created_requests();
    let request = requests
        .first()
        .unwrap_or_else(|| panic!("one create request expected"));
    assert_eq!(requests.len(), 1);
    assert_eq!(request.image_id, "ami-0explicit");
    assert_eq!(request.subnet_id.as_deref(), Some("subnet-explicit"));
    assert_eq!(request.security_group_ids, vec![String::from("sg-explicit")]);
    assert!(
        request
            .tags
            .contains(&(TAG_SESSION_ID.to_owned(), session.id().to_string()))
    );
}

#[rstest]
#[tokio::test]
async fn platform_reference_follows_reported_architecture(session: Session) {
    let cloud = Arc::new(
        FakeCloud::new()
            .with_architectures(&["arm64"])
            .with_parameter(AL2_ARM_PATH, "ami-0arm")
            .with_parameter(AL2_X86_PATH, "ami-0x86"),
    );
    let ports = CloudPorts::from_provider(cloud.clone());
    let selector = FixedSelector::declining();
    let spec = spec("amazon-linux", Some("subnet-1"), Some("default"));

    Provisioner::new(&ports, &selector)
        .provision(&spec, &session)
        .await
        .unwrap_or_else(|err| panic!("provision failed: {err}"));

    let calls = cloud.calls();
    let arch = calls
        .iter()
        .position(|call| call.starts_with("supported_architectures"));
    let fetch = calls
        .iter()
        .position(|call| call == &format!("get_parameter {AL2_ARM_PATH}"));
    assert!(arch.is_some() && fetch.is_some() && arch < fetch, "{calls:?}");
    let images: Vec<String> = cloud
        .created_requests()
        .into_iter()
        .map(|request| request.image_id)
        .collect();
    assert_eq!(images, ["ami-0arm"]);
    assert!(
        cloud
            .created_requests()
            .iter()
            .all(|request| request.security_group_ids.is_empty())
    );
}

#[rstest]
#[tokio::test]
async fn unset_placement_is_chosen_interactively(session: Session) {
    let cloud = Arc::new(
        FakeCloud::new()
            .with_subnets(vec![
                subnet("subnet-full", "vpc-1", 0),
                subnet("subnet-a", "vpc-1", 12),
                subnet("subnet-b", "vpc-2", 40),
            ])
            .with_security_groups("vpc-2", vec![group("sg-a"), group("sg-b")]),
    );
    let ports = CloudPorts::from_provider(cloud.clone());
    let selector = FixedSelector::new(1);

    Provisioner::new(&ports, &selector)
        .provision(&spec("ami-1", None, None), &session)
        .await
        .unwrap_or_else(|err| panic!("provision failed: {err}"));

    let request = cloud
        .created_requests()
        .pop()
        .unwrap_or_else(|| panic!("create request expected"));
    assert_eq!(request.subnet_id.as_deref(), Some("subnet-b"));
    assert_eq!(request.security_group_ids, vec![String::from("sg-b")]);
    assert_eq!(selector.prompts().len(), 2);
    assert_eq!(cloud.count("describe_subnet"), 0);
}

#[tokio::test]
async fn explicit_subnet_with_unset_group_describes_the_subnet() {
    let cloud = FakeCloud::new()
        .with_subnets(vec![subnet("subnet-9", "vpc-9", 3)])
        .with_security_groups("vpc-9", vec![group("sg-9")]);
    let placement = Placement {
        subnet_id: Some(String::from("subnet-9")),
        security_group: SecurityGroupChoice::Unset,
    };

    let resolved = resolve_placement(&cloud, &FixedSelector::new(0), &placement)
        .await
        .unwrap_or_else(|err| panic!("placement failed: {err}"));

    assert_eq!(resolved.security_group_ids, vec![String::from("sg-9")]);
    assert_eq!(cloud.count("describe_subnet"), 1);
    assert_eq!(cloud.count("list_subnets"), 0);
}

#[tokio::test]
async fn no_eligible_subnet_fails_before_prompting() {
    let cloud = FakeCloud::new().with_subnets(vec![subnet("subnet-full", "vpc-1", 0)]);
    let selector = FixedSelector::new(0);

    let err = resolve_placement(&cloud, &selector, &Placement::default())
        .await
        .expect_err("nothing eligible");

    assert!(matches!(err, ProvisionError::NoEligiblePlacement { .. }));
    assert!(selector.prompts().is_empty());
}

#[tokio::test]
async fn declined_selection_is_reported() {
    let cloud = FakeCloud::new().with_subnets(vec![subnet("subnet-a", "vpc-1", 5)]);

    let err = resolve_placement(&cloud, &FixedSelector::declining(), &Placement::default())
        .await
        .expect_err("selection declined");

    assert!(matches!(
        err,
        ProvisionError::Selection(SelectionError::Cancelled { .. })
    ));
}

#[rstest]
#[case::capacity(
    ProviderError::CapacityOrQuota { message: String::from("InsufficientInstanceCapacity") },
    "capacity"
)]
#[case::permission(
    ProviderError::PermissionDenied { message: String::from("UnauthorizedOperation") },
    "permission"
)]
#[case::timeout(
    ProviderError::Timeout { message: String::from("aws timed out") },
    "ambiguous"
)]
#[tokio::test]
async fn create_failures_are_classified(
    session: Session,
    #[case] failure: ProviderError,
    #[case] expected: &str,
) {
    let cloud = Arc::new(FakeCloud::new().fail_next("run_instance", failure));
    let ports = CloudPorts::from_provider(cloud.clone());
    let selector = FixedSelector::declining();

    let err = Provisioner::new(&ports, &selector)
        .provision(&spec("ami-1", Some("subnet-1"), Some("sg-1")), &session)
        .await
        .expect_err("create fails");

    let kind = match &err {
        ProvisionError::CapacityOrQuota { .. } => "capacity",
        ProvisionError::PermissionDenied { .. } => "permission",
        ProvisionError::AmbiguousCreation { session_id, .. } => {
            assert_eq!(session_id, session.id().as_str());
            "ambiguous"
        }
        _ => "other",
    };
    assert_eq!(kind, expected, "{err:?}");
    assert_eq!(cloud.count("run_instance"), 1);
}

#[rstest]
#[tokio::test]
async fn instance_profile_is_ensured_before_creation(session: Session) {
    let cloud = Arc::new(FakeCloud::new());
    let ports = CloudPorts::from_provider(cloud.clone());
    let spec = builder("ami-1")
        .subnet_id(Some(String::from("subnet-1")))
        .security_group(Some(String::from("sg-1")))
        .instance_profile(Some(String::from("BastionProfile")))
        .build()
        .unwrap_or_else(|err| panic!("spec should build: {err}"));

    Provisioner::new(&ports, &FixedSelector::declining())
        .provision(&spec, &session)
        .await
        .unwrap_or_else(|err| panic!("provision failed: {err}"));

    assert_eq!(cloud.ensured_profiles(), ["BastionProfile"]);
    assert_eq!(
        cloud.calls().first().map(String::as_str),
        Some("ensure_instance_profile BastionProfile")
    );
}
