//! Lifecycle tests spanning several commands against one in-memory cloud.

use std::sync::Arc;

use bastion::CloudPorts;
use bastion::interrupt::InterruptGate;
use bastion::orchestrator::{
    BastionError, ConnectMode, ConnectRequest, LaunchRequest, LinuxAccess, Notice, Orchestrator,
    TargetSelector, WindowsLaunchRequest,
};
use bastion::provision::LaunchSpec;
use bastion::teardown::TerminationPolicy;
use bastion::test_support::{
    FAKE_PASSWORD, FAKE_PASSWORD_DATA, FakeCloud, FakeLauncher, FixedSelector, RecordingNotifier,
    RecordingViewer, StaticLocator, test_settings,
};
use rstest::{fixture, rstest};

struct World {
    cloud: Arc<FakeCloud>,
    notifier: RecordingNotifier,
    viewer: RecordingViewer,
}

impl World {
    fn new(cloud: FakeCloud) -> Self {
        Self {
            cloud: Arc::new(cloud),
            notifier: RecordingNotifier::default(),
            viewer: RecordingViewer::default(),
        }
    }

    /// A fresh orchestrator per command, as each CLI invocation would build.
    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            CloudPorts::from_provider(Arc::clone(&self.cloud)),
            test_settings(),
            InterruptGate::new(),
        )
        .with_selector(Arc::new(FixedSelector::new(0)))
        .with_launcher(Arc::new(FakeLauncher::new()))
        .with_notifier(Arc::new(self.notifier.clone()))
        .with_viewer(Arc::new(self.viewer.clone()))
        .with_locator(Arc::new(StaticLocator::new()))
    }

    fn live_instances(&self) -> usize {
        self.cloud
            .created_requests()
            .len()
            .saturating_sub(self.cloud.terminated_instances().len())
    }
}

#[fixture]
fn spec() -> LaunchSpec {
    LaunchSpec::builder()
        .image("ami-0bastion")
        .instance_type("t3.micro")
        .subnet_id(Some(String::from("subnet-1")))
        .security_group(Some(String::from("sg-bastion")))
        .bootstrap("#!/bin/bash\n")
        .build()
        .unwrap_or_else(|err| panic!("spec should build: {err}"))
}

fn retained_session(outcome: &Result<bastion::orchestrator::SessionSummary, BastionError>) -> String {
    outcome
        .as_ref()
        .ok()
        .and_then(|summary| summary.session_id.clone())
        .unwrap_or_else(|| panic!("launch should succeed: {outcome:?}"))
}

#[rstest]
#[tokio::test]
async fn retained_linux_bastion_can_be_reused_then_terminated(spec: LaunchSpec) {
    let world = World::new(FakeCloud::new());

    let launched = world
        .orchestrator()
        .launch(&LaunchRequest {
            spec,
            policy: TerminationPolicy::Retain,
            expire_after: None,
            access: LinuxAccess::Shell,
        })
        .await;
    let session_id = retained_session(&launched.outcome);
    assert_eq!(world.live_instances(), 1);

    let reconnect = world
        .orchestrator()
        .start_session(&ConnectRequest {
            target: TargetSelector::SessionId(session_id.clone()),
            mode: ConnectMode::Shell,
        })
        .await;
    assert!(reconnect.outcome.is_ok(), "{:?}", reconnect.outcome);
    assert_eq!(world.live_instances(), 1);
    assert_eq!(world.cloud.started_sessions().len(), 2);

    let terminated = world.orchestrator().terminate(&session_id).await;
    assert!(terminated.outcome.is_ok(), "{:?}", terminated.outcome);
    assert!(terminated.teardown.is_clean());
    assert_eq!(world.live_instances(), 0);

    let again = world.orchestrator().terminate(&session_id).await;
    assert_eq!(
        again.outcome,
        Err(BastionError::SessionNotFound { session_id })
    );
}

#[rstest]
#[tokio::test]
async fn retained_windows_bastion_keeps_its_key_for_later_desktops(spec: LaunchSpec) {
    let world = World::new(FakeCloud::new().with_password_data(vec![
        FAKE_PASSWORD_DATA.to_owned(),
        FAKE_PASSWORD_DATA.to_owned(),
    ]));

    let launched = world
        .orchestrator()
        .launch_windows(&WindowsLaunchRequest {
            spec,
            policy: TerminationPolicy::Retain,
            expire_after: None,
            rdp: true,
            local_port: Some(56_389),
        })
        .await;
    let session_id = retained_session(&launched.outcome);
    assert!(world.cloud.key_pairs().is_empty());
    assert_eq!(world.cloud.parameter_names().len(), 1);

    let desktop = world
        .orchestrator()
        .start_session(&ConnectRequest {
            target: TargetSelector::SessionId(session_id.clone()),
            mode: ConnectMode::Rdp {
                local_port: Some(56_390),
                keypair_parameter: None,
            },
        })
        .await;
    assert!(desktop.outcome.is_ok(), "{:?}", desktop.outcome);
    let passwords = world
        .notifier
        .notices()
        .into_iter()
        .filter(|notice| {
            matches!(notice, Notice::Password { password, .. } if password == FAKE_PASSWORD)
        })
        .count();
    assert_eq!(passwords, 2);

    let terminated = world.orchestrator().terminate(&session_id).await;
    assert!(terminated.outcome.is_ok(), "{:?}", terminated.outcome);
    assert!(world.cloud.parameter_names().is_empty());
    assert_eq!(world.live_instances(), 0);
}
