//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use crate::channel::{
    ChannelError, DataPlaneCommand, ExitReport, LaunchFuture, ProcessLauncher, ProgramLocator,
    Viewer, ViewerFuture,
};
use crate::config::{AwsContext, DEFAULT_INSTANCE_PROFILE, Settings};
use crate::identity::TAG_SESSION_ID;
use crate::interrupt::InterruptGate;
use crate::orchestrator::{Notice, Notifier};
use crate::provision::{PricingMode, VolumeSpec};
use crate::provider::{
    BrokerSession, ComputeApi, CreateInstanceRequest, CreatedKeyPair, DatabaseTarget,
    IdentityService, IngressRule, InstanceDescription, InstanceHealth, InstanceState,
    ManagedInstance, ParameterStore, ProviderError, ProviderFuture, SecurityGroup, SessionBroker,
    StartSessionRequest, Subnet, TargetDirectory,
};
use crate::runner::{CommandOutput, CommandRunner, RunnerError, RunnerFuture};
use crate::select::{SelectionError, Selector};
use crate::wait::PollPolicy;

/// Private key handed out by [`FakeCloud::create_key_pair`].
pub const FAKE_PRIVATE_KEY: &str = include_str!("../tests/fixtures/windows_key.pem");

/// Password blob encrypted for [`FAKE_PRIVATE_KEY`].
pub const FAKE_PASSWORD_DATA: &str = include_str!("../tests/fixtures/windows_password.b64");

/// Clear text of [`FAKE_PASSWORD_DATA`].
pub const FAKE_PASSWORD: &str = "Xy7!bastion-Pa55";

/// Caller identity reported by [`FakeCloud`].
pub const FAKE_CALLER: &str = "tester";

fn lock<T>(mutex: &StdMutex<T>) -> StdMutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<StdMutex<VecDeque<Result<CommandOutput, RunnerError>>>>,
    invocations: Arc<StdMutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Value following `flag`, if present.
    #[must_use]
    pub fn flag_value(&self, flag: &str) -> Option<String> {
        self.args
            .iter()
            .skip_while(|arg| arg.as_os_str() != flag)
            .nth(1)
            .map(|value| value.to_string_lossy().into_owned())
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful response carrying `stdout`.
    pub fn push_json(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Pushes a failing response as printed by the AWS CLI.
    pub fn push_error(&self, stderr: impl Into<String>) {
        self.push_output(Some(254), "", stderr);
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(Ok(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }));
    }

    /// Pushes a runner failure such as a timeout.
    pub fn push_runner_error(&self, error: RunnerError) {
        lock(&self.responses).push_back(Err(error));
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> RunnerFuture<'a> {
        Box::pin(async move {
            lock(&self.invocations).push(CommandInvocation {
                program: program.to_owned(),
                args: args.to_vec(),
            });
            lock(&self.responses)
                .pop_front()
                .unwrap_or_else(|| {
                    Err(RunnerError::Spawn {
                        program: program.to_owned(),
                        message: String::from("no scripted response available"),
                    })
                })
        })
    }
}

/// Builds an [`InstanceHealth`] from provider strings.
#[must_use]
pub fn health(state: &str, instance_status: &str, system_status: &str) -> InstanceHealth {
    InstanceHealth {
        state: InstanceState::from(state),
        instance_status: instance_status.into(),
        system_status: system_status.into(),
    }
}

/// Settings with millisecond poll intervals.
#[must_use]
pub fn test_settings() -> Settings {
    let tick = Duration::from_millis(1);
    Settings {
        aws: AwsContext {
            region: String::from("eu-west-1"),
            profile: None,
        },
        aws_bin: String::from("aws"),
        plugin_bin: String::from("session-manager-plugin"),
        ssh_bin: String::from("ssh"),
        instance_profile: DEFAULT_INSTANCE_PROFILE.to_owned(),
        command_timeout: Duration::from_secs(5),
        readiness: PollPolicy::fixed_attempts(tick, 20),
        negotiation: PollPolicy::fixed_attempts(tick, 10),
        password: PollPolicy::fixed_attempts(tick, 5),
        viewer_port: PollPolicy::fixed_attempts(tick, 2),
    }
}

#[derive(Clone, Debug)]
struct FakeInstance {
    request: CreateInstanceRequest,
    terminated: bool,
    seeded: bool,
}

#[derive(Debug)]
struct FakeState {
    calls: Vec<String>,
    failures: HashMap<String, VecDeque<ProviderError>>,
    interrupts: HashMap<String, InterruptGate>,
    health_script: VecDeque<InstanceHealth>,
    password_data: VecDeque<String>,
    architectures: Vec<String>,
    parameters: BTreeMap<String, String>,
    subnets: Vec<Subnet>,
    security_groups: HashMap<String, Vec<SecurityGroup>>,
    databases: Vec<DatabaseTarget>,
    managed_instances: Vec<ManagedInstance>,
    rules: Vec<IngressRule>,
    instances: BTreeMap<String, FakeInstance>,
    key_pairs: BTreeSet<String>,
    started_sessions: Vec<StartSessionRequest>,
    terminated_sessions: Vec<String>,
    profiles: BTreeSet<String>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            failures: HashMap::new(),
            interrupts: HashMap::new(),
            health_script: VecDeque::new(),
            password_data: VecDeque::new(),
            architectures: vec![String::from("x86_64")],
            parameters: BTreeMap::new(),
            subnets: Vec::new(),
            security_groups: HashMap::new(),
            databases: Vec::new(),
            managed_instances: Vec::new(),
            rules: Vec::new(),
            instances: BTreeMap::new(),
            key_pairs: BTreeSet::new(),
            started_sessions: Vec::new(),
            terminated_sessions: Vec::new(),
            profiles: BTreeSet::new(),
        }
    }
}

/// In-memory cloud implementing every provider port.
///
/// Calls are recorded as `"<operation> <argument>"`. Failures queued with
/// [`FakeCloud::fail_next`] are returned in order by the named operation
/// before it touches any state.
#[derive(Clone, Debug, Default)]
pub struct FakeCloud {
    state: Arc<StdMutex<FakeState>>,
}

impl FakeCloud {
    /// Creates an empty cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StdMutexGuard<'_, FakeState> {
        lock(&self.state)
    }

    /// Records a call and returns the next queued failure for it, if any.
    fn enter(&self, operation: &str, argument: &str) -> Result<StdMutexGuard<'_, FakeState>, ProviderError> {
        let mut state = self.state();
        state.calls.push(format!("{operation} {argument}"));
        if let Some(gate) = state.interrupts.get(operation) {
            gate.trigger();
        }
        let queued = state
            .failures
            .get_mut(operation)
            .and_then(VecDeque::pop_front);
        match queued {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }

    /// Queues `error` for the next call to `operation`.
    #[must_use]
    pub fn fail_next(self, operation: &str, error: ProviderError) -> Self {
        self.state()
            .failures
            .entry(operation.to_owned())
            .or_default()
            .push_back(error);
        self
    }

    /// Delivers an interrupt through `gate` each time `operation` is called.
    ///
    /// The operation still completes, so the interrupt lands while the call
    /// is in flight.
    #[must_use]
    pub fn interrupting_during(self, operation: &str, gate: InterruptGate) -> Self {
        self.state().interrupts.insert(operation.to_owned(), gate);
        self
    }

    /// Health snapshots returned in order; the last one repeats.
    #[must_use]
    pub fn with_health_script(self, script: Vec<InstanceHealth>) -> Self {
        self.state().health_script = script.into();
        self
    }

    /// Password blobs returned in order; empty once exhausted.
    #[must_use]
    pub fn with_password_data(self, blobs: Vec<String>) -> Self {
        self.state().password_data = blobs.into();
        self
    }

    /// Architectures reported for every instance class.
    #[must_use]
    pub fn with_architectures(self, architectures: &[&str]) -> Self {
        self.state().architectures = architectures.iter().map(|arch| (*arch).to_owned()).collect();
        self
    }

    /// Seeds a parameter.
    #[must_use]
    pub fn with_parameter(self, name: &str, value: &str) -> Self {
        self.state()
            .parameters
            .insert(name.to_owned(), value.to_owned());
        self
    }

    /// Seeds the subnet list.
    #[must_use]
    pub fn with_subnets(self, subnets: Vec<Subnet>) -> Self {
        self.state().subnets = subnets;
        self
    }

    /// Seeds the security groups of a network.
    #[must_use]
    pub fn with_security_groups(self, vpc_id: &str, groups: Vec<SecurityGroup>) -> Self {
        self.state()
            .security_groups
            .insert(vpc_id.to_owned(), groups);
        self
    }

    /// Seeds the database directory.
    #[must_use]
    pub fn with_databases(self, databases: Vec<DatabaseTarget>) -> Self {
        self.state().databases = databases;
        self
    }

    /// Seeds the managed instance directory.
    #[must_use]
    pub fn with_managed_instances(self, instances: Vec<ManagedInstance>) -> Self {
        self.state().managed_instances = instances;
        self
    }

    /// Seeds a live instance carrying a session tag.
    #[must_use]
    pub fn with_session_instance(self, instance_id: &str, session_id: &str) -> Self {
        let request = CreateInstanceRequest {
            image_id: String::from("ami-00000000"),
            instance_type: String::from("t3.micro"),
            subnet_id: None,
            security_group_ids: Vec::new(),
            associate_public_ip: true,
            volume: VolumeSpec::default(),
            pricing: PricingMode::default(),
            user_data: String::new(),
            instance_profile: None,
            key_name: None,
            tags: vec![(TAG_SESSION_ID.to_owned(), session_id.to_owned())],
        };
        self.state().instances.insert(
            instance_id.to_owned(),
            FakeInstance {
                request,
                terminated: false,
                seeded: true,
            },
        );
        self
    }

    /// Every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of calls made to `operation`.
    #[must_use]
    pub fn count(&self, operation: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.split_whitespace().next() == Some(operation))
            .count()
    }

    /// Ingress rules currently present.
    #[must_use]
    pub fn rules(&self) -> Vec<IngressRule> {
        self.state().rules.clone()
    }

    /// Create requests issued so far.
    #[must_use]
    pub fn created_requests(&self) -> Vec<CreateInstanceRequest> {
        self.state()
            .instances
            .values()
            .filter(|instance| !instance.seeded)
            .map(|instance| instance.request.clone())
            .collect()
    }

    /// Ids of instances that were terminated.
    #[must_use]
    pub fn terminated_instances(&self) -> Vec<String> {
        self.state()
            .instances
            .iter()
            .filter(|(_, instance)| instance.terminated)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Broker sessions that were started.
    #[must_use]
    pub fn started_sessions(&self) -> Vec<StartSessionRequest> {
        self.state().started_sessions.clone()
    }

    /// Broker sessions that were terminated.
    #[must_use]
    pub fn terminated_sessions(&self) -> Vec<String> {
        self.state().terminated_sessions.clone()
    }

    /// Key pairs currently registered.
    #[must_use]
    pub fn key_pairs(&self) -> Vec<String> {
        self.state().key_pairs.iter().cloned().collect()
    }

    /// Names of stored parameters.
    #[must_use]
    pub fn parameter_names(&self) -> Vec<String> {
        self.state().parameters.keys().cloned().collect()
    }

    /// Instance profiles ensured so far.
    #[must_use]
    pub fn ensured_profiles(&self) -> Vec<String> {
        self.state().profiles.iter().cloned().collect()
    }
}

fn not_found(what: &str) -> ProviderError {
    ProviderError::NotFound {
        message: format!("{what} does not exist"),
    }
}

fn same_tuple(left: &IngressRule, right: &IngressRule) -> bool {
    left.group_id == right.group_id
        && left.source_group_id == right.source_group_id
        && left.protocol == right.protocol
        && left.port == right.port
}

impl ComputeApi for FakeCloud {
    fn run_instance<'a>(&'a self, request: &'a CreateInstanceRequest) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            let mut state = self.enter("run_instance", &request.image_id)?;
            let instance_id = format!("i-{:017x}", state.instances.len().saturating_add(1));
            state.instances.insert(
                instance_id.clone(),
                FakeInstance {
                    request: request.clone(),
                    terminated: false,
                    seeded: false,
                },
            );
            Ok(instance_id)
        })
    }

    fn describe_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, Option<InstanceDescription>> {
        Box::pin(async move {
            let state = self.enter("describe_instance", instance_id)?;
            Ok(state.instances.get(instance_id).map(|instance| InstanceDescription {
                instance_id: instance_id.to_owned(),
                state: if instance.terminated {
                    String::from("terminated")
                } else {
                    String::from("running")
                },
                security_group_ids: instance.request.security_group_ids.clone(),
                tags: instance.request.tags.iter().cloned().collect(),
            }))
        })
    }

    fn describe_health<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, Option<InstanceHealth>> {
        Box::pin(async move {
            let mut state = self.enter("describe_health", instance_id)?;
            let snapshot = if state.health_script.len() > 1 {
                state.health_script.pop_front()
            } else {
                state.health_script.front().cloned()
            };
            Ok(Some(snapshot.unwrap_or_else(|| health("running", "ok", "ok"))))
        })
    }

    fn terminate_instance<'a>(&'a self, instance_id: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.enter("terminate_instance", instance_id)?;
            let instance = state
                .instances
                .get_mut(instance_id)
                .ok_or_else(|| not_found(instance_id))?;
            instance.terminated = true;
            Ok(())
        })
    }

    fn supported_architectures<'a>(
        &'a self,
        instance_type: &'a str,
    ) -> ProviderFuture<'a, Vec<String>> {
        Box::pin(async move {
            let state = self.enter("supported_architectures", instance_type)?;
            Ok(state.architectures.clone())
        })
    }

    fn list_subnets(&self) -> ProviderFuture<'_, Vec<Subnet>> {
        Box::pin(async move {
            let state = self.enter("list_subnets", "")?;
            Ok(state.subnets.clone())
        })
    }

    fn describe_subnet<'a>(&'a self, subnet_id: &'a str) -> ProviderFuture<'a, Subnet> {
        Box::pin(async move {
            let state = self.enter("describe_subnet", subnet_id)?;
            state
                .subnets
                .iter()
                .find(|subnet| subnet.subnet_id == subnet_id)
                .cloned()
                .ok_or_else(|| not_found(subnet_id))
        })
    }

    fn list_security_groups<'a>(
        &'a self,
        vpc_id: &'a str,
    ) -> ProviderFuture<'a, Vec<SecurityGroup>> {
        Box::pin(async move {
            let state = self.enter("list_security_groups", vpc_id)?;
            Ok(state.security_groups.get(vpc_id).cloned().unwrap_or_default())
        })
    }

    fn authorize_ingress<'a>(&'a self, rule: &'a IngressRule) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.enter("authorize_ingress", &rule.group_id)?;
            if state.rules.iter().any(|existing| same_tuple(existing, rule)) {
                return Err(ProviderError::AlreadyExists {
                    message: String::from("InvalidPermission.Duplicate"),
                });
            }
            state.rules.push(rule.clone());
            Ok(())
        })
    }

    fn revoke_ingress<'a>(&'a self, rule: &'a IngressRule) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.enter("revoke_ingress", &rule.group_id)?;
            let before = state.rules.len();
            state.rules.retain(|existing| !same_tuple(existing, rule));
            if state.rules.len() == before {
                return Err(not_found("ingress rule"));
            }
            Ok(())
        })
    }

    fn create_key_pair<'a>(
        &'a self,
        key_name: &'a str,
        _tags: &'a [(String, String)],
    ) -> ProviderFuture<'a, CreatedKeyPair> {
        Box::pin(async move {
            let mut state = self.enter("create_key_pair", key_name)?;
            if !state.key_pairs.insert(key_name.to_owned()) {
                return Err(ProviderError::AlreadyExists {
                    message: format!("key pair {key_name} already exists"),
                });
            }
            Ok(CreatedKeyPair {
                key_name: key_name.to_owned(),
                private_key_pem: FAKE_PRIVATE_KEY.to_owned(),
            })
        })
    }

    fn delete_key_pair<'a>(&'a self, key_name: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.enter("delete_key_pair", key_name)?;
            state.key_pairs.remove(key_name);
            Ok(())
        })
    }

    fn password_data<'a>(&'a self, instance_id: &'a str) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            let mut state = self.enter("password_data", instance_id)?;
            Ok(state.password_data.pop_front().unwrap_or_default())
        })
    }

    fn find_session_instance<'a>(
        &'a self,
        session_id: &'a str,
    ) -> ProviderFuture<'a, Option<String>> {
        Box::pin(async move {
            let state = self.enter("find_session_instance", session_id)?;
            Ok(state
                .instances
                .iter()
                .find(|(_, instance)| {
                    !instance.terminated
                        && instance
                            .request
                            .tags
                            .iter()
                            .any(|(key, value)| key == TAG_SESSION_ID && value == session_id)
                })
                .map(|(id, _)| id.clone()))
        })
    }
}

impl ParameterStore for FakeCloud {
    fn get_parameter<'a>(&'a self, name: &'a str, _decrypt: bool) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            let state = self.enter("get_parameter", name)?;
            state.parameters.get(name).cloned().ok_or_else(|| not_found(name))
        })
    }

    fn put_secure_parameter<'a>(
        &'a self,
        name: &'a str,
        value: &'a str,
        _tags: &'a [(String, String)],
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.enter("put_secure_parameter", name)?;
            if state.parameters.contains_key(name) {
                return Err(ProviderError::AlreadyExists {
                    message: format!("parameter {name} already exists"),
                });
            }
            state.parameters.insert(name.to_owned(), value.to_owned());
            Ok(())
        })
    }

    fn delete_parameter<'a>(&'a self, name: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.enter("delete_parameter", name)?;
            state.parameters.remove(name).map(|_| ()).ok_or_else(|| not_found(name))
        })
    }
}

impl SessionBroker for FakeCloud {
    fn start_session<'a>(
        &'a self,
        request: &'a StartSessionRequest,
    ) -> ProviderFuture<'a, BrokerSession> {
        Box::pin(async move {
            let mut state = self.enter("start_session", &request.target)?;
            state.started_sessions.push(request.clone());
            let number = state.started_sessions.len();
            Ok(BrokerSession {
                session_id: format!("{FAKE_CALLER}-{number}"),
                token_value: String::from("token"),
                stream_url: format!("wss://ssmmessages.eu-west-1.amazonaws.com/v1/data-channel/{number}"),
                endpoint: String::from("https://ssm.eu-west-1.amazonaws.com"),
            })
        })
    }

    fn terminate_session<'a>(&'a self, session_id: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.enter("terminate_session", session_id)?;
            state.terminated_sessions.push(session_id.to_owned());
            Ok(())
        })
    }
}

impl IdentityService for FakeCloud {
    fn caller_identity(&self) -> ProviderFuture<'_, String> {
        Box::pin(async move {
            self.enter("caller_identity", "")?;
            Ok(FAKE_CALLER.to_owned())
        })
    }

    fn ensure_instance_profile<'a>(&'a self, profile_name: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.enter("ensure_instance_profile", profile_name)?;
            state.profiles.insert(profile_name.to_owned());
            Ok(())
        })
    }
}

impl TargetDirectory for FakeCloud {
    fn list_databases(&self) -> ProviderFuture<'_, Vec<DatabaseTarget>> {
        Box::pin(async move {
            let state = self.enter("list_databases", "")?;
            Ok(state.databases.clone())
        })
    }

    fn list_managed_instances(&self) -> ProviderFuture<'_, Vec<ManagedInstance>> {
        Box::pin(async move {
            let state = self.enter("list_managed_instances", "")?;
            Ok(state.managed_instances.clone())
        })
    }
}

#[derive(Debug)]
struct LauncherState {
    commands: Vec<DataPlaneCommand>,
    exit: ExitReport,
    failure: Option<String>,
    interrupt: Option<InterruptGate>,
    interrupts_cancelled: Vec<bool>,
}

/// Launcher that records commands instead of running them.
#[derive(Clone, Debug)]
pub struct FakeLauncher {
    state: Arc<StdMutex<LauncherState>>,
}

impl Default for FakeLauncher {
    fn default() -> Self {
        Self {
            state: Arc::new(StdMutex::new(LauncherState {
                commands: Vec::new(),
                exit: ExitReport::success(),
                failure: None,
                interrupt: None,
                interrupts_cancelled: Vec::new(),
            })),
        }
    }
}

impl FakeLauncher {
    /// Creates a launcher whose children exit cleanly.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Children exit with `report`.
    #[must_use]
    pub fn exiting_with(self, report: ExitReport) -> Self {
        lock(&self.state).exit = report;
        self
    }

    /// Children fail to start with `message`.
    #[must_use]
    pub fn failing(self, message: &str) -> Self {
        lock(&self.state).failure = Some(message.to_owned());
        self
    }

    /// Delivers an interrupt through `gate` while each child runs.
    #[must_use]
    pub fn interrupting(self, gate: InterruptGate) -> Self {
        lock(&self.state).interrupt = Some(gate);
        self
    }

    /// Commands launched so far.
    #[must_use]
    pub fn commands(&self) -> Vec<DataPlaneCommand> {
        lock(&self.state).commands.clone()
    }

    /// For each interrupt delivered, whether it cancelled the flow.
    #[must_use]
    pub fn interrupts_cancelled(&self) -> Vec<bool> {
        lock(&self.state).interrupts_cancelled.clone()
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch<'a>(&'a self, command: &'a DataPlaneCommand) -> LaunchFuture<'a> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.commands.push(command.clone());
            if let Some(gate) = state.interrupt.clone() {
                let cancelled = gate.trigger();
                state.interrupts_cancelled.push(cancelled);
            }
            if let Some(message) = &state.failure {
                return Err(ChannelError::Launch {
                    program: command.program.clone(),
                    message: message.clone(),
                });
            }
            Ok(state.exit)
        })
    }
}

/// Selector that always picks the same index.
#[derive(Clone, Debug, Default)]
pub struct FixedSelector {
    choice: Option<usize>,
    prompts: Arc<StdMutex<Vec<String>>>,
}

impl FixedSelector {
    /// Picks `index` every time.
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self {
            choice: Some(index),
            prompts: Arc::default(),
        }
    }

    /// Declines every prompt.
    #[must_use]
    pub fn declining() -> Self {
        Self::default()
    }

    /// Prompts shown so far.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }
}

impl Selector for FixedSelector {
    fn select(&self, prompt: &str, options: &[String]) -> Result<usize, SelectionError> {
        lock(&self.prompts).push(prompt.to_owned());
        if options.is_empty() {
            return Err(SelectionError::Empty {
                prompt: prompt.to_owned(),
            });
        }
        self.choice
            .filter(|index| *index < options.len())
            .ok_or_else(|| SelectionError::Cancelled {
                prompt: prompt.to_owned(),
            })
    }
}

/// Notifier that keeps every notice.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    notices: Arc<StdMutex<Vec<Notice>>>,
}

impl RecordingNotifier {
    /// Notices delivered so far.
    #[must_use]
    pub fn notices(&self) -> Vec<Notice> {
        lock(&self.notices).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: &Notice) {
        lock(&self.notices).push(notice.clone());
    }
}

/// Viewer that records the ports it was asked to open.
#[derive(Clone, Debug, Default)]
pub struct RecordingViewer {
    opened: Arc<StdMutex<Vec<u16>>>,
}

impl RecordingViewer {
    /// Ports opened so far.
    #[must_use]
    pub fn opened(&self) -> Vec<u16> {
        lock(&self.opened).clone()
    }
}

impl Viewer for RecordingViewer {
    fn open(&self, local_port: u16) -> ViewerFuture<'_> {
        Box::pin(async move {
            lock(&self.opened).push(local_port);
            Ok(())
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

/// Locator that finds every program except the ones marked missing.
#[derive(Clone, Debug, Default)]
pub struct StaticLocator {
    missing: BTreeSet<String>,
}

impl StaticLocator {
    /// Creates a locator that finds everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports `program` as not installed.
    #[must_use]
    pub fn without(mut self, program: &str) -> Self {
        self.missing.insert(program.to_owned());
        self
    }
}

impl ProgramLocator for StaticLocator {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        if self.missing.contains(program) {
            None
        } else {
            Some(PathBuf::from("/usr/local/bin").join(program))
        }
    }
}
