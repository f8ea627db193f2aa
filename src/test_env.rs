// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::{
    collections::{BTreeMap, BTreeSet},
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    cloud::{Cloud, CloudError, CloudRegistry, LaunchRequest, StorageRequest},
    cluster::{Machine, Volume},
    config::{Documents, Settings},
    context::Context,
    host::Host,
    orchestrator::Orchestrator,
    remote::{CommandOutput, Transport, TransportError},
    retry::RetryPolicy,
    role::RoleRegistry,
    state::DescriptorStore,
};

/// Given a relative `path` in the test directory, prepend the
/// full path to the test directory.
fn test_path(path: &str) -> String {
    std::env::var("CARGO_MANIFEST_DIR").unwrap() + "/tests/" + path
}

pub const TOPOLOGIES: &str = r#"
[three_tier.driver.proxy.backend]

[shared.driver1.proxy1.backend]
[shared.driver2.proxy2.backend]

[flat.driver]
[flat.backend]
"#;

pub const IMPLEMENTATIONS: &str = r#"
[standard]
topology = "three_tier"
shared_storage = [{ name = "data", size_gb = 100, mount = "/data" }]

[standard.defaults]
cloud = "fake"
region = "r1"
instance_type = "small"

[standard.roles.backend]
instance_type = "large"
[standard.roles.backend.parameters]
install = "install-backend"
db_user = "bench"
database = "bench"
port = "5432"

[standard.roles.proxy]
[standard.roles.proxy.parameters]
install = "install-proxy"
post_install = "point-proxy {target_hosts}:{target_port}"
listen_port = "6432"

[standard.roles.driver]
count = 2
ephemeral = true
[standard.roles.driver.parameters]
install = "install-driver"
clean = "clean-driver"
stop = "stop-driver"

[triple_backend]
topology = "flat"

[triple_backend.defaults]
cloud = "fake"
region = "r1"

[triple_backend.roles.backend]
count = 3
[triple_backend.roles.backend.parameters]
port = "5432"

[triple_backend.roles.driver]
implementation = "driver"

[split]
topology = "three_tier"
shared_storage = [{ name = "data", size_gb = 10 }, { name = "logs", size_gb = 5 }]

[split.defaults]
cloud = "fake"
region = "r1"

[split.roles.backend]
[split.roles.proxy]
[split.roles.driver]
region = "r2"

[external]
topology = "flat"

[external.defaults]
cloud = "lab"

[external.roles.backend]
count = 3
hosts = ["db1.example.com:2222", "db2.example.com"]
[external.roles.backend.parameters]
port = "5432"

[external.roles.driver]
cloud = "fake"
region = "r1"

[shared]
topology = "shared"

[shared.defaults]
cloud = "fake"
region = "r1"

[shared.roles.backend]
count = 2
[shared.roles.proxy1]
implementation = "proxy"
[shared.roles.proxy1.parameters]
post_install = "point-proxy {target_hosts}"
listen_port = "6432"
[shared.roles.proxy2]
implementation = "proxy"
[shared.roles.proxy2.parameters]
post_install = "point-proxy {target_hosts}"
listen_port = "6433"
[shared.roles.driver1]
implementation = "driver"
[shared.roles.driver2]
implementation = "driver"
"#;

pub const CLOUDS: &str = r#"
[fake]
client = "fake"
user = "bench"

[fake.defaults]
image = "ubuntu-22.04"
instance_type = "tiny"

[lab]
client = "external"

[lab.defaults]
region = "lab"
managed = false
"#;

/// One call made through the [`FakeTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecRecord {
    pub host: String,
    pub script: String,
    pub sudo: bool,
}

/// A transport that never leaves the process. Every command succeeds unless the test scripted
/// something else for the host it runs on.
#[derive(Debug, Default)]
pub struct FakeTransport {
    records: Mutex<Vec<ExecRecord>>,
    exit_codes: Mutex<BTreeMap<String, i32>>,
    hangs: Mutex<BTreeSet<String>>,
    dropped_connections: Mutex<BTreeMap<String, u32>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        FakeTransport::default()
    }

    /// Make every command on `host` exit with `code`.
    pub fn fail_on(&self, host: &str, code: i32) {
        self.exit_codes
            .lock()
            .unwrap()
            .insert(host.to_string(), code);
    }

    /// Make every command on `host` run forever.
    pub fn hang_on(&self, host: &str) {
        self.hangs.lock().unwrap().insert(host.to_string());
    }

    /// Make the next `times` connections to `host` fail.
    pub fn drop_connections(&self, host: &str, times: u32) {
        self.dropped_connections
            .lock()
            .unwrap()
            .insert(host.to_string(), times);
    }

    pub fn records(&self) -> Vec<ExecRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Every script sent to `host`, in order.
    pub fn scripts_for(&self, host: &str) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|r| r.host == host)
            .map(|r| r.script)
            .collect()
    }

    /// Hosts that received a script containing `needle`.
    pub fn hosts_running(&self, needle: &str) -> BTreeSet<String> {
        self.records()
            .into_iter()
            .filter(|r| r.script.contains(needle))
            .map(|r| r.host)
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn exec(
        &self,
        host: &Host,
        script: &str,
        sudo: bool,
    ) -> Result<CommandOutput, TransportError> {
        self.records.lock().unwrap().push(ExecRecord {
            host: host.name().to_string(),
            script: script.to_string(),
            sudo,
        });

        if self.hangs.lock().unwrap().contains(host.name()) {
            std::future::pending::<()>().await;
        }

        {
            let mut dropped = self.dropped_connections.lock().unwrap();
            if let Some(remaining) = dropped.get_mut(host.name()) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TransportError::Connection {
                        host: host.to_string(),
                        message: "connection reset by peer".to_string(),
                    });
                }
            }
        }

        let code = self
            .exit_codes
            .lock()
            .unwrap()
            .get(host.name())
            .copied()
            .unwrap_or(0);
        Ok(CommandOutput {
            exit_status: Some(code),
            stdout: format!("{} done", host.name()),
            stderr: if code == 0 {
                String::new()
            } else {
                format!("exit {code}")
            },
        })
    }

    async fn copy(&self, host: &Host, local: &Path, remote: &str) -> Result<(), TransportError> {
        self.records.lock().unwrap().push(ExecRecord {
            host: host.name().to_string(),
            script: format!("copy {} {remote}", local.display()),
            sudo: false,
        });
        Ok(())
    }
}

/// A cloud that hands out made-up machines and remembers every call.
#[derive(Debug, Default)]
pub struct FakeCloud {
    next_address: Mutex<u32>,
    no_capacity: Mutex<BTreeSet<String>>,
    stuck: Mutex<BTreeSet<String>>,
    running: Mutex<bool>,
    launched: Mutex<Vec<String>>,
    volumes: Mutex<Vec<(String, String)>>,
    terminated: Mutex<Vec<String>>,
    destroyed: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
    started: Mutex<Vec<String>>,
    interrupt_on_launch: Mutex<Option<Context>>,
}

impl FakeCloud {
    pub fn new() -> Self {
        FakeCloud::default()
    }

    /// Make launching `instance` come back empty.
    pub fn no_capacity_for(&self, instance: &str) {
        self.no_capacity
            .lock()
            .unwrap()
            .insert(instance.to_string());
    }

    /// Let launching `instance` succeed again.
    pub fn restore_capacity(&self, instance: &str) {
        self.no_capacity.lock().unwrap().remove(instance);
    }

    /// Interrupt `context` as soon as the first instance has been launched, as if Ctrl-C had
    /// been pressed while allocation was running.
    pub fn interrupt_on_launch(&self, context: &Context) {
        *self.interrupt_on_launch.lock().unwrap() = Some(context.clone());
    }

    /// Make terminating `instance` fail.
    pub fn cannot_terminate(&self, instance: &str) {
        self.stuck.lock().unwrap().insert(instance.to_string());
    }

    /// Pretend that something is already running for every cluster.
    pub fn set_running(&self, running: bool) {
        *self.running.lock().unwrap() = running;
    }

    pub fn launched(&self) -> Vec<String> {
        self.launched.lock().unwrap().clone()
    }

    /// (environment, volume name) for every volume created.
    pub fn volumes(&self) -> Vec<(String, String)> {
        self.volumes.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> Vec<String> {
        self.terminated.lock().unwrap().clone()
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl Cloud for FakeCloud {
    async fn launch_instance(&self, request: &LaunchRequest) -> Result<Option<Machine>, CloudError> {
        self.launched.lock().unwrap().push(request.name.clone());
        if self.no_capacity.lock().unwrap().contains(&request.name) {
            return Ok(None);
        }

        let n = {
            let mut next = self.next_address.lock().unwrap();
            *next += 1;
            *next
        };
        let mut machine = request.machine(&format!("i-{n:04}"));
        machine.public_address = Some(format!("10.0.0.{n}"));
        machine.private_address = Some(format!("192.168.0.{n}"));
        machine.provisioned = true;
        if let Some(context) = self.interrupt_on_launch.lock().unwrap().as_ref() {
            context.interrupt();
        }
        Ok(Some(machine))
    }

    async fn terminate_instance(&self, machine: &Machine) -> Result<(), CloudError> {
        if self.stuck.lock().unwrap().contains(&machine.name) {
            return Err(CloudError::CommandFailed {
                command: "fake terminate".to_string(),
                status: Some(1),
                stderr: format!("{} is stuck", machine.id),
            });
        }
        self.terminated.lock().unwrap().push(machine.name.clone());
        Ok(())
    }

    async fn start_instance(&self, machine: &Machine) -> Result<Machine, CloudError> {
        self.started.lock().unwrap().push(machine.name.clone());
        Ok(machine.clone())
    }

    async fn stop_instance(&self, machine: &Machine) -> Result<(), CloudError> {
        self.stopped.lock().unwrap().push(machine.name.clone());
        Ok(())
    }

    async fn launch_storage(&self, request: &StorageRequest) -> Result<Volume, CloudError> {
        self.volumes
            .lock()
            .unwrap()
            .push((request.environment.name.clone(), request.spec.name.clone()));
        Ok(Volume {
            id: format!("vol-{}-{}", request.environment.name, request.spec.name),
            name: request.spec.name.clone(),
            environment: request.environment.name.clone(),
            size_gb: request.spec.size_gb,
            mount: request.spec.mount.clone(),
            shared: true,
        })
    }

    async fn destroy_storage(&self, volume: &Volume) -> Result<(), CloudError> {
        self.destroyed.lock().unwrap().push(volume.id.clone());
        Ok(())
    }

    async fn is_running(&self, _cluster: &str) -> Result<bool, CloudError> {
        Ok(*self.running.lock().unwrap())
    }
}

/// A TestEnvironment holds all the information needed to access a test's runtime state: a
/// "private" working directory for descriptors, plus the fake cloud and transport every
/// orchestrator built from it shares.
pub struct TestEnvironment {
    /// The name of the test, used to determine its private directory for holding test state.
    pub test_id: String,

    /// The path to this test's private working directory.
    private_dir_path: PathBuf,

    pub cloud: Arc<FakeCloud>,
    pub transport: Arc<FakeTransport>,
}

impl TestEnvironment {
    /// Set up an environment for a test named `test_id`.
    pub fn new(test_id: &str) -> Self {
        let private_dir_path = PathBuf::from(test_path(&format!("test_output/{test_id}")));
        // Start by emptying out the test's private directory, so that files from a previous test
        // run don't impact this run:
        match std::fs::remove_dir_all(&private_dir_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => panic!("Could not clean up test directory: {e}"),
        };
        std::fs::create_dir_all(&private_dir_path).unwrap();

        Self {
            test_id: test_id.to_string(),
            private_dir_path,
            cloud: Arc::new(FakeCloud::new()),
            transport: Arc::new(FakeTransport::new()),
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.private_dir_path.join("state")
    }

    /// Settings that keep tests fast: a small pool and quick retries.
    pub fn settings() -> Settings {
        Settings {
            parallelism: Some(4),
            command_timeout_secs: 5,
            cloud_timeout_secs: 5,
            remote_retry: RetryPolicy::constant(3, Duration::from_millis(10)),
            cloud_retry: RetryPolicy::once(),
            ..Settings::default()
        }
    }

    pub fn context(&self) -> Context {
        Context::new(Self::settings(), &self.private_dir_path, &self.state_dir())
    }

    pub fn documents(&self) -> Documents {
        Documents::from_strs(TOPOLOGIES, IMPLEMENTATIONS, CLOUDS).unwrap()
    }

    pub fn store(&self) -> DescriptorStore {
        DescriptorStore::new(self.state_dir())
    }

    /// Registry with the built-in clients plus `fake`, which always hands out this
    /// environment's [`FakeCloud`].
    pub fn cloud_registry(&self) -> CloudRegistry {
        let mut registry = CloudRegistry::with_builtins();
        let cloud = Arc::clone(&self.cloud);
        registry.register("fake", move |_, _, _| {
            Ok(Arc::clone(&cloud) as Arc<dyn Cloud>)
        });
        registry
    }

    pub fn orchestrator_with(&self, context: Context, roles: RoleRegistry) -> Orchestrator {
        Orchestrator::new(
            context,
            self.documents().clouds,
            self.cloud_registry(),
            roles,
            Arc::clone(&self.transport) as Arc<dyn Transport>,
        )
    }

    pub fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with(self.context(), RoleRegistry::with_builtins())
    }
}
