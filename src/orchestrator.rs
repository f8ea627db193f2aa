// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Drives a cluster through its lifecycle: configure, allocate, make, install, and eventually
//! clean.
//!
//! Every operation loads the cluster descriptor fresh, checks that the operation is legal in the
//! cluster's current state, does its work, and saves the descriptor again before returning. Work
//! that is done per instance (launching, terminating, starting, stopping) goes through a bounded
//! worker pool. Members are only ever added to or removed from the descriptor once every job of
//! a phase has finished.

use std::{
    collections::{BTreeMap, BTreeSet},
    future::Future,
    sync::Arc,
};

use {
    futures::future,
    log::{debug, error, info, warn},
    thiserror::Error,
    tokio::{sync::Semaphore, task::JoinSet},
};

use crate::{
    cloud::{external, Cloud, CloudError, CloudRegistry, LaunchRequest, StorageRequest},
    cluster::{ClusterDescriptor, ConnectionTarget, Environment, Machine, Volume},
    config::{CloudConfig, ConfigError, Documents},
    context::Context,
    host::{Host, NodeGroup},
    remote::{ExecOptions, RemoteCommand, RemoteError, RemoteExecutor, Transport},
    role::{Role, RoleContext, RoleError, RoleRegistry},
    state::{ClusterState, IllegalTransition, Operation, StoreError},
    topology::{TopologyError, TopologyTree},
};

/// Baseline preparation run by `make` when the settings do not provide a script.
pub const DEFAULT_MAKE_SCRIPT: &str = "\
if command -v apt-get >/dev/null 2>&1; then
    export DEBIAN_FRONTEND=noninteractive
    apt-get update -q
    apt-get install -q -y chrony curl rsync
elif command -v dnf >/dev/null 2>&1; then
    dnf install -q -y chrony curl rsync
fi
systemctl enable --now chronyd 2>/dev/null || systemctl enable --now chrony 2>/dev/null || true
sysctl -q -w net.core.somaxconn=4096
sysctl -q -w net.ipv4.ip_local_port_range='1024 65000'";

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Transition(#[from] IllegalTransition),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Role(#[from] RoleError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("cluster '{0}' is already configured; use --force to configure it again")]
    AlreadyConfigured(String),

    #[error("cluster '{cluster}' is {state} and may hold machines or volumes; clean it first")]
    HoldsResources { cluster: String, state: ClusterState },

    #[error("cluster '{cluster}' is already running in environment '{environment}'")]
    AlreadyRunning {
        cluster: String,
        environment: String,
    },

    #[error("environment '{environment}' uses cloud '{cloud}', which is not configured")]
    UnknownCloud { environment: String, cloud: String },

    #[error("member '{0}' has no address")]
    NoAddress(String),

    #[error("allocation of cluster '{cluster}' failed for: {}", .failed.join(", "))]
    AllocationFailed {
        cluster: String,
        failed: Vec<String>,
    },

    #[error("{phase} failed: {}", .failures.join("; "))]
    PhaseFailed {
        phase: &'static str,
        failures: Vec<String>,
    },

    #[error("could not tear down all of cluster '{cluster}'; still present: {}", .remaining.join(", "))]
    CleanupFailed {
        cluster: String,
        remaining: Vec<String>,
    },

    #[error("interrupted")]
    Interrupted,
}

/// A role implementation together with where it lives.
struct RoleEntry {
    role: String,
    environment: String,
    implementation: Arc<dyn Role>,
}

pub struct Orchestrator {
    context: Context,
    clouds: BTreeMap<String, CloudConfig>,
    cloud_registry: CloudRegistry,
    role_registry: RoleRegistry,
    executor: Arc<RemoteExecutor>,
}

impl Orchestrator {
    pub fn new(
        context: Context,
        clouds: BTreeMap<String, CloudConfig>,
        cloud_registry: CloudRegistry,
        role_registry: RoleRegistry,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let executor = Arc::new(RemoteExecutor::new(transport, Arc::clone(&context.metrics)));
        Orchestrator {
            context,
            clouds,
            cloud_registry,
            role_registry,
            executor,
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Create the descriptor for a new cluster from the configuration documents.
    ///
    /// The topology is expanded before any cloud is asked anything, so configuration mistakes
    /// are reported without side effects.
    pub async fn configure(
        &self,
        cluster: &str,
        documents: &Documents,
        implementation: &str,
        force: bool,
    ) -> Result<ClusterDescriptor, OrchestratorError> {
        self.check_interrupted()?;
        let store = self.context.store();
        if store.exists(cluster)? {
            if !force {
                return Err(OrchestratorError::AlreadyConfigured(cluster.to_string()));
            }
            // Replacing a descriptor that still tracks machines or volumes would orphan them.
            let existing = store.load(cluster)?;
            if existing.state != ClusterState::NotReady
                || !existing.members.is_empty()
                || !existing.shared_storage.is_empty()
            {
                return Err(OrchestratorError::HoldsResources {
                    cluster: cluster.to_string(),
                    state: existing.state,
                });
            }
            warn!("replacing the existing descriptor of cluster '{cluster}'");
        }

        let plan = documents.plan(implementation)?;
        let mut tree = TopologyTree::from_template(&plan.topology);
        let topology_map = tree.expand(|role| plan.count_of(role))?;

        for env in &plan.environments {
            let cloud = self.build_cloud(env, &documents.clouds)?;
            if cloud.is_running(cluster).await? {
                return Err(OrchestratorError::AlreadyRunning {
                    cluster: cluster.to_string(),
                    environment: env.name.clone(),
                });
            }
        }

        let mut descriptor = ClusterDescriptor::new(
            cluster,
            implementation,
            &plan.topology_name,
            plan.topology.clone(),
        );
        descriptor.topology_map = topology_map;
        descriptor.environments = plan.environments;
        descriptor.components = plan.components;
        descriptor.volume_specs = plan.shared_storage;

        store.save(&descriptor)?;
        info!(
            "configured cluster '{cluster}' with {} instance(s) in {} environment(s)",
            descriptor.instances().count(),
            descriptor.environments.len()
        );
        Ok(descriptor)
    }

    /// Launch every instance that does not have a machine yet, plus any missing shared volumes.
    pub async fn allocate(
        &self,
        cluster: &str,
        force: bool,
    ) -> Result<ClusterDescriptor, OrchestratorError> {
        let store = self.context.store();
        let mut descriptor = store.load(cluster)?;
        descriptor.state.check(cluster, Operation::Allocate { force })?;
        self.check_interrupted()?;
        let clouds = self.clouds_for(&descriptor.environments)?;

        let mut failed: Vec<String> = Vec::new();
        let mut launched: Vec<Machine> = Vec::new();
        let mut launches = Vec::new();
        let mut provisioned_envs = BTreeSet::new();

        for (name, role) in descriptor.missing_instances() {
            let (env, params) = descriptor
                .component(&role)
                .ok_or_else(|| TopologyError::MissingRole(role.clone()))?;
            let index = descriptor
                .instances_of(&role)
                .iter()
                .position(|n| *n == name)
                .unwrap_or(0);
            let request = LaunchRequest {
                cluster: cluster.to_string(),
                name: name.clone(),
                index,
                environment: env.clone(),
                params: params.clone(),
            };

            if !params.managed {
                match external::fake_machine(&request) {
                    Some(machine) => launched.push(machine),
                    None => failed.push(name),
                }
                continue;
            }

            provisioned_envs.insert(env.name.clone());
            let cloud = Arc::clone(&clouds[&env.name]);
            launches.push((name, async move {
                cloud.launch_instance(&request).await.map_err(OrchestratorError::from)
            }));
        }

        let mut volume_jobs = Vec::new();
        for env in &descriptor.environments {
            let needs_volumes = provisioned_envs.contains(&env.name)
                || descriptor.members_in(&env.name).any(|m| m.provisioned);
            if !needs_volumes {
                continue;
            }
            for spec in &descriptor.volume_specs {
                let exists = descriptor
                    .shared_storage
                    .iter()
                    .any(|v| v.environment == env.name && v.name == spec.name);
                if exists {
                    continue;
                }
                let cloud = Arc::clone(&clouds[&env.name]);
                let request = StorageRequest {
                    cluster: cluster.to_string(),
                    environment: env.clone(),
                    spec: spec.clone(),
                };
                volume_jobs.push((format!("{}/{}", env.name, spec.name), async move {
                    cloud.launch_storage(&request).await.map_err(OrchestratorError::from)
                }));
            }
        }

        let requested: Vec<String> = launches.iter().map(|(name, _)| name.clone()).collect();
        let (launch_results, volume_results) =
            tokio::join!(self.in_pool(launches), self.in_pool(volume_jobs));

        for (name, result) in launch_results.iter() {
            match result {
                Ok(Some(machine)) => launched.push(Machine {
                    name: name.clone(),
                    ..machine.clone()
                }),
                Ok(None) => warn!("no capacity for {name}"),
                Err(e) => error!("could not launch {name}: {e}"),
            }
        }
        let succeeded: BTreeSet<&str> = launch_results
            .iter()
            .filter(|(_, result)| matches!(result, Ok(Some(_))))
            .map(|(name, _)| name.as_str())
            .collect();
        failed.extend(
            requested
                .iter()
                .filter(|name| !succeeded.contains(name.as_str()))
                .cloned(),
        );

        for (name, result) in volume_results {
            match result {
                Ok(volume) => descriptor.shared_storage.push(volume),
                Err(e) => {
                    error!("could not create volume {name}: {e}");
                    failed.push(name);
                }
            }
        }

        for machine in launched {
            descriptor.members.insert(machine.name.clone(), machine);
        }

        failed.sort();
        if !failed.is_empty() {
            descriptor.state = ClusterState::Failed;
            store.save(&descriptor)?;
            return Err(OrchestratorError::AllocationFailed {
                cluster: cluster.to_string(),
                failed,
            });
        }

        descriptor.state = ClusterState::Allocated;
        store.save(&descriptor)?;
        info!(
            "allocated {} member(s) for cluster '{cluster}'",
            descriptor.members.len()
        );
        Ok(descriptor)
    }

    /// Run the baseline preparation script on every managed member.
    pub async fn make(&self, cluster: &str) -> Result<ClusterDescriptor, OrchestratorError> {
        let descriptor = self.context.store().load(cluster)?;
        descriptor.state.check(cluster, Operation::Make)?;
        self.check_interrupted()?;

        let hosts = hosts_of(descriptor.members.values().filter(|m| m.managed))?;
        if hosts.is_empty() {
            info!("cluster '{cluster}' has no managed members to prepare");
            return Ok(descriptor);
        }

        let script = match &self.context.settings.make.script {
            Some(script) => script.as_str(),
            None => DEFAULT_MAKE_SCRIPT,
        };
        let command = RemoteCommand::Script(script.lines().map(|l| l.to_string()).collect());
        let options = self.exec_options().sudo(true);
        self.executor.run(&hosts, &command, &options).await?;

        info!("prepared {} member(s) of cluster '{cluster}'", hosts.len());
        Ok(descriptor)
    }

    /// Configure and install every role, then work out the cluster's connection target.
    pub async fn install(&self, cluster: &str) -> Result<ClusterDescriptor, OrchestratorError> {
        let store = self.context.store();
        let mut descriptor = store.load(cluster)?;
        descriptor.state.check(cluster, Operation::Install)?;
        self.check_interrupted()?;

        let tree = TopologyTree::restore(&descriptor.topology, &descriptor.topology_map)?;
        let roles = self.build_roles(&descriptor, &tree)?;

        // Environments are configured one after the other; the roles within one in parallel.
        for env in &descriptor.environments {
            self.check_interrupted()?;
            let in_env: Vec<&RoleEntry> =
                roles.iter().filter(|r| r.environment == env.name).collect();
            let results =
                future::join_all(in_env.iter().map(|r| r.implementation.configure())).await;
            phase_result("configure", in_env.iter().map(|r| &r.role).zip(results))?;
        }

        self.check_interrupted()?;
        let results = future::join_all(roles.iter().map(|r| r.implementation.install())).await;
        let mut targets: Vec<Option<ConnectionTarget>> = Vec::with_capacity(roles.len());
        let mut failures = Vec::new();
        for (entry, result) in roles.iter().zip(results) {
            match result {
                Ok(target) => targets.push(target),
                Err(e) => {
                    failures.push(format!("{}: {e}", entry.role));
                    targets.push(None);
                }
            }
        }
        if !failures.is_empty() {
            return Err(OrchestratorError::PhaseFailed {
                phase: "install",
                failures,
            });
        }

        self.check_interrupted()?;
        let target = self.chain_targets(&tree, &roles, targets).await?;
        info!("cluster '{cluster}' is reachable at {target}");
        descriptor.connection_target = Some(target);
        descriptor.state = ClusterState::Ready;
        store.save(&descriptor)?;
        Ok(descriptor)
    }

    /// Feed each installed target through the proxy directly above it. The last target in level
    /// order is the one clients use.
    async fn chain_targets(
        &self,
        tree: &TopologyTree,
        roles: &[RoleEntry],
        targets: Vec<Option<ConnectionTarget>>,
    ) -> Result<ConnectionTarget, OrchestratorError> {
        let mut candidate = None;
        for (entry, target) in roles.iter().zip(targets) {
            let Some(target) = target else {
                continue;
            };
            let proxy = tree
                .parent_role(&entry.role)
                .and_then(|parent| roles.iter().find(|r| r.role == parent));
            let proxy = proxy.and_then(|p| p.implementation.as_proxy().map(|proxy| (p, proxy)));

            candidate = Some(match proxy {
                Some((parent, proxy)) => {
                    debug!("pointing proxy '{}' at {target}", parent.role);
                    proxy.post_install(target).await?
                }
                None => target,
            });
        }

        Ok(candidate.unwrap_or_else(|| {
            warn!("no role produced a connection target");
            ConnectionTarget::placeholder()
        }))
    }

    /// Tear the cluster down and forget about it.
    ///
    /// Role cleanup is best effort. Instances and shared volumes that cannot be removed stay in
    /// the descriptor so that a later `clean` can try again.
    pub async fn clean(&self, cluster: &str) -> Result<(), OrchestratorError> {
        let store = self.context.store();
        let mut descriptor = store.load(cluster)?;
        descriptor.state.check(cluster, Operation::Clean)?;
        self.check_interrupted()?;

        if matches!(
            descriptor.state,
            ClusterState::Allocated | ClusterState::Ready | ClusterState::Down
        ) {
            self.clean_roles(&descriptor).await;
        }

        let clouds = self.clouds_for(&descriptor.environments)?;
        let terminations = descriptor
            .members
            .values()
            .filter(|m| m.managed && m.provisioned)
            .map(|machine| {
                let cloud = Arc::clone(&clouds[&machine.environment]);
                let machine = machine.clone();
                (machine.name.clone(), async move {
                    cloud.terminate_instance(&machine).await.map_err(OrchestratorError::from)
                })
            })
            .collect();
        for (name, result) in self.in_pool(terminations).await {
            match result {
                Ok(()) => {
                    descriptor.members.remove(&name);
                }
                Err(e) => error!("could not terminate {name}: {e}"),
            }
        }
        descriptor.members.retain(|_, m| m.managed && m.provisioned);

        let destructions = descriptor
            .shared_storage
            .iter()
            .map(|volume| {
                let cloud = Arc::clone(&clouds[&volume.environment]);
                let volume = volume.clone();
                (volume.id.clone(), async move {
                    cloud.destroy_storage(&volume).await.map_err(OrchestratorError::from)
                })
            })
            .collect();
        let mut destroyed = BTreeSet::new();
        for (id, result) in self.in_pool(destructions).await {
            match result {
                Ok(()) => {
                    destroyed.insert(id);
                }
                Err(e) => error!("could not destroy volume {id}: {e}"),
            }
        }
        descriptor
            .shared_storage
            .retain(|v: &Volume| !destroyed.contains(&v.id));

        if !descriptor.members.is_empty() || !descriptor.shared_storage.is_empty() {
            let remaining = descriptor
                .members
                .keys()
                .cloned()
                .chain(descriptor.shared_storage.iter().map(|v| v.name.clone()))
                .collect();
            descriptor.state = ClusterState::Failed;
            store.save(&descriptor)?;
            return Err(OrchestratorError::CleanupFailed {
                cluster: cluster.to_string(),
                remaining,
            });
        }

        store.delete(cluster)?;
        info!("cluster '{cluster}' has been cleaned up");
        Ok(())
    }

    async fn clean_roles(&self, descriptor: &ClusterDescriptor) {
        let roles = match TopologyTree::restore(&descriptor.topology, &descriptor.topology_map)
            .map_err(OrchestratorError::from)
            .and_then(|tree| self.build_roles(descriptor, &tree))
        {
            Ok(roles) => roles,
            Err(e) => {
                warn!("skipping role cleanup: {e}");
                return;
            }
        };
        let results = future::join_all(roles.iter().map(|r| r.implementation.clean())).await;
        for (entry, result) in roles.iter().zip(results) {
            if let Err(e) = result {
                warn!("cleanup of role '{}' failed: {e}", entry.role);
            }
        }
    }

    /// Stop the roles, then the instances. Ephemeral instances keep running since stopping them
    /// would lose their data.
    pub async fn stop(&self, cluster: &str) -> Result<ClusterDescriptor, OrchestratorError> {
        let store = self.context.store();
        let mut descriptor = store.load(cluster)?;
        descriptor.state.check(cluster, Operation::Stop)?;
        self.check_interrupted()?;

        let tree = TopologyTree::restore(&descriptor.topology, &descriptor.topology_map)?;
        let roles = self.build_roles(&descriptor, &tree)?;
        let results = future::join_all(roles.iter().map(|r| r.implementation.stop())).await;
        phase_result("stop", roles.iter().map(|r| &r.role).zip(results))?;
        self.check_interrupted()?;

        let clouds = self.clouds_for(&descriptor.environments)?;
        let mut jobs = Vec::new();
        for machine in descriptor.members.values().filter(|m| m.managed) {
            if machine.ephemeral {
                info!("leaving ephemeral instance {} running", machine.name);
                continue;
            }
            let cloud = Arc::clone(&clouds[&machine.environment]);
            let machine = machine.clone();
            jobs.push((machine.name.clone(), async move {
                cloud.stop_instance(&machine).await.map_err(OrchestratorError::from)
            }));
        }
        let failures: Vec<String> = self
            .in_pool(jobs)
            .await
            .into_iter()
            .filter_map(|(name, result)| result.err().map(|e| format!("{name}: {e}")))
            .collect();
        if !failures.is_empty() {
            return Err(OrchestratorError::PhaseFailed {
                phase: "stop",
                failures,
            });
        }

        descriptor.state = ClusterState::Down;
        store.save(&descriptor)?;
        Ok(descriptor)
    }

    /// Start the instances, then the roles.
    pub async fn start(&self, cluster: &str) -> Result<ClusterDescriptor, OrchestratorError> {
        let store = self.context.store();
        let mut descriptor = store.load(cluster)?;
        descriptor.state.check(cluster, Operation::Start)?;
        self.check_interrupted()?;

        let clouds = self.clouds_for(&descriptor.environments)?;
        let jobs = descriptor
            .members
            .values()
            .filter(|m| m.managed && !m.ephemeral)
            .map(|machine| {
                let cloud = Arc::clone(&clouds[&machine.environment]);
                let machine = machine.clone();
                (machine.name.clone(), async move {
                    cloud.start_instance(&machine).await.map_err(OrchestratorError::from)
                })
            })
            .collect();
        let mut failures = Vec::new();
        for (name, result) in self.in_pool(jobs).await {
            match result {
                Ok(machine) => {
                    descriptor.members.insert(name, machine);
                }
                Err(e) => failures.push(format!("{name}: {e}")),
            }
        }
        if !failures.is_empty() {
            // Keep whatever addresses changed for the instances that did come up.
            store.save(&descriptor)?;
            return Err(OrchestratorError::PhaseFailed {
                phase: "start",
                failures,
            });
        }

        self.check_interrupted()?;
        let tree = TopologyTree::restore(&descriptor.topology, &descriptor.topology_map)?;
        let roles = self.build_roles(&descriptor, &tree)?;
        let results = future::join_all(roles.iter().map(|r| r.implementation.start())).await;
        phase_result("start", roles.iter().map(|r| &r.role).zip(results))?;

        descriptor.state = ClusterState::Ready;
        store.save(&descriptor)?;
        Ok(descriptor)
    }

    /// Configure, allocate, prepare and install in one go.
    pub async fn all(
        &self,
        cluster: &str,
        documents: &Documents,
        implementation: &str,
        force: bool,
    ) -> Result<ClusterDescriptor, OrchestratorError> {
        self.configure(cluster, documents, implementation, force)
            .await?;
        self.allocate(cluster, false).await?;
        self.make(cluster).await?;
        self.install(cluster).await
    }

    /// Fail with [`OrchestratorError::Interrupted`] once Ctrl-C has been seen, so that no new
    /// step is started.
    fn check_interrupted(&self) -> Result<(), OrchestratorError> {
        if self.context.is_interrupted() {
            return Err(OrchestratorError::Interrupted);
        }
        Ok(())
    }

    fn exec_options(&self) -> ExecOptions {
        ExecOptions::default()
            .with_timeout(self.context.settings.command_timeout())
            .with_retry(self.context.settings.remote_retry.clone())
    }

    fn build_cloud(
        &self,
        env: &Environment,
        configs: &BTreeMap<String, CloudConfig>,
    ) -> Result<Arc<dyn Cloud>, OrchestratorError> {
        let config = configs
            .get(&env.cloud)
            .ok_or_else(|| OrchestratorError::UnknownCloud {
                environment: env.name.clone(),
                cloud: env.cloud.clone(),
            })?;
        Ok(self.cloud_registry.build(env, config, &self.context)?)
    }

    /// One cloud per environment, keyed by environment name.
    fn clouds_for(
        &self,
        environments: &[Environment],
    ) -> Result<BTreeMap<String, Arc<dyn Cloud>>, OrchestratorError> {
        environments
            .iter()
            .map(|env| Ok((env.name.clone(), self.build_cloud(env, &self.clouds)?)))
            .collect()
    }

    /// Build the implementation of every role, in level order.
    fn build_roles(
        &self,
        descriptor: &ClusterDescriptor,
        tree: &TopologyTree,
    ) -> Result<Vec<RoleEntry>, OrchestratorError> {
        let mut roles = Vec::new();
        for (role, instances) in tree.groups() {
            let (env, params) = descriptor
                .component(role)
                .ok_or_else(|| TopologyError::MissingRole(role.to_string()))?;

            let members = instances
                .iter()
                .filter_map(|name| descriptor.members.get(*name))
                .collect::<Vec<_>>();
            let hosts = hosts_of(members.into_iter())?;
            let sudo = params.parameter("sudo") != Some("false");
            let group = NodeGroup::new(
                hosts,
                Arc::clone(&self.executor),
                self.exec_options().sudo(sudo),
            );

            let implementation = self.role_registry.build(RoleContext {
                cluster: descriptor.cluster_name.clone(),
                environment: env.clone(),
                params: params.clone(),
                group,
            })?;
            roles.push(RoleEntry {
                role: role.to_string(),
                environment: env.name.clone(),
                implementation,
            });
        }
        Ok(roles)
    }

    /// Run `jobs` on the worker pool and wait for all of them.
    ///
    /// Once the context has been interrupted, jobs that have not started yet fail with
    /// [`OrchestratorError::Interrupted`]. Results come back sorted by job name; a job that
    /// panicked is logged and has no result.
    async fn in_pool<T, F>(
        &self,
        jobs: Vec<(String, F)>,
    ) -> Vec<(String, Result<T, OrchestratorError>)>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, OrchestratorError>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.context.settings.worker_count()));
        let mut set = JoinSet::new();
        for (name, job) in jobs {
            let semaphore = Arc::clone(&semaphore);
            let context = self.context.clone();
            set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (name, Err(OrchestratorError::Interrupted)),
                };
                if context.is_interrupted() {
                    return (name, Err(OrchestratorError::Interrupted));
                }
                (name, job.await)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!("worker task failed: {e}"),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }
}

fn hosts_of<'a>(machines: impl Iterator<Item = &'a Machine>) -> Result<Vec<Host>, OrchestratorError> {
    machines
        .map(|m| Host::from_machine(m).ok_or_else(|| OrchestratorError::NoAddress(m.name.clone())))
        .collect()
}

fn phase_result<'a>(
    phase: &'static str,
    results: impl Iterator<Item = (&'a String, Result<(), RoleError>)>,
) -> Result<(), OrchestratorError> {
    let failures: Vec<String> = results
        .filter_map(|(role, result)| result.err().map(|e| format!("{role}: {e}")))
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(OrchestratorError::PhaseFailed { phase, failures })
    }
}
