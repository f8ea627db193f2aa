// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Compute and storage lifecycle, one implementation per kind of provider.
//!
//! Clouds are looked up by the `client` key of an environment, so a cluster can mix providers:
//! a backend on machines that already exist and drivers launched through a provider CLI, say.

use std::{collections::BTreeMap, fmt, io, sync::Arc, time::Duration};

use {async_trait::async_trait, thiserror::Error};

use crate::{
    cluster::{ComponentParams, Environment, Machine, Volume, VolumeSpec},
    config::CloudConfig,
    context::Context,
};

pub mod command;
pub mod external;

pub use command::CommandCloud;
pub use external::ExternalCloud;

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("no cloud client named '{0}' is registered")]
    UnknownClient(String),

    #[error("cloud '{cloud}' has no '{command}' command configured")]
    MissingCommand { cloud: String, command: String },

    #[error("cloud client '{client}' does not support {operation}")]
    Unsupported {
        client: String,
        operation: &'static str,
    },

    #[error("could not run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("'{command}' exited with status {status:?}: {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("'{command}' timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    #[error("gave up after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<CloudError>,
    },

    #[error("could not parse the output of '{command}': {source}")]
    Parse {
        command: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Exit status a provider CLI uses to say "try again later".
pub const EX_TEMPFAIL: i32 = 75;

impl CloudError {
    /// Throttling and timeouts are worth retrying; everything else is a real answer. An
    /// exhausted retry is final.
    pub fn is_transient(&self) -> bool {
        match self {
            CloudError::TimedOut { .. } => true,
            CloudError::CommandFailed { status, .. } => *status == Some(EX_TEMPFAIL),
            _ => false,
        }
    }
}

/// Everything a cloud needs to launch one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    pub cluster: String,
    /// The expanded instance name, e.g. `backend_0`.
    pub name: String,
    /// Position of the instance among the replicas of its role.
    pub index: usize,
    pub environment: Environment,
    pub params: ComponentParams,
}

impl LaunchRequest {
    pub fn role(&self) -> &str {
        &self.params.role
    }

    /// A machine record for this request with nothing but the identity filled in.
    pub fn machine(&self, id: &str) -> Machine {
        Machine {
            id: id.to_string(),
            name: self.name.clone(),
            role: self.params.role.clone(),
            implementation: self.params.implementation.clone(),
            environment: self.environment.name.clone(),
            public_address: None,
            private_address: None,
            user: self.params.user.clone(),
            managed: self.params.managed,
            provisioned: false,
            ephemeral: self.params.ephemeral,
            storage: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageRequest {
    pub cluster: String,
    pub environment: Environment,
    pub spec: VolumeSpec,
}

#[async_trait]
pub trait Cloud: Send + Sync + fmt::Debug {
    /// Launch one instance. `None` means the provider could not allocate it.
    async fn launch_instance(&self, request: &LaunchRequest) -> Result<Option<Machine>, CloudError>;

    async fn terminate_instance(&self, machine: &Machine) -> Result<(), CloudError>;

    /// Start a stopped instance, returning the machine with its current addresses.
    async fn start_instance(&self, machine: &Machine) -> Result<Machine, CloudError>;

    async fn stop_instance(&self, machine: &Machine) -> Result<(), CloudError>;

    async fn launch_storage(&self, request: &StorageRequest) -> Result<Volume, CloudError>;

    async fn destroy_storage(&self, volume: &Volume) -> Result<(), CloudError>;

    /// Whether the provider already runs something that belongs to `cluster`.
    async fn is_running(&self, cluster: &str) -> Result<bool, CloudError>;
}

pub type CloudConstructor = Arc<
    dyn Fn(&Environment, &CloudConfig, &Context) -> Result<Arc<dyn Cloud>, CloudError>
        + Send
        + Sync,
>;

/// Maps cloud client keys to the code that builds them.
#[derive(Clone, Default)]
pub struct CloudRegistry {
    constructors: BTreeMap<String, CloudConstructor>,
}

impl fmt::Debug for CloudRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudRegistry")
            .field("clients", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CloudRegistry {
    pub fn new() -> Self {
        CloudRegistry::default()
    }

    /// A registry holding the `command` and `external` clients.
    pub fn with_builtins() -> Self {
        let mut registry = CloudRegistry::new();
        registry.register(command::CLIENT, |env, config, context| {
            Ok(Arc::new(CommandCloud::new(env, config, context)) as Arc<dyn Cloud>)
        });
        registry.register(external::CLIENT, |_, _, _| {
            Ok(Arc::new(ExternalCloud) as Arc<dyn Cloud>)
        });
        registry
    }

    pub fn register<F>(&mut self, client: &str, constructor: F)
    where
        F: Fn(&Environment, &CloudConfig, &Context) -> Result<Arc<dyn Cloud>, CloudError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors
            .insert(client.to_string(), Arc::new(constructor));
    }

    pub fn build(
        &self,
        environment: &Environment,
        config: &CloudConfig,
        context: &Context,
    ) -> Result<Arc<dyn Cloud>, CloudError> {
        let constructor = self
            .constructors
            .get(&environment.client)
            .ok_or_else(|| CloudError::UnknownClient(environment.client.clone()))?;
        constructor(environment, config, context)
    }
}
