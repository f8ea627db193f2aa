// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! The configuration documents read from the configuration directory.
//!
//! - `topologies.toml`: topology name -> nested role tables.
//! - `implementations.toml`: implementation name -> topology, defaults and per-role overrides.
//! - `clouds.toml`: cloud name -> client and provider defaults.
//! - `settings.toml` (optional): timeouts, retry policies and parallelism.
//!
//! These documents are only the input format. Once a cluster is configured, the merged
//! parameters are kept in its descriptor, so later changes to the documents do not affect a
//! cluster that already exists.

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use {
    log::warn,
    serde::{de::DeserializeOwned, Deserialize, Serialize},
    thiserror::Error,
};

use crate::{
    cluster::{ComponentParams, Environment, VolumeSpec},
    remote::SshOptions,
    retry::RetryPolicy,
    topology::{TopologyError, TopologyTemplate},
};

pub const TOPOLOGIES_FILE: &str = "topologies.toml";
pub const IMPLEMENTATIONS_FILE: &str = "implementations.toml";
pub const CLOUDS_FILE: &str = "clouds.toml";
pub const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unknown implementation '{0}'")]
    UnknownImplementation(String),

    #[error("implementation '{implementation}' uses unknown topology '{topology}'")]
    UnknownTopology {
        implementation: String,
        topology: String,
    },

    #[error("role '{role}' uses unknown cloud '{cloud}'")]
    UnknownCloud { role: String, cloud: String },

    #[error("role '{role}' does not set '{field}'")]
    MissingField { role: String, field: &'static str },

    #[error("role '{0}' is not managed but lists no hosts")]
    NoHosts(String),

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// The role fields that can be set at any layer. Every field is optional so that layers can be
/// stacked; later layers win.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct RoleOverrides {
    pub implementation: Option<String>,
    pub count: Option<u32>,
    pub cloud: Option<String>,
    pub region: Option<String>,
    pub instance_type: Option<String>,
    pub image: Option<String>,
    pub user: Option<String>,
    pub managed: Option<bool>,
    pub ephemeral: Option<bool>,
    pub hosts: Option<Vec<String>>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl RoleOverrides {
    /// Lay `other` on top of `self`.
    pub fn merge(&mut self, other: &RoleOverrides) {
        fn layer<T: Clone>(base: &mut Option<T>, over: &Option<T>) {
            if over.is_some() {
                *base = over.clone();
            }
        }
        layer(&mut self.implementation, &other.implementation);
        layer(&mut self.count, &other.count);
        layer(&mut self.cloud, &other.cloud);
        layer(&mut self.region, &other.region);
        layer(&mut self.instance_type, &other.instance_type);
        layer(&mut self.image, &other.image);
        layer(&mut self.user, &other.user);
        layer(&mut self.managed, &other.managed);
        layer(&mut self.ephemeral, &other.ephemeral);
        layer(&mut self.hosts, &other.hosts);
        self.parameters.extend(
            other
                .parameters
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ImplementationConfig {
    pub topology: String,

    /// Volumes created once per environment and shared by its members.
    #[serde(default)]
    pub shared_storage: Vec<VolumeSpec>,

    #[serde(default)]
    pub defaults: RoleOverrides,

    #[serde(default)]
    pub roles: BTreeMap<String, RoleOverrides>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CloudConfig {
    /// Key of the cloud client in the cloud registry, e.g. "command" or "external".
    pub client: String,

    /// Login user for machines in this cloud, unless a role overrides it.
    #[serde(default)]
    pub user: Option<String>,

    /// Command templates used by the "command" client.
    #[serde(default)]
    pub commands: BTreeMap<String, String>,

    #[serde(default)]
    pub defaults: RoleOverrides,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct MakeSettings {
    /// Baseline preparation script run on every managed member. A built-in script is used when
    /// this is not set.
    #[serde(default)]
    pub script: Option<String>,
}

/// Knobs for one invocation of the tool.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Settings {
    /// Size of the worker pool. Defaults to one less than the available parallelism.
    #[serde(default)]
    pub parallelism: Option<usize>,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_cloud_timeout")]
    pub cloud_timeout_secs: u64,

    #[serde(default)]
    pub ssh: SshOptions,

    #[serde(default = "RetryPolicy::remote_default")]
    pub remote_retry: RetryPolicy,

    #[serde(default = "RetryPolicy::cloud_default")]
    pub cloud_retry: RetryPolicy,

    #[serde(default)]
    pub make: MakeSettings,
}

fn default_command_timeout() -> u64 {
    1800
}

fn default_cloud_timeout() -> u64 {
    600
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            parallelism: None,
            command_timeout_secs: default_command_timeout(),
            cloud_timeout_secs: default_cloud_timeout(),
            ssh: SshOptions::default(),
            remote_retry: RetryPolicy::remote_default(),
            cloud_retry: RetryPolicy::cloud_default(),
            make: MakeSettings::default(),
        }
    }
}

impl Settings {
    /// Load `settings.toml` from `dir`, falling back to the defaults if it does not exist.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(SETTINGS_FILE);
        if !path.exists() {
            return Ok(Settings::default());
        }
        read_toml(&path)
    }

    pub fn worker_count(&self) -> usize {
        match self.parallelism {
            Some(n) => n.max(1),
            None => std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1))
                .unwrap_or(1)
                .max(1),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn cloud_timeout(&self) -> Duration {
        Duration::from_secs(self.cloud_timeout_secs)
    }
}

fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_toml(path, &contents)
}

fn parse_toml<T: DeserializeOwned>(path: &Path, contents: &str) -> Result<T, ConfigError> {
    toml::from_str(contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Load the cloud definitions on their own. Every invocation needs these to talk to clouds,
/// while the other documents are only read when a cluster is configured.
pub fn load_clouds(dir: &Path) -> Result<BTreeMap<String, CloudConfig>, ConfigError> {
    read_toml(&dir.join(CLOUDS_FILE))
}

/// What `configure` needs to know to create a cluster descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub implementation: String,
    pub topology_name: String,
    pub topology: TopologyTemplate,
    pub environments: Vec<Environment>,
    /// Environment name -> role -> parameters.
    pub components: BTreeMap<String, BTreeMap<String, ComponentParams>>,
    pub shared_storage: Vec<VolumeSpec>,
}

impl Plan {
    /// Replica count of `role` in whichever environment defines it.
    pub fn count_of(&self, role: &str) -> Option<u32> {
        self.components
            .values()
            .find_map(|roles| roles.get(role))
            .map(|params| params.count)
    }
}

/// The topology, implementation and cloud documents, as read from the configuration directory.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Documents {
    pub topologies: BTreeMap<String, TopologyTemplate>,
    pub implementations: BTreeMap<String, ImplementationConfig>,
    pub clouds: BTreeMap<String, CloudConfig>,
}

impl Documents {
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        Ok(Documents {
            topologies: read_toml(&dir.join(TOPOLOGIES_FILE))?,
            implementations: read_toml(&dir.join(IMPLEMENTATIONS_FILE))?,
            clouds: load_clouds(dir)?,
        })
    }

    /// Parse the three documents from strings. Mostly useful for tests.
    pub fn from_strs(
        topologies: &str,
        implementations: &str,
        clouds: &str,
    ) -> Result<Self, ConfigError> {
        Ok(Documents {
            topologies: parse_toml(Path::new(TOPOLOGIES_FILE), topologies)?,
            implementations: parse_toml(Path::new(IMPLEMENTATIONS_FILE), implementations)?,
            clouds: parse_toml(Path::new(CLOUDS_FILE), clouds)?,
        })
    }

    /// Work out environments and merged role parameters for `implementation`.
    pub fn plan(&self, implementation: &str) -> Result<Plan, ConfigError> {
        let imp = self
            .implementations
            .get(implementation)
            .ok_or_else(|| ConfigError::UnknownImplementation(implementation.to_string()))?;
        let topology =
            self.topologies
                .get(&imp.topology)
                .ok_or_else(|| ConfigError::UnknownTopology {
                    implementation: implementation.to_string(),
                    topology: imp.topology.clone(),
                })?;
        let used_roles = topology.roles();

        let mut environments: Vec<Environment> = Vec::new();
        let mut components: BTreeMap<String, BTreeMap<String, ComponentParams>> = BTreeMap::new();

        for (role, overrides) in &imp.roles {
            if !used_roles.contains(role) {
                warn!("role '{role}' is not part of topology '{}'; ignoring it", imp.topology);
                continue;
            }

            // The cloud has to be known before its defaults can be applied.
            let mut merged = imp.defaults.clone();
            merged.merge(overrides);
            let cloud_name = merged.cloud.clone().ok_or(ConfigError::MissingField {
                role: role.clone(),
                field: "cloud",
            })?;
            let cloud = self
                .clouds
                .get(&cloud_name)
                .ok_or_else(|| ConfigError::UnknownCloud {
                    role: role.clone(),
                    cloud: cloud_name.clone(),
                })?;

            let mut params = cloud.defaults.clone();
            params.merge(&imp.defaults);
            params.merge(overrides);

            let params = component_params(role, &cloud_name, cloud, params)?;
            let env = Environment::new(&cloud_name, &cloud.client, &params.region);
            if !environments.contains(&env) {
                environments.push(env.clone());
            }
            components
                .entry(env.name)
                .or_default()
                .insert(role.clone(), params);
        }

        Ok(Plan {
            implementation: implementation.to_string(),
            topology_name: imp.topology.clone(),
            topology: topology.clone(),
            environments,
            components,
            shared_storage: imp.shared_storage.clone(),
        })
    }
}

fn component_params(
    role: &str,
    cloud_name: &str,
    cloud: &CloudConfig,
    merged: RoleOverrides,
) -> Result<ComponentParams, ConfigError> {
    let region = merged.region.ok_or(ConfigError::MissingField {
        role: role.to_string(),
        field: "region",
    })?;
    let managed = merged.managed.unwrap_or(true);
    let hosts = merged.hosts.unwrap_or_default();
    if !managed && hosts.is_empty() {
        return Err(ConfigError::NoHosts(role.to_string()));
    }

    Ok(ComponentParams {
        role: role.to_string(),
        implementation: merged.implementation.unwrap_or_else(|| role.to_string()),
        count: merged.count.unwrap_or(1),
        cloud: cloud_name.to_string(),
        region,
        instance_type: merged.instance_type,
        image: merged.image,
        user: merged.user.or_else(|| cloud.user.clone()),
        managed,
        ephemeral: merged.ephemeral.unwrap_or(false),
        hosts,
        parameters: merged.parameters,
    })
}
