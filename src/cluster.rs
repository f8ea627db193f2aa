// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::{collections::BTreeMap, fmt};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use crate::{state::ClusterState, topology::TopologyTemplate};

/// One (cloud, region) pairing that part of a cluster lives in.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub name: String,
    pub cloud: String,
    /// Key of the cloud client in the cloud registry.
    pub client: String,
    pub region: String,
}

impl Environment {
    pub fn new(cloud: &str, client: &str, region: &str) -> Self {
        Environment {
            name: format!("{cloud}-{region}"),
            cloud: cloud.to_string(),
            client: client.to_string(),
            region: region.to_string(),
        }
    }
}

/// The merged configuration of one role, after cloud defaults, implementation defaults and
/// per-role overrides have been applied.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ComponentParams {
    pub role: String,
    /// Key of the role implementation in the role registry.
    pub implementation: String,
    pub count: u32,
    pub cloud: String,
    pub region: String,
    #[serde(default)]
    pub instance_type: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    /// Whether the orchestrator provisions these machines. Unmanaged machines already exist and
    /// are reached at `hosts`.
    pub managed: bool,
    /// Whether the machines keep their data on instance-local storage.
    pub ephemeral: bool,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl ComponentParams {
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(|s| s.as_str())
    }
}

/// A volume that should exist once in every environment with provisioned members.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VolumeSpec {
    pub name: String,
    pub size_gb: u32,
    #[serde(default)]
    pub mount: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Volume {
    pub id: String,
    pub name: String,
    pub environment: String,
    pub size_gb: u32,
    #[serde(default)]
    pub mount: Option<String>,
    pub shared: bool,
}

/// A compute unit that is part of a cluster.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Machine {
    /// The cloud's identifier for the machine.
    pub id: String,
    /// The expanded instance name, e.g. `backend_0`.
    pub name: String,
    pub role: String,
    pub implementation: String,
    pub environment: String,
    #[serde(default)]
    pub public_address: Option<String>,
    #[serde(default)]
    pub private_address: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    pub managed: bool,
    pub provisioned: bool,
    pub ephemeral: bool,
    #[serde(default)]
    pub storage: Vec<Volume>,
}

impl Machine {
    /// The address used to reach the machine, preferring the public one.
    pub fn address(&self) -> Option<&str> {
        self.public_address
            .as_deref()
            .or(self.private_address.as_deref())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SslMaterial {
    #[serde(default)]
    pub ca: Option<String>,
    #[serde(default)]
    pub cert: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

/// How to reach the current front door of the cluster.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectionTarget {
    pub hosts: Vec<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    pub dialect: String,
    #[serde(default)]
    pub ssl: Option<SslMaterial>,
}

const NO_CONNECTION: &str = "none";

impl ConnectionTarget {
    /// The target stored when no role produced one.
    pub fn placeholder() -> Self {
        ConnectionTarget {
            hosts: Vec::new(),
            user: None,
            password: None,
            database: None,
            port: None,
            dialect: NO_CONNECTION.to_string(),
            ssl: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.hosts.is_empty() && self.dialect == NO_CONNECTION
    }
}

impl fmt::Display for ConnectionTarget {
    /// Renders the target as a URL. The password is never printed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_placeholder() {
            return write!(f, "<no connection>");
        }
        write!(f, "{}://", self.dialect)?;
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        write!(f, "{}", self.hosts.join(","))?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        if let Some(database) = &self.database {
            write!(f, "/{database}")?;
        }
        Ok(())
    }
}

/// Everything known about one provisioned cluster. This is what gets written to the cluster's
/// descriptor file between invocations.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClusterDescriptor {
    pub cluster_name: String,
    pub state: ClusterState,
    pub implementation: String,
    pub topology_name: String,
    pub topology: TopologyTemplate,
    /// Raw role name -> comma-joined instance names.
    pub topology_map: BTreeMap<String, String>,
    pub environments: Vec<Environment>,
    /// Environment name -> role -> parameters.
    pub components: BTreeMap<String, BTreeMap<String, ComponentParams>>,
    pub members: BTreeMap<String, Machine>,
    #[serde(default)]
    pub connection_target: Option<ConnectionTarget>,
    /// Shared volumes to create in each environment.
    #[serde(default)]
    pub volume_specs: Vec<VolumeSpec>,
    #[serde(default)]
    pub shared_storage: Vec<Volume>,
    pub created_at: DateTime<Utc>,
}

impl ClusterDescriptor {
    pub fn new(
        cluster_name: &str,
        implementation: &str,
        topology_name: &str,
        topology: TopologyTemplate,
    ) -> Self {
        ClusterDescriptor {
            cluster_name: cluster_name.to_string(),
            state: ClusterState::NotReady,
            implementation: implementation.to_string(),
            topology_name: topology_name.to_string(),
            topology,
            topology_map: BTreeMap::new(),
            environments: Vec::new(),
            components: BTreeMap::new(),
            members: BTreeMap::new(),
            connection_target: None,
            volume_specs: Vec::new(),
            shared_storage: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn environment(&self, name: &str) -> Option<&Environment> {
        self.environments.iter().find(|env| env.name == name)
    }

    /// Find the environment a role lives in, together with its parameters.
    pub fn component(&self, role: &str) -> Option<(&Environment, &ComponentParams)> {
        self.components.iter().find_map(|(env_name, roles)| {
            let params = roles.get(role)?;
            Some((self.environment(env_name)?, params))
        })
    }

    /// The expanded instance names of `role`, in order.
    pub fn instances_of(&self, role: &str) -> Vec<&str> {
        self.topology_map
            .get(role)
            .map(|names| names.split(',').filter(|n| !n.is_empty()).collect())
            .unwrap_or_default()
    }

    /// Every expanded instance, paired with its role.
    pub fn instances(&self) -> impl Iterator<Item = (&str, &str)> {
        self.topology_map.iter().flat_map(|(role, names)| {
            names
                .split(',')
                .filter(|n| !n.is_empty())
                .map(move |name| (name, role.as_str()))
        })
    }

    /// Instances named in the topology that have no machine yet.
    pub fn missing_instances(&self) -> Vec<(String, String)> {
        self.instances()
            .filter(|(name, _)| !self.members.contains_key(*name))
            .map(|(name, role)| (name.to_string(), role.to_string()))
            .collect()
    }

    pub fn members_in<'a>(&'a self, environment: &'a str) -> impl Iterator<Item = &'a Machine> {
        self.members
            .values()
            .filter(move |m| m.environment == environment)
    }

    /// Print a human readable overview of the cluster to stdout.
    pub fn print_summary(&self) {
        println!(
            "cluster '{}' ({}): {}",
            self.cluster_name, self.implementation, self.state
        );
        println!("  topology: {}", self.topology_name);
        for env in &self.environments {
            println!("  environment {}: {} via {}", env.name, env.region, env.client);
        }
        for (name, machine) in &self.members {
            println!(
                "  {name}: role={} address={} {}{}",
                machine.role,
                machine.address().unwrap_or("-"),
                if machine.managed { "managed" } else { "external" },
                if machine.ephemeral { " ephemeral" } else { "" },
            );
        }
        for (name, role) in self.missing_instances() {
            println!("  {name}: role={role} (not allocated)");
        }
        for volume in &self.shared_storage {
            println!(
                "  shared volume {} ({} GB) in {}",
                volume.name, volume.size_gb, volume.environment
            );
        }
        match &self.connection_target {
            Some(target) => println!("  connection: {target}"),
            None => println!("  connection: <not installed>"),
        }
    }
}
