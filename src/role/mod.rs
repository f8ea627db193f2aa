// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Role implementations: what gets installed on the members of each role and how the cluster's
//! connection target comes out of them.

use std::{collections::BTreeMap, fmt, sync::Arc};

use {async_trait::async_trait, thiserror::Error};

use crate::{
    cluster::{ComponentParams, ConnectionTarget, Environment},
    host::NodeGroup,
    remote::RemoteError,
};

pub mod script;

pub use script::{ScriptKind, ScriptRole};

#[derive(Debug, Error)]
pub enum RoleError {
    #[error("no role implementation named '{0}' is registered")]
    UnknownImplementation(String),

    #[error("role '{role}' has an invalid '{key}' parameter: '{value}'")]
    InvalidParameter {
        role: String,
        key: String,
        value: String,
    },

    #[error("role '{role}' has no members")]
    NoMembers { role: String },

    #[error("{step} of role '{role}' failed: {source}")]
    Remote {
        role: String,
        step: &'static str,
        #[source]
        source: RemoteError,
    },
}

/// Everything a role implementation is built from.
#[derive(Debug, Clone)]
pub struct RoleContext {
    pub cluster: String,
    pub environment: Environment,
    pub params: ComponentParams,
    /// The members of the role, in instance order.
    pub group: NodeGroup,
}

#[async_trait]
pub trait Role: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Prepare the members before anything is installed.
    async fn configure(&self) -> Result<(), RoleError>;

    /// Install the role. Roles that clients connect to return where to connect.
    async fn install(&self) -> Result<Option<ConnectionTarget>, RoleError>;

    async fn clean(&self) -> Result<(), RoleError>;

    async fn start(&self) -> Result<(), RoleError>;

    async fn stop(&self) -> Result<(), RoleError>;

    /// The proxy side of this role, if it can sit in front of another one.
    fn as_proxy(&self) -> Option<&dyn Proxy> {
        None
    }
}

/// A role that forwards traffic to the role below it.
#[async_trait]
pub trait Proxy: Role {
    /// Point the proxy at `target` and return the target clients should use instead.
    async fn post_install(&self, target: ConnectionTarget) -> Result<ConnectionTarget, RoleError>;
}

pub type RoleConstructor =
    Arc<dyn Fn(RoleContext) -> Result<Arc<dyn Role>, RoleError> + Send + Sync>;

/// Maps role implementation keys to the code that builds them.
#[derive(Clone, Default)]
pub struct RoleRegistry {
    constructors: BTreeMap<String, RoleConstructor>,
}

impl fmt::Debug for RoleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleRegistry")
            .field("implementations", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RoleRegistry {
    pub fn new() -> Self {
        RoleRegistry::default()
    }

    /// A registry holding the `backend`, `proxy` and `driver` script roles.
    pub fn with_builtins() -> Self {
        let mut registry = RoleRegistry::new();
        for kind in [ScriptKind::Backend, ScriptKind::Proxy, ScriptKind::Driver] {
            registry.register(kind.key(), move |context| {
                Ok(Arc::new(ScriptRole::new(kind, context)?) as Arc<dyn Role>)
            });
        }
        registry
    }

    pub fn register<F>(&mut self, key: &str, constructor: F)
    where
        F: Fn(RoleContext) -> Result<Arc<dyn Role>, RoleError> + Send + Sync + 'static,
    {
        self.constructors
            .insert(key.to_string(), Arc::new(constructor));
    }

    pub fn build(&self, context: RoleContext) -> Result<Arc<dyn Role>, RoleError> {
        let key = &context.params.implementation;
        let constructor = self
            .constructors
            .get(key)
            .ok_or_else(|| RoleError::UnknownImplementation(key.clone()))?;
        constructor(context)
    }
}
