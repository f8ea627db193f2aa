// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Roles whose every step is a shell script taken from the role's parameters.
//!
//! Scripts are read from the `configure`, `install`, `clean`, `start`, `stop` and (for proxies)
//! `post_install` parameters. A missing script means there is nothing to do for that step.
//! Scripts may use the per-host placeholders `{name}`, `{address}` and `{user}`; a proxy's
//! `post_install` script may also use `{target_hosts}`, `{target_port}`, `{target_user}`,
//! `{target_database}` and `{target_dialect}`.

use {async_trait::async_trait, log::debug};

use super::{Proxy, Role, RoleContext, RoleError};
use crate::{
    cluster::{ConnectionTarget, SslMaterial},
    remote::RemoteCommand,
};

const DEFAULT_DIALECT: &str = "postgresql";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    /// Holds the data; its install produces the first connection target.
    Backend,
    /// Sits between drivers and backends.
    Proxy,
    /// Generates load. Nothing connects to it.
    Driver,
}

impl ScriptKind {
    pub fn key(self) -> &'static str {
        match self {
            ScriptKind::Backend => "backend",
            ScriptKind::Proxy => "proxy",
            ScriptKind::Driver => "driver",
        }
    }
}

#[derive(Debug)]
pub struct ScriptRole {
    kind: ScriptKind,
    context: RoleContext,
}

impl ScriptRole {
    pub fn new(kind: ScriptKind, context: RoleContext) -> Result<Self, RoleError> {
        if context.group.is_empty() {
            return Err(RoleError::NoMembers {
                role: context.params.role.clone(),
            });
        }
        let role = ScriptRole { kind, context };
        // Catch bad ports before anything has been installed.
        role.port("port")?;
        role.port("listen_port")?;
        Ok(role)
    }

    pub fn kind(&self) -> ScriptKind {
        self.kind
    }

    fn parameter(&self, key: &str) -> Option<&str> {
        self.context.params.parameter(key)
    }

    fn port(&self, key: &str) -> Result<Option<u16>, RoleError> {
        self.parameter(key)
            .map(|value| {
                value.parse::<u16>().map_err(|_| RoleError::InvalidParameter {
                    role: self.name().to_string(),
                    key: key.to_string(),
                    value: value.to_string(),
                })
            })
            .transpose()
    }

    async fn run_step(&self, step: &'static str, script: Option<String>) -> Result<(), RoleError> {
        let Some(script) = script else {
            debug!("role '{}' has no {step} script", self.name());
            return Ok(());
        };
        let command = RemoteCommand::Template(script);
        let group = &self.context.group;
        let result = if step == "clean" {
            let options = group.options().clone().ignore_errors(true);
            group.run_on_all_with(&command, &options).await
        } else {
            group.run_on_all(&command).await
        };
        result.map(|_| ()).map_err(|e| RoleError::Remote {
            role: self.name().to_string(),
            step,
            source: e,
        })
    }

    async fn run_parameter_script(&self, step: &'static str) -> Result<(), RoleError> {
        self.run_step(step, self.parameter(step).map(|s| s.to_string()))
            .await
    }

    fn backend_target(&self) -> Result<ConnectionTarget, RoleError> {
        let primary = self.context.group.addresses().into_iter().take(1).collect();
        let owned = |key: &str| self.parameter(key).map(|s| s.to_string());

        let ssl = match (owned("ssl_ca"), owned("ssl_cert"), owned("ssl_key")) {
            (None, None, None) => None,
            (ca, cert, key) => Some(SslMaterial { ca, cert, key }),
        };

        Ok(ConnectionTarget {
            hosts: primary,
            user: owned("db_user"),
            password: owned("db_password"),
            database: owned("database"),
            port: self.port("port")?,
            dialect: owned("dialect").unwrap_or_else(|| DEFAULT_DIALECT.to_string()),
            ssl,
        })
    }
}

#[async_trait]
impl Role for ScriptRole {
    fn name(&self) -> &str {
        &self.context.params.role
    }

    async fn configure(&self) -> Result<(), RoleError> {
        self.run_parameter_script("configure").await
    }

    async fn install(&self) -> Result<Option<ConnectionTarget>, RoleError> {
        self.run_parameter_script("install").await?;
        match self.kind {
            ScriptKind::Backend => Ok(Some(self.backend_target()?)),
            ScriptKind::Proxy | ScriptKind::Driver => Ok(None),
        }
    }

    async fn clean(&self) -> Result<(), RoleError> {
        self.run_parameter_script("clean").await
    }

    async fn start(&self) -> Result<(), RoleError> {
        self.run_parameter_script("start").await
    }

    async fn stop(&self) -> Result<(), RoleError> {
        self.run_parameter_script("stop").await
    }

    fn as_proxy(&self) -> Option<&dyn Proxy> {
        match self.kind {
            ScriptKind::Proxy => Some(self),
            _ => None,
        }
    }
}

#[async_trait]
impl Proxy for ScriptRole {
    async fn post_install(&self, target: ConnectionTarget) -> Result<ConnectionTarget, RoleError> {
        let script = self.parameter("post_install").map(|script| {
            script
                .replace("{target_hosts}", &target.hosts.join(","))
                .replace(
                    "{target_port}",
                    &target.port.map(|p| p.to_string()).unwrap_or_default(),
                )
                .replace("{target_user}", target.user.as_deref().unwrap_or(""))
                .replace("{target_database}", target.database.as_deref().unwrap_or(""))
                .replace("{target_dialect}", &target.dialect)
        });
        self.run_step("post_install", script).await?;

        Ok(ConnectionTarget {
            hosts: self.context.group.addresses(),
            port: self.port("listen_port")?.or(target.port),
            ..target
        })
    }
}
