// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! A cloud driven through a provider's command line tool.
//!
//! Each operation is a shell command template from the cloud's `commands` table in
//! `clouds.toml`. Placeholders such as `{name}` or `{region}` are filled in before the command is
//! handed to `sh -c`. Commands that produce something print it to stdout as JSON:
//!
//! - `launch` and `start`: `{"id": "...", "public_address": "...", "private_address": "..."}`.
//!   `launch` may print nothing (or `null`) when no capacity was available.
//! - `launch_storage`: `{"id": "..."}`.
//! - `is_running`: `true` or `false`.

use std::{collections::BTreeMap, process::Stdio, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    log::{debug, info},
    serde::Deserialize,
    tokio::process::Command,
};

use super::{Cloud, CloudError, LaunchRequest, StorageRequest};
use crate::{
    cluster::{Environment, Machine, Volume},
    config::CloudConfig,
    context::{Context, Metrics},
    retry::{retry, RetryError, RetryPolicy},
};

pub const CLIENT: &str = "command";

#[derive(Debug, Deserialize)]
struct InstanceOutput {
    id: String,
    #[serde(default)]
    public_address: Option<String>,
    #[serde(default)]
    private_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VolumeOutput {
    id: String,
}

type Vars = BTreeMap<String, String>;

/// Replace every `{key}` in `template` with its value from `vars`.
pub fn render(template: &str, vars: &Vars) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

#[derive(Debug)]
pub struct CommandCloud {
    environment: Environment,
    commands: BTreeMap<String, String>,
    timeout: Duration,
    retry: RetryPolicy,
    metrics: Arc<Metrics>,
}

impl CommandCloud {
    pub fn new(environment: &Environment, config: &CloudConfig, context: &Context) -> Self {
        CommandCloud {
            environment: environment.clone(),
            commands: config.commands.clone(),
            timeout: context.settings.cloud_timeout(),
            retry: context.settings.cloud_retry.clone(),
            metrics: Arc::clone(&context.metrics),
        }
    }

    fn template(&self, key: &str) -> Result<&str, CloudError> {
        self.commands
            .get(key)
            .map(|s| s.as_str())
            .ok_or_else(|| CloudError::MissingCommand {
                cloud: self.environment.cloud.clone(),
                command: key.to_string(),
            })
    }

    fn base_vars(&self) -> Vars {
        BTreeMap::from([
            ("cloud".to_string(), self.environment.cloud.clone()),
            ("region".to_string(), self.environment.region.clone()),
            ("environment".to_string(), self.environment.name.clone()),
        ])
    }

    fn machine_vars(&self, machine: &Machine) -> Vars {
        let mut vars = self.base_vars();
        vars.insert("id".to_string(), machine.id.clone());
        vars.insert("name".to_string(), machine.name.clone());
        vars.insert("role".to_string(), machine.role.clone());
        vars
    }

    /// Run the `key` command with `vars` filled in, retrying transient failures.
    async fn invoke(&self, key: &str, vars: &Vars) -> Result<String, CloudError> {
        let command = render(self.template(key)?, vars);
        debug!("{} {key}: {command}", self.environment.name);

        let label = format!("{} {key}", self.environment.cloud);
        let command = command.as_str();
        let label = label.as_str();
        retry(&self.retry, CloudError::is_transient, move || async move {
            self.metrics.record_cloud_call();
            let result = self.invoke_once(label, command).await;
            if result.is_err() {
                self.metrics.record_cloud_failure();
            }
            result
        })
        .await
        .map_err(|e| match e {
            RetryError::Exhausted {
                attempts, source, ..
            } => CloudError::Exhausted {
                attempts,
                source: Box::new(source),
            },
            RetryError::Permanent(e) => e,
        })
    }

    async fn invoke_once(&self, label: &str, command: &str) -> Result<String, CloudError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| CloudError::TimedOut {
                command: label.to_string(),
                timeout: self.timeout,
            })?
            .map_err(|e| CloudError::Spawn {
                command: label.to_string(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(CloudError::CommandFailed {
                command: label.to_string(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse<T: serde::de::DeserializeOwned>(&self, key: &str, out: &str) -> Result<T, CloudError> {
        serde_json::from_str(out).map_err(|e| CloudError::Parse {
            command: format!("{} {key}", self.environment.cloud),
            source: e,
        })
    }
}

#[async_trait]
impl Cloud for CommandCloud {
    async fn launch_instance(&self, request: &LaunchRequest) -> Result<Option<Machine>, CloudError> {
        let params = &request.params;
        let mut vars = self.base_vars();
        vars.extend(params.parameters.clone());
        vars.insert("cluster".to_string(), request.cluster.clone());
        vars.insert("name".to_string(), request.name.clone());
        vars.insert("role".to_string(), params.role.clone());
        vars.insert("index".to_string(), request.index.to_string());
        for (key, value) in [
            ("instance_type", &params.instance_type),
            ("image", &params.image),
            ("user", &params.user),
        ] {
            vars.insert(key.to_string(), value.clone().unwrap_or_default());
        }

        let out = self.invoke("launch", &vars).await?;
        let out = out.trim();
        if out.is_empty() || out == "null" {
            return Ok(None);
        }
        let instance: InstanceOutput = self.parse("launch", out)?;

        let mut machine = request.machine(&instance.id);
        machine.public_address = instance.public_address;
        machine.private_address = instance.private_address;
        machine.provisioned = true;
        info!("launched {} as {}", machine.name, machine.id);
        Ok(Some(machine))
    }

    async fn terminate_instance(&self, machine: &Machine) -> Result<(), CloudError> {
        self.invoke("terminate", &self.machine_vars(machine)).await?;
        info!("terminated {} ({})", machine.name, machine.id);
        Ok(())
    }

    async fn start_instance(&self, machine: &Machine) -> Result<Machine, CloudError> {
        let out = self.invoke("start", &self.machine_vars(machine)).await?;
        let out = out.trim();
        let mut machine = machine.clone();
        if !out.is_empty() {
            let instance: InstanceOutput = self.parse("start", out)?;
            machine.public_address = instance.public_address.or(machine.public_address);
            machine.private_address = instance.private_address.or(machine.private_address);
        }
        Ok(machine)
    }

    async fn stop_instance(&self, machine: &Machine) -> Result<(), CloudError> {
        self.invoke("stop", &self.machine_vars(machine)).await?;
        Ok(())
    }

    async fn launch_storage(&self, request: &StorageRequest) -> Result<Volume, CloudError> {
        let mut vars = self.base_vars();
        vars.insert("cluster".to_string(), request.cluster.clone());
        vars.insert("volume".to_string(), request.spec.name.clone());
        vars.insert("size_gb".to_string(), request.spec.size_gb.to_string());
        vars.insert(
            "mount".to_string(),
            request.spec.mount.clone().unwrap_or_default(),
        );

        let out = self.invoke("launch_storage", &vars).await?;
        let volume: VolumeOutput = self.parse("launch_storage", out.trim())?;
        Ok(Volume {
            id: volume.id,
            name: request.spec.name.clone(),
            environment: request.environment.name.clone(),
            size_gb: request.spec.size_gb,
            mount: request.spec.mount.clone(),
            shared: true,
        })
    }

    async fn destroy_storage(&self, volume: &Volume) -> Result<(), CloudError> {
        let mut vars = self.base_vars();
        vars.insert("id".to_string(), volume.id.clone());
        vars.insert("volume".to_string(), volume.name.clone());
        self.invoke("destroy_storage", &vars).await?;
        Ok(())
    }

    async fn is_running(&self, cluster: &str) -> Result<bool, CloudError> {
        if !self.commands.contains_key("is_running") {
            debug!(
                "cloud '{}' cannot tell whether '{cluster}' is running; assuming it is not",
                self.environment.cloud
            );
            return Ok(false);
        }
        let mut vars = self.base_vars();
        vars.insert("cluster".to_string(), cluster.to_string());
        let out = self.invoke("is_running", &vars).await?;
        let out = out.trim();
        if out.is_empty() {
            return Ok(false);
        }
        self.parse("is_running", out)
    }
}
