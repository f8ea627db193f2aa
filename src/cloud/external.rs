// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Machines that somebody else provisioned.
//!
//! Nothing here ever talks to a provider. Instances are handed the addresses listed in the
//! role's `hosts`, round-robin, and teardown is a no-op.

use {async_trait::async_trait, log::debug};

use super::{Cloud, CloudError, LaunchRequest, StorageRequest};
use crate::cluster::{Machine, Volume};

pub const CLIENT: &str = "external";

/// Build the machine record for an externally managed instance, or `None` if the role lists no
/// hosts to use.
pub fn fake_machine(request: &LaunchRequest) -> Option<Machine> {
    let hosts = &request.params.hosts;
    if hosts.is_empty() {
        return None;
    }
    let address = &hosts[request.index % hosts.len()];

    let mut machine = request.machine(&format!("external-{}", request.name));
    machine.public_address = Some(address.clone());
    machine.managed = false;
    Some(machine)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalCloud;

#[async_trait]
impl Cloud for ExternalCloud {
    async fn launch_instance(&self, request: &LaunchRequest) -> Result<Option<Machine>, CloudError> {
        Ok(fake_machine(request))
    }

    async fn terminate_instance(&self, machine: &Machine) -> Result<(), CloudError> {
        debug!("leaving external machine {} alone", machine.name);
        Ok(())
    }

    async fn start_instance(&self, machine: &Machine) -> Result<Machine, CloudError> {
        Ok(machine.clone())
    }

    async fn stop_instance(&self, machine: &Machine) -> Result<(), CloudError> {
        debug!("leaving external machine {} running", machine.name);
        Ok(())
    }

    async fn launch_storage(&self, _request: &StorageRequest) -> Result<Volume, CloudError> {
        Err(CloudError::Unsupported {
            client: CLIENT.to_string(),
            operation: "shared storage",
        })
    }

    async fn destroy_storage(&self, _volume: &Volume) -> Result<(), CloudError> {
        Err(CloudError::Unsupported {
            client: CLIENT.to_string(),
            operation: "shared storage",
        })
    }

    async fn is_running(&self, _cluster: &str) -> Result<bool, CloudError> {
        Ok(false)
    }
}
