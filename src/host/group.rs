// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::{path::Path, sync::Arc};

use crate::{
    host::Host,
    remote::{ExecOptions, HostOutput, RemoteCommand, RemoteError, RemoteExecutor},
};

/// A set of machines that are driven together, e.g. every replica of one role.
///
/// Role implementations hold one of these rather than talking to the executor themselves.
#[derive(Debug, Clone)]
pub struct NodeGroup {
    hosts: Vec<Host>,
    executor: Arc<RemoteExecutor>,
    options: ExecOptions,
}

impl NodeGroup {
    pub fn new(hosts: Vec<Host>, executor: Arc<RemoteExecutor>, options: ExecOptions) -> Self {
        NodeGroup {
            hosts,
            executor,
            options,
        }
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// The options used by `run_on_one`/`run_on_all`.
    pub fn options(&self) -> &ExecOptions {
        &self.options
    }

    /// Addresses of every member, in order.
    pub fn addresses(&self) -> Vec<String> {
        self.hosts.iter().map(|h| h.address().to_string()).collect()
    }

    /// Run a command on the first member only. Useful for one-off steps such as creating a
    /// database schema on a replicated backend.
    pub async fn run_on_one(&self, command: &RemoteCommand) -> Result<HostOutput, RemoteError> {
        let first = self.hosts.first().ok_or(RemoteError::NoHosts)?;
        self.executor.run_on(first, command, &self.options).await
    }

    pub async fn run_on_all(&self, command: &RemoteCommand) -> Result<Vec<HostOutput>, RemoteError> {
        self.run_on_all_with(command, &self.options).await
    }

    pub async fn run_on_all_with(
        &self,
        command: &RemoteCommand,
        options: &ExecOptions,
    ) -> Result<Vec<HostOutput>, RemoteError> {
        self.executor.run(&self.hosts, command, options).await
    }

    pub async fn copy_to_all(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        self.executor
            .copy(&self.hosts, local, remote, &self.options)
            .await
    }
}
