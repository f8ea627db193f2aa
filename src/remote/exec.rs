// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::{path::Path, sync::Arc, time::Duration};

use {
    futures::future,
    log::{debug, warn},
    thiserror::Error,
};

use super::transport::{CommandOutput, Transport, TransportError};
use crate::{
    context::Metrics,
    host::Host,
    retry::{retry, RetryPolicy},
};

/// A command to run on a set of hosts.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCommand {
    /// A single shell command line, identical on every host.
    Line(String),

    /// Several lines that succeed or fail together, identical on every host.
    Script(Vec<String>),

    /// A command with per-host placeholders: `{name}`, `{address}` and `{user}`.
    Template(String),
}

impl RemoteCommand {
    pub fn line(line: impl Into<String>) -> Self {
        RemoteCommand::Line(line.into())
    }

    /// Produce the exact text sent to `host`'s shell.
    ///
    /// Unless errors are being ignored, the shell is told to stop at the first failing line so
    /// that a multi-line body fails as a unit.
    pub fn render(&self, host: &Host, ignore_errors: bool) -> String {
        let body = match self {
            RemoteCommand::Line(line) => line.clone(),
            RemoteCommand::Script(lines) => lines.join("\n"),
            RemoteCommand::Template(template) => template
                .replace("{name}", host.name())
                .replace("{address}", host.address())
                .replace("{user}", host.user().unwrap_or("root")),
        };
        if ignore_errors {
            body
        } else {
            format!("set -e\n{body}")
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecOptions {
    /// Limit for a single attempt on a single host.
    pub timeout: Duration,
    pub sudo: bool,

    /// Report non-zero exit statuses in the results instead of failing the call.
    pub ignore_errors: bool,

    /// Applied to connection failures and timeouts, never to non-zero exit statuses.
    pub retry: RetryPolicy,
}

impl Default for ExecOptions {
    fn default() -> Self {
        ExecOptions {
            timeout: Duration::from_secs(600),
            sudo: false,
            ignore_errors: false,
            retry: RetryPolicy::remote_default(),
        }
    }
}

impl ExecOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    pub fn ignore_errors(mut self, ignore_errors: bool) -> Self {
        self.ignore_errors = ignore_errors;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// The result of a command on one host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostOutput {
    pub hostname: String,
    pub output: String,
    pub exit_status: Option<i32>,

    /// Set when the command exited non-zero and errors were being ignored.
    pub failed: bool,
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("command failed on {host} (exit status {}): {stderr}", display_status(.status))]
    Failed {
        host: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("command timed out on {host} after {attempts} attempt(s) of {timeout:?}")]
    TimedOut {
        host: String,
        timeout: Duration,
        attempts: u32,
    },

    #[error("could not reach {host}: {source}")]
    Unreachable {
        host: String,
        #[source]
        source: TransportError,
    },

    #[error("no hosts to run on")]
    NoHosts,
}

impl RemoteError {
    /// The host the error refers to, if any.
    pub fn host(&self) -> Option<&str> {
        match self {
            RemoteError::Failed { host, .. }
            | RemoteError::TimedOut { host, .. }
            | RemoteError::Unreachable { host, .. } => Some(host),
            RemoteError::NoHosts => None,
        }
    }
}

fn display_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "killed by signal".to_string(),
    }
}

// What can go wrong in one attempt on one host.
#[derive(Debug, Error)]
enum AttemptError {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl AttemptError {
    fn is_transient(&self) -> bool {
        match self {
            AttemptError::TimedOut(_) => true,
            AttemptError::Transport(e) => e.is_transient(),
        }
    }

    fn into_remote(self, host: &Host, attempts: u32) -> RemoteError {
        match self {
            AttemptError::TimedOut(timeout) => RemoteError::TimedOut {
                host: host.to_string(),
                timeout,
                attempts,
            },
            AttemptError::Transport(source) => RemoteError::Unreachable {
                host: host.to_string(),
                source,
            },
        }
    }
}

/// Runs commands on many hosts at once over a [`Transport`].
#[derive(Debug)]
pub struct RemoteExecutor {
    transport: Arc<dyn Transport>,
    metrics: Arc<Metrics>,
}

impl RemoteExecutor {
    pub fn new(transport: Arc<dyn Transport>, metrics: Arc<Metrics>) -> Self {
        RemoteExecutor { transport, metrics }
    }

    /// Run `command` on every host in `hosts` concurrently.
    ///
    /// Results are returned in the same order as `hosts`. If any host fails, the error for the
    /// first failing host (in that order) is returned, after every host has finished. Hosts that
    /// time out or cannot be reached fail the call even when `ignore_errors` is set.
    pub async fn run(
        &self,
        hosts: &[Host],
        command: &RemoteCommand,
        options: &ExecOptions,
    ) -> Result<Vec<HostOutput>, RemoteError> {
        if hosts.is_empty() {
            return Err(RemoteError::NoHosts);
        }

        let results = future::join_all(
            hosts
                .iter()
                .map(|host| self.run_one(host, command.render(host, options.ignore_errors), options)),
        )
        .await;

        let mut outputs = Vec::with_capacity(hosts.len());
        for (host, result) in hosts.iter().zip(results) {
            let output = result?;
            let failed = !output.success();
            if failed {
                self.metrics.record_remote_failure();
                if !options.ignore_errors {
                    return Err(RemoteError::Failed {
                        host: host.to_string(),
                        status: output.exit_status,
                        stderr: output.stderr.trim().to_string(),
                    });
                }
                warn!(
                    "ignoring failure on {host} (exit status {}): {}",
                    display_status(&output.exit_status),
                    output.stderr.trim()
                );
            }
            outputs.push(HostOutput {
                hostname: host.name().to_string(),
                output: output.stdout,
                exit_status: output.exit_status,
                failed,
            });
        }
        Ok(outputs)
    }

    /// Run `command` on a single host.
    pub async fn run_on(
        &self,
        host: &Host,
        command: &RemoteCommand,
        options: &ExecOptions,
    ) -> Result<HostOutput, RemoteError> {
        let mut outputs = self.run(std::slice::from_ref(host), command, options).await?;
        Ok(outputs.remove(0))
    }

    async fn run_one(
        &self,
        host: &Host,
        script: String,
        options: &ExecOptions,
    ) -> Result<CommandOutput, RemoteError> {
        debug!("running on {host}: {script}");
        let script = script.as_str();
        retry(&options.retry, AttemptError::is_transient, move || {
            self.metrics.record_remote_command();
            async move {
                tokio::time::timeout(
                    options.timeout,
                    self.transport.exec(host, script, options.sudo),
                )
                .await
                .map_err(|_| AttemptError::TimedOut(options.timeout))?
                .map_err(AttemptError::from)
            }
        })
        .await
        .map_err(|e| {
            let attempts = e.attempts();
            e.into_inner().into_remote(host, attempts)
        })
    }

    /// Copy a local file to `remote` on every host concurrently.
    pub async fn copy(
        &self,
        hosts: &[Host],
        local: &Path,
        remote: &str,
        options: &ExecOptions,
    ) -> Result<(), RemoteError> {
        if hosts.is_empty() {
            return Err(RemoteError::NoHosts);
        }

        let results = future::join_all(hosts.iter().map(|host| async move {
            retry(&options.retry, AttemptError::is_transient, move || async move {
                tokio::time::timeout(options.timeout, self.transport.copy(host, local, remote))
                    .await
                    .map_err(|_| AttemptError::TimedOut(options.timeout))?
                    .map_err(AttemptError::from)
            })
            .await
            .map_err(|e| {
                let attempts = e.attempts();
                e.into_inner().into_remote(host, attempts)
            })
        }))
        .await;

        results.into_iter().collect()
    }
}
