// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! The channel commands travel over to reach a host.
//!
//! The orchestrator never talks to hosts directly: it goes through a [`Transport`], which in
//! production is the system `ssh`/`scp` client and in tests is a fake from `test_env`.

use std::{
    fmt, io,
    path::{Path, PathBuf},
    process::{Output, Stdio},
};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    thiserror::Error,
    tokio::{
        io::AsyncWriteExt,
        process::{Child, Command},
    },
};

use crate::host::Host;

/// What a command left behind when it finished on a host.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandOutput {
    /// `None` when the remote shell was killed by a signal.
    pub exit_status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The connection to the host could not be established or was dropped.
    #[error("connection to {host} failed: {message}")]
    Connection { host: String, message: String },

    #[error("I/O error while talking to {host}: {source}")]
    Io {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("local file '{0}' does not exist")]
    MissingFile(PathBuf),
}

impl TransportError {
    /// Whether trying again has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Connection { .. } | TransportError::Io { .. }
        )
    }
}

#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Run `script` with a shell on `host`. The whole script is handed to a single shell
    /// invocation. With `sudo`, that shell runs as root.
    async fn exec(&self, host: &Host, script: &str, sudo: bool)
        -> Result<CommandOutput, TransportError>;

    /// Copy the local file at `local` to `remote` on `host`.
    async fn copy(&self, host: &Host, local: &Path, remote: &str) -> Result<(), TransportError>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SshOptions {
    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    #[serde(default)]
    pub strict_host_key_checking: bool,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for SshOptions {
    fn default() -> Self {
        SshOptions {
            identity_file: None,
            strict_host_key_checking: false,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// ssh exits with this status when the failure was its own rather than the remote command's.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// A [`Transport`] built on the OpenSSH client binaries.
#[derive(Debug, Clone, Default)]
pub struct SshTransport {
    options: SshOptions,
}

impl SshTransport {
    pub fn new(options: SshOptions) -> Self {
        SshTransport { options }
    }

    // Arguments shared by ssh and scp.
    fn common_args(&self, cmd: &mut Command) {
        cmd.arg("-o").arg("BatchMode=yes");
        cmd.arg("-o").arg(format!(
            "StrictHostKeyChecking={}",
            if self.options.strict_host_key_checking {
                "yes"
            } else {
                "no"
            }
        ));
        cmd.arg("-o")
            .arg(format!("ConnectTimeout={}", self.options.connect_timeout_secs));
        if let Some(identity) = &self.options.identity_file {
            cmd.arg("-i").arg(identity);
        }

        // If the keys live in an agent, make sure ssh can find it.
        if let Some(auth_sock) = std::env::var_os("SSH_AUTH_SOCK") {
            cmd.env("SSH_AUTH_SOCK", auth_sock);
        }
    }
}

/// Write `input` to the child's stdin while its stdout and stderr are drained, then wait for it
/// to exit.
///
/// A child that stops reading stdin early (it exited, or closed it) is not an error; its exit
/// status says what happened.
pub async fn feed_and_wait(mut child: Child, input: &[u8]) -> io::Result<Output> {
    let stdin = child.stdin.take();
    let feed = async move {
        let Some(mut stdin) = stdin else {
            return Ok(());
        };
        stdin.write_all(input).await?;
        stdin.shutdown().await
    };

    let (fed, output) = tokio::join!(feed, child.wait_with_output());
    match fed {
        Err(e) if e.kind() != io::ErrorKind::BrokenPipe => Err(e),
        _ => output,
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn exec(
        &self,
        host: &Host,
        script: &str,
        sudo: bool,
    ) -> Result<CommandOutput, TransportError> {
        let mut cmd = Command::new("ssh");
        self.common_args(&mut cmd);
        cmd.arg("-p")
            .arg(host.port().to_string())
            .arg(host.destination())
            .arg(if sudo { "sudo -n bash -s" } else { "bash -s" })
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed-out call drops this future, which must not leave ssh running.
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| TransportError::Spawn {
            program: "ssh".to_string(),
            source: e,
        })?;
        let output = feed_and_wait(child, script.as_bytes())
            .await
            .map_err(|e| TransportError::Io {
                host: host.to_string(),
                source: e,
            })?;

        let output = CommandOutput {
            exit_status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if output.exit_status == Some(SSH_CONNECTION_FAILURE) {
            return Err(TransportError::Connection {
                host: host.to_string(),
                message: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    async fn copy(&self, host: &Host, local: &Path, remote: &str) -> Result<(), TransportError> {
        if !local.exists() {
            return Err(TransportError::MissingFile(local.to_path_buf()));
        }

        let mut cmd = Command::new("scp");
        self.common_args(&mut cmd);
        cmd.arg("-P")
            .arg(host.port().to_string())
            .arg(local)
            .arg(format!("{}:{remote}", host.destination()))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = cmd.output().await.map_err(|e| TransportError::Spawn {
            program: "scp".to_string(),
            source: e,
        })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(TransportError::Connection {
                host: host.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
