// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Running commands on cluster members.

pub mod exec;
pub mod transport;

pub use exec::{ExecOptions, HostOutput, RemoteCommand, RemoteError, RemoteExecutor};
pub use transport::{CommandOutput, SshOptions, SshTransport, Transport, TransportError};
