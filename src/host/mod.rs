// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::fmt;

use crate::cluster::Machine;

pub mod group;
pub use group::NodeGroup;

/// A machine that remote commands can be sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    name: String,
    address: String,
    user: Option<String>,
    port: u16,
}

impl Host {
    pub fn new(name: &str, address: &str, user: Option<&str>, port: Option<u16>) -> Self {
        Host {
            name: name.to_string(),
            address: address.to_string(),
            user: user.map(|u| u.to_string()),
            port: match port {
                Some(p) => p,
                None => crate::ssh_port(),
            },
        }
    }

    /// Build the Host used to reach a cluster member. Members without any known address cannot
    /// be reached, so `None` is returned for them.
    pub fn from_machine(machine: &Machine) -> Option<Self> {
        let (address, port) = split_host_port(machine.address()?).ok()?;
        Some(Host::new(&machine.name, address, machine.user.as_deref(), port))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The `[user@]address` form used on ssh and scp command lines.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.address),
            None => self.address.clone(),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name == self.address {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} ({})", self.name, self.address)
        }
    }
}

/// Given a string that may be of the form "<address>:<port number>", split it out into the
/// address and port number portions.
pub fn split_host_port(host_str: &str) -> Result<(&str, Option<u16>), String> {
    match host_str.rsplit_once(':') {
        // Bracketless IPv6 addresses contain several colons and no port.
        Some((host, _)) if host.contains(':') => Ok((host_str, None)),
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|e| format!("invalid port in '{host_str}': {e}"))?;
            Ok((host, Some(port)))
        }
        None => Ok((host_str, None)),
    }
}
