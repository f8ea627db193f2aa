// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

pub mod cloud;
pub mod cluster;
pub mod commands;
pub mod config;
pub mod context;
pub mod host;
pub mod orchestrator;
pub mod remote;
pub mod retry;
pub mod role;
pub mod state;
pub mod test_env;
pub mod topology;

/// Gets the port that sshd listens on for hosts that do not name one.
pub fn ssh_port() -> u16 {
    match std::env::var("BENCHCTL_SSH_PORT") {
        Ok(port) => port.parse::<u16>().unwrap_or_else(|_| {
            log::warn!("ignoring invalid BENCHCTL_SSH_PORT '{port}'");
            22
        }),
        Err(_) => 22,
    }
}

pub fn default_config_dir() -> String {
    match std::env::var("BENCHCTL_CONFIG_DIR") {
        Ok(dir) => dir,
        Err(_) => "/etc/benchctl".to_string(),
    }
}

pub fn default_state_dir() -> String {
    match std::env::var("BENCHCTL_STATE_DIR") {
        Ok(dir) => dir,
        Err(_) => "/var/lib/benchctl".to_string(),
    }
}
