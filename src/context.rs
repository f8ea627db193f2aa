// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use log::{debug, warn};

use crate::{config::Settings, state::DescriptorStore};

/// Counters for the calls made during one invocation.
#[derive(Debug, Default)]
pub struct Metrics {
    remote_commands: AtomicU64,
    remote_failures: AtomicU64,
    cloud_calls: AtomicU64,
    cloud_failures: AtomicU64,
}

impl Metrics {
    pub fn record_remote_command(&self) {
        self.remote_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remote_failure(&self) {
        self.remote_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cloud_call(&self) {
        self.cloud_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cloud_failure(&self) {
        self.cloud_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remote_commands(&self) -> u64 {
        self.remote_commands.load(Ordering::Relaxed)
    }

    pub fn remote_failures(&self) -> u64 {
        self.remote_failures.load(Ordering::Relaxed)
    }

    pub fn cloud_calls(&self) -> u64 {
        self.cloud_calls.load(Ordering::Relaxed)
    }

    pub fn cloud_failures(&self) -> u64 {
        self.cloud_failures.load(Ordering::Relaxed)
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} remote command attempt(s), {} failed; {} cloud call(s), {} failed",
            self.remote_commands(),
            self.remote_failures(),
            self.cloud_calls(),
            self.cloud_failures()
        )
    }
}

/// State shared by everything that runs during one invocation of the tool.
///
/// A new context is built for every invocation and handed down explicitly.
#[derive(Debug, Clone)]
pub struct Context {
    pub settings: Settings,
    pub config_dir: PathBuf,
    pub state_dir: PathBuf,
    pub metrics: Arc<Metrics>,
    interrupted: Arc<AtomicBool>,
}

impl Context {
    pub fn new(settings: Settings, config_dir: &Path, state_dir: &Path) -> Self {
        Context {
            settings,
            config_dir: config_dir.to_path_buf(),
            state_dir: state_dir.to_path_buf(),
            metrics: Arc::new(Metrics::default()),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> DescriptorStore {
        DescriptorStore::new(&self.state_dir)
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Ask running phases to stop handing out new work. Work that has already started is left
    /// to finish.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// Spawn a task that flags the context as interrupted on Ctrl-C. Must be called from within
    /// a tokio runtime.
    pub fn listen_for_interrupt(&self) {
        let context = self.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("interrupted; waiting for running operations to finish");
                    context.interrupt();
                }
                Err(e) => debug!("could not listen for interrupts: {e}"),
            }
        });
    }
}
