// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::{
    fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use {
    log::debug,
    serde::{Deserialize, Serialize},
    thiserror::Error,
};

use crate::cluster::ClusterDescriptor;

/// Where a cluster is in its lifecycle.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClusterState {
    /// Configured; nothing has been allocated yet.
    NotReady,
    /// Every member has been allocated.
    Allocated,
    /// Every role is installed and the connection target is known.
    Ready,
    /// Stopped by the admin.
    Down,
    /// Allocation failed part way through.
    Failed,
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(
            f,
            "{}",
            match self {
                Self::NotReady => "not_ready",
                Self::Allocated => "allocated",
                Self::Ready => "ready",
                Self::Down => "down",
                Self::Failed => "failed",
            }
        )
    }
}

/// The lifecycle operations whose legality depends on the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Allocate { force: bool },
    Make,
    Install,
    Stop,
    Start,
    Clean,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(
            f,
            "{}",
            match self {
                Self::Allocate { .. } => "allocate",
                Self::Make => "make",
                Self::Install => "install",
                Self::Stop => "stop",
                Self::Start => "start",
                Self::Clean => "clean",
            }
        )
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("cannot {operation} cluster '{cluster}' while it is {state}{}", .hint.map(|h| format!(" ({h})")).unwrap_or_default())]
pub struct IllegalTransition {
    pub cluster: String,
    pub operation: Operation,
    pub state: ClusterState,
    pub hint: Option<&'static str>,
}

impl ClusterState {
    /// Check that `operation` may run on a cluster in this state.
    pub fn check(self, cluster: &str, operation: Operation) -> Result<(), IllegalTransition> {
        use ClusterState::*;

        let hint = match (operation, self) {
            (Operation::Allocate { .. }, NotReady) => return Ok(()),
            (Operation::Allocate { force: true }, Allocated | Failed) => return Ok(()),
            (Operation::Allocate { force: false }, Allocated | Failed) => {
                Some("use --force to allocate the missing members")
            }
            (Operation::Make, Allocated) => return Ok(()),
            (Operation::Install, Allocated) => return Ok(()),
            (Operation::Install, NotReady) => Some("allocate it first"),
            (Operation::Stop, Ready) => return Ok(()),
            (Operation::Start, Down) => return Ok(()),
            (Operation::Clean, _) => return Ok(()),
            _ => None,
        };

        Err(IllegalTransition {
            cluster: cluster.to_string(),
            operation,
            state: self,
            hint,
        })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no cluster named '{0}' has been configured")]
    NotFound(String),

    #[error("'{0}' is not a valid cluster name")]
    InvalidName(String),

    #[error("could not access '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse cluster descriptor '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Keeps one JSON descriptor file per cluster in a directory.
#[derive(Debug, Clone)]
pub struct DescriptorStore {
    dir: PathBuf,
}

impl DescriptorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DescriptorStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, cluster: &str) -> Result<PathBuf, StoreError> {
        if cluster.is_empty()
            || cluster.starts_with('.')
            || cluster.contains(['/', '\\', '\0'])
        {
            return Err(StoreError::InvalidName(cluster.to_string()));
        }
        Ok(self.dir.join(format!("{cluster}.json")))
    }

    pub fn exists(&self, cluster: &str) -> Result<bool, StoreError> {
        Ok(self.path(cluster)?.exists())
    }

    pub fn load(&self, cluster: &str) -> Result<ClusterDescriptor, StoreError> {
        let path = self.path(cluster)?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(cluster.to_string()))
            }
            Err(e) => return Err(StoreError::Io { path, source: e }),
        };
        serde_json::from_str(&contents).map_err(|e| StoreError::Parse { path, source: e })
    }

    /// Write the descriptor, replacing any previous version.
    ///
    /// The new contents are written to a temporary file in the same directory and renamed over
    /// the old file, so a crash never leaves a half-written descriptor behind.
    pub fn save(&self, descriptor: &ClusterDescriptor) -> Result<(), StoreError> {
        let path = self.path(&descriptor.cluster_name)?;
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(io_err)?;
        let contents = serde_json::to_vec_pretty(descriptor).map_err(|e| StoreError::Parse {
            path: path.clone(),
            source: e,
        })?;

        let mut file = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        file.write_all(&contents).map_err(io_err)?;
        file.write_all(b"\n").map_err(io_err)?;
        file.as_file().sync_all().map_err(io_err)?;
        file.persist(&path).map_err(|e| io_err(e.error))?;

        debug!(
            "saved cluster '{}' ({}) to {}",
            descriptor.cluster_name,
            descriptor.state,
            path.display()
        );
        Ok(())
    }

    /// Remove a cluster's descriptor. Removing one that does not exist is not an error.
    pub fn delete(&self, cluster: &str) -> Result<(), StoreError> {
        let path = self.path(cluster)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io { path, source: e }),
        }
    }

    /// Names of every cluster with a descriptor, sorted.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::Io {
                    path: self.dir.clone(),
                    source: e,
                })
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension()? != "json" {
                    return None;
                }
                Some(path.file_stem()?.to_str()?.to_string())
            })
            .collect();
        names.sort();
        Ok(names)
    }
}
