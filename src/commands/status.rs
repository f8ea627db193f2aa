// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::path::Path;

use clap::Args;

use crate::{
    commands::{Handle, HandledResult},
    state::DescriptorStore,
};

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Cluster to describe. Lists every configured cluster when left out.
    pub cluster: Option<String>,
}

pub fn status(state_dir: &Path, args: &StatusArgs) -> HandledResult<()> {
    let store = DescriptorStore::new(state_dir);

    if let Some(cluster) = &args.cluster {
        let descriptor = store
            .load(cluster)
            .handle_err(|e| eprintln!("Could not load cluster '{cluster}': {e}"))?;
        descriptor.print_summary();
        return Ok(());
    }

    let names = store
        .list()
        .handle_err(|e| eprintln!("Could not list clusters: {e}"))?;
    if names.is_empty() {
        println!("no clusters configured in {}", state_dir.display());
    }
    for name in names {
        match store.load(&name) {
            Ok(descriptor) => println!(
                "{name}: {} ({}, {} member(s))",
                descriptor.state,
                descriptor.implementation,
                descriptor.members.len()
            ),
            Err(e) => println!("{name}: unreadable ({e})"),
        }
    }
    Ok(())
}
