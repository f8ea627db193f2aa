// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use crate::{
    commands::{ClusterArgs, Handle, HandledResult},
    orchestrator::Orchestrator,
};

pub async fn clean(orchestrator: &Orchestrator, args: &ClusterArgs) -> HandledResult<()> {
    orchestrator
        .clean(&args.cluster)
        .await
        .handle_err(|e| eprintln!("Could not clean up cluster '{}': {e}", args.cluster))?;

    println!("cluster '{}' has been removed", args.cluster);
    Ok(())
}
