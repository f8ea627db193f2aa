// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use crate::{
    commands::{ClusterArgs, Handle, HandledResult},
    orchestrator::Orchestrator,
};

pub async fn make(orchestrator: &Orchestrator, args: &ClusterArgs) -> HandledResult<()> {
    orchestrator
        .make(&args.cluster)
        .await
        .handle_err(|e| eprintln!("Could not prepare cluster '{}': {e}", args.cluster))?;

    println!("cluster '{}' is prepared", args.cluster);
    Ok(())
}
