// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use crate::{
    commands::{ClusterArgs, Handle, HandledResult},
    orchestrator::Orchestrator,
};

pub async fn start(orchestrator: &Orchestrator, args: &ClusterArgs) -> HandledResult<()> {
    let descriptor = orchestrator
        .start(&args.cluster)
        .await
        .handle_err(|e| eprintln!("Could not start cluster '{}': {e}", args.cluster))?;

    descriptor.print_summary();
    Ok(())
}

pub async fn stop(orchestrator: &Orchestrator, args: &ClusterArgs) -> HandledResult<()> {
    let descriptor = orchestrator
        .stop(&args.cluster)
        .await
        .handle_err(|e| eprintln!("Could not stop cluster '{}': {e}", args.cluster))?;

    descriptor.print_summary();
    Ok(())
}
