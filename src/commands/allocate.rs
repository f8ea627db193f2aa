// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Args;

use crate::{
    commands::{Handle, HandledResult},
    orchestrator::Orchestrator,
};

#[derive(Args, Debug, Clone)]
pub struct AllocateArgs {
    /// Name of the cluster.
    pub cluster: String,

    /// Allocate the members still missing from an allocated or failed cluster.
    #[arg(long)]
    pub force: bool,
}

pub async fn allocate(orchestrator: &Orchestrator, args: &AllocateArgs) -> HandledResult<()> {
    let descriptor = orchestrator
        .allocate(&args.cluster, args.force)
        .await
        .handle_err(|e| eprintln!("Could not allocate cluster '{}': {e}", args.cluster))?;

    descriptor.print_summary();
    Ok(())
}
