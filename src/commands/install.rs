// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use crate::{
    commands::{ClusterArgs, Handle, HandledResult},
    orchestrator::Orchestrator,
};

pub async fn install(orchestrator: &Orchestrator, args: &ClusterArgs) -> HandledResult<()> {
    let descriptor = orchestrator
        .install(&args.cluster)
        .await
        .handle_err(|e| eprintln!("Could not install cluster '{}': {e}", args.cluster))?;

    descriptor.print_summary();
    Ok(())
}
