// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Args;

use crate::{
    commands::{new_orchestrator, Handle, HandledResult},
    config::Documents,
    context::Context,
};

#[derive(Args, Debug, Clone)]
pub struct ConfigureArgs {
    /// Name of the cluster.
    pub cluster: String,

    /// Implementation from implementations.toml to build the cluster from.
    #[arg(short, long)]
    pub implementation: String,

    /// Replace the descriptor of a cluster that was already configured.
    #[arg(long)]
    pub force: bool,
}

fn load_documents(context: &Context) -> HandledResult<Documents> {
    Documents::load(&context.config_dir).handle_err(|e| {
        eprintln!(
            "Could not load configuration from '{}': {e}",
            context.config_dir.display()
        )
    })
}

pub async fn configure(context: &Context, args: &ConfigureArgs) -> HandledResult<()> {
    let documents = load_documents(context)?;
    let orchestrator = new_orchestrator(context, documents.clouds.clone());

    let descriptor = orchestrator
        .configure(&args.cluster, &documents, &args.implementation, args.force)
        .await
        .handle_err(|e| eprintln!("Could not configure cluster '{}': {e}", args.cluster))?;

    descriptor.print_summary();
    Ok(())
}

pub async fn all(context: &Context, args: &ConfigureArgs) -> HandledResult<()> {
    let documents = load_documents(context)?;
    let orchestrator = new_orchestrator(context, documents.clouds.clone());

    let descriptor = orchestrator
        .all(&args.cluster, &documents, &args.implementation, args.force)
        .await
        .handle_err(|e| eprintln!("Could not bring up cluster '{}': {e}", args.cluster))?;

    descriptor.print_summary();
    Ok(())
}
