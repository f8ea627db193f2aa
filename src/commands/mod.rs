// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

pub mod allocate;
pub mod clean;
pub mod configure;
pub mod install;
pub mod make;
pub mod power;
pub mod status;

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use {
    allocate::AllocateArgs,
    clap::{Args, Parser, Subcommand},
    configure::ConfigureArgs,
    log::info,
    status::StatusArgs,
};

use crate::{
    cloud::CloudRegistry,
    config::{self, CloudConfig, Settings},
    context::Context,
    orchestrator::Orchestrator,
    remote::SshTransport,
    role::RoleRegistry,
};

/// A `HandledError` represents an error that has already been handled. When you call a function
/// that returns a `HandledError` or `HandledResult`, you don't need to do anything with that error,
/// other than just be aware that it happened, and return it on to your caller.
///
/// `main()` has a special responsibility: since its "caller" is, in a certain sense, the operating
/// system, `main()` must return a nonzero exit status when it gets a `HandledError`.
///
/// The primary way to construct a `HandledError` is with the `handle_err()` function, which turns a
/// generic error into a `HandledError`, and also runs some caller-provided code to handle the
/// error. That provided code would normally do something like report the error to stderr.
#[derive(Debug, PartialEq)]
pub struct HandledError {}

pub type HandledResult<T> = std::result::Result<T, HandledError>;

pub trait Handle<T, F> {
    fn handle_err(self, handler: F) -> HandledResult<T>;
}

impl<T, E, F: FnOnce(E)> Handle<T, F> for std::result::Result<T, E> {
    /// Handle an error by running the provided `handler` code, giving it the error.
    ///
    /// Then, return a `HandledResult`, so that transitive callers of this function know that they
    /// do not need to do anything further to handle the error.
    fn handle_err(self, handler: F) -> HandledResult<T> {
        self.map_err(|e| {
            handler(e);
            HandledError {}
        })
    }
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Directory holding topologies.toml, implementations.toml, clouds.toml and settings.toml.
    #[arg(long, global = true)]
    pub config_dir: Option<String>,

    /// Directory holding one descriptor per configured cluster.
    #[arg(long, global = true)]
    pub state_dir: Option<String>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the descriptor of a new cluster.
    Configure(ConfigureArgs),
    /// Launch the cluster's machines.
    Allocate(AllocateArgs),
    /// Run baseline preparation on every managed machine.
    Make(ClusterArgs),
    /// Install every role and work out the connection target.
    Install(ClusterArgs),
    /// Tear the cluster down and delete its descriptor.
    Clean(ClusterArgs),
    /// Configure, allocate, make and install.
    All(ConfigureArgs),
    Start(ClusterArgs),
    Stop(ClusterArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
    /// Name of the cluster.
    pub cluster: String,
}

impl Cli {
    pub fn config_dir(&self) -> PathBuf {
        PathBuf::from(
            self.config_dir
                .clone()
                .unwrap_or_else(crate::default_config_dir),
        )
    }

    pub fn state_dir(&self) -> PathBuf {
        PathBuf::from(self.state_dir.clone().unwrap_or_else(crate::default_state_dir))
    }
}

/// Build an orchestrator with the built-in clouds and roles, talking to hosts over ssh.
pub fn new_orchestrator(context: &Context, clouds: BTreeMap<String, CloudConfig>) -> Orchestrator {
    let transport = Arc::new(SshTransport::new(context.settings.ssh.clone()));
    Orchestrator::new(
        context.clone(),
        clouds,
        CloudRegistry::with_builtins(),
        RoleRegistry::with_builtins(),
        transport,
    )
}

/// Build an orchestrator for a cluster that has already been configured. Only the cloud
/// definitions are read; everything else comes from the cluster's descriptor.
fn load_orchestrator(context: &Context) -> HandledResult<Orchestrator> {
    let clouds = config::load_clouds(&context.config_dir)
        .handle_err(|e| eprintln!("Could not load cloud definitions: {e}"))?;
    Ok(new_orchestrator(context, clouds))
}

pub fn main(cli: &Cli) -> HandledResult<()> {
    let config_dir = cli.config_dir();
    let state_dir = cli.state_dir();

    if let Commands::Status(args) = &cli.command {
        return status::status(&state_dir, args);
    }

    let settings =
        Settings::load(&config_dir).handle_err(|e| eprintln!("Could not load settings: {e}"))?;
    let context = Context::new(settings, &config_dir, &state_dir);

    let rt = tokio::runtime::Runtime::new()
        .handle_err(|e| eprintln!("Error launching tokio runtime: {e}"))?;

    rt.block_on(async {
        context.listen_for_interrupt();
        let result = match &cli.command {
            Commands::Configure(args) => configure::configure(&context, args).await,
            Commands::All(args) => configure::all(&context, args).await,
            Commands::Allocate(args) => allocate::allocate(&load_orchestrator(&context)?, args).await,
            Commands::Make(args) => make::make(&load_orchestrator(&context)?, args).await,
            Commands::Install(args) => install::install(&load_orchestrator(&context)?, args).await,
            Commands::Clean(args) => clean::clean(&load_orchestrator(&context)?, args).await,
            Commands::Start(args) => power::start(&load_orchestrator(&context)?, args).await,
            Commands::Stop(args) => power::stop(&load_orchestrator(&context)?, args).await,
            Commands::Status(args) => status::status(&state_dir, args),
        };
        info!("{}", context.metrics);
        result
    })
}
