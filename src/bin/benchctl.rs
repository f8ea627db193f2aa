// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Parser;

use benchctl_lib::commands::{self, Cli};

/// The benchctl binary drives benchmark clusters through their lifecycle: "configure",
/// "allocate", "make", "install", "clean", and so on.
fn main() {
    let args = Cli::parse();

    let default_filter = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("BENCHCTL_LOG", default_filter),
    )
    .init();

    if commands::main(&args).is_err() {
        std::process::exit(1);
    }
}
