// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Switchboard - collaborative coding-agent session orchestrator.
//!
//! This is the binary entry point for the orchestrator daemon.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use clap::{Parser, Subcommand};

mod serve;

/// Switchboard - collaborative coding-agent session orchestrator.
#[derive(Parser, Debug)]
#[command(name = "switchboard", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the orchestrator server.
    Serve,
    /// Print the effective configuration (secrets redacted).
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => {
            let config = match switchboard_config::load_config() {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("error: failed to load configuration: {e}");
                    std::process::exit(2);
                }
            };
            if let Err(e) = serve::run_serve(config).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        Commands::Config => match switchboard_config::load_config() {
            Ok(config) => serve::print_config(&config),
            Err(e) => {
                eprintln!("error: failed to load configuration: {e}");
                std::process::exit(2);
            }
        },
    }
}
