//! # Brain CLI Module
//!
//! ## Available Commands
//!
//! - `demo` - Cluster scenario with the change feed attached
//! - `stress` - Random overlapping lock batches and graph edits from many threads
//! - `exec` - Build a small program in the graph and run it
//! - `config` - Show the effective engine configuration

mod commands;

use crate::config::{Overrides, load_config};
use brain_core::BrainError;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Brain - concurrent semantic graph engine
///
/// Every run starts from a fresh in-memory graph.
#[derive(Parser, Debug)]
#[command(name = "brain")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Engine settings file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Override `pool_capacity`
    #[arg(long, global = true)]
    pub pool_capacity: Option<usize>,

    /// Override `lock_wait_warn_ms` (0 disables slow-wait warnings)
    #[arg(long, global = true)]
    pub lock_wait_warn_ms: Option<u64>,

    /// Override `max_eval_depth`
    #[arg(long, global = true)]
    pub max_eval_depth: Option<usize>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            pool_capacity: self.pool_capacity,
            lock_wait_warn_ms: self.lock_wait_warn_ms,
            max_eval_depth: self.max_eval_depth,
        }
    }
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the cluster scenario and print the change events
    Demo,

    /// Hammer one graph from several threads
    Stress {
        /// Worker threads
        #[arg(short, long, default_value = "4")]
        threads: usize,

        /// Operations per thread
        #[arg(short, long, default_value = "1000")]
        rounds: usize,

        /// Nodes in the shared graph (half of them clusters)
        #[arg(short, long, default_value = "16")]
        nodes: usize,

        /// Seed for the per-thread random generators
        #[arg(short, long, default_value = "7")]
        seed: u64,
    },

    /// Build a program summing the given integers and run it
    Exec {
        /// Integers to sum (comma-separated)
        #[arg(short, long, value_delimiter = ',', default_value = "1,2,3,4,5")]
        values: Vec<i64>,
    },

    /// Show the effective configuration
    Config,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), BrainError> {
    let config = load_config(cli.config.as_deref(), cli.overrides())?;
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Demo) | None => cmd_demo(config, json_mode),
        Some(Commands::Stress {
            threads,
            rounds,
            nodes,
            seed,
        }) => cmd_stress(
            config,
            json_mode,
            &StressPlan {
                threads,
                rounds,
                nodes,
                seed,
            },
        ),
        Some(Commands::Exec { values }) => cmd_exec(config, json_mode, &values),
        Some(Commands::Config) => cmd_config(&config, json_mode),
    }
}
