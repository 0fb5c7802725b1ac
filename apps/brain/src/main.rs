//! # Brain
//!
//! The command-line binary for the brain-core semantic graph engine.
//!
//! ## Usage
//!
//! ```bash
//! # Cluster scenario with change events
//! brain demo
//!
//! # Lock stress: random overlapping batches
//! brain stress --threads 8 --rounds 2000 --nodes 16
//!
//! # Build and run a small program
//! brain exec --json-mode
//!
//! # Effective configuration
//! brain --config brain.toml config
//! ```

use brain::cli;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // BRAIN_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("BRAIN_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "brain=info,brain_core=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_banner() {
    println!(
        r#"
  Brain v{}

  Concurrent semantic graph engine
"#,
        env!("CARGO_PKG_VERSION")
    );
}
