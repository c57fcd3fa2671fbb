//! Tessera demo CLI.
//!
//! Drives the query layer against the in-memory store so its streaming and
//! conditional-write behavior can be observed from a terminal.
//!
//! # Quick Start
//!
//! ```bash
//! # Stream 25 rows in pages of 10, requesting 5 and then 30
//! tessera stream --rows 25 --page-size 10 --request 5 --request 30
//!
//! # Insert the same key twice with IF NOT EXISTS
//! tessera conditional
//!
//! # Show the resolved configuration
//! tessera config --project .
//! ```

mod commands;
mod table;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Tessera - a backpressure-aware query layer for partitioned column stores.
#[derive(Parser)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory holding tessera.toml.
    #[arg(short, long, global = true, default_value = ".")]
    project: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a paged result with explicit demand.
    Stream {
        /// Number of rows to seed.
        #[arg(short, long, default_value = "25")]
        rows: u32,

        /// Rows per page (overrides the configured default).
        #[arg(long)]
        page_size: Option<u32>,

        /// Demand to signal, in order. Repeat for several requests.
        #[arg(short = 'n', long = "request", default_values_t = [5, 30])]
        requests: Vec<u64>,

        /// Simulated network latency per round trip, in milliseconds.
        #[arg(long, default_value = "0")]
        latency_ms: u64,
    },

    /// Insert the same key twice with IF NOT EXISTS.
    Conditional {
        /// Key to insert.
        #[arg(long, default_value = "1")]
        id: i64,
    },

    /// Show the resolved configuration.
    Config {
        /// Output format (toml, text).
        #[arg(short, long, default_value = "toml")]
        format: String,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Stream {
            rows,
            page_size,
            requests,
            latency_ms,
        } => commands::stream::run(&cli.project, rows, page_size, &requests, latency_ms),
        Commands::Conditional { id } => commands::conditional::run(&cli.project, id),
        Commands::Config { format } => commands::config::show(&cli.project, &format),
    }
}
