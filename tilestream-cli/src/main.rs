//! TileStream CLI - Command-line interface
//!
//! This binary provides a command-line interface to the TileStream library.

mod commands;
mod error;

use clap::{Parser, Subcommand};

use crate::error::CliError;

/// Stream 3D Tiles and quantized-mesh terrain from the command line.
#[derive(Debug, Parser)]
#[command(name = "tilestream", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sample terrain heights over a rectangle and write a grayscale heightmap
    SampleHeightmap(commands::sample_heightmap::SampleHeightmapArgs),
    /// Stream a tileset from a fixed viewpoint and report selection statistics
    Inspect(commands::inspect::InspectArgs),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result: Result<(), CliError> = match cli.command {
        Commands::SampleHeightmap(args) => commands::sample_heightmap::run(args).await,
        Commands::Inspect(args) => commands::inspect::run(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
