//! Shellac - a personal music-library catalog builder.
//!
//! Scans a directory tree of audio files and reconciles it into a
//! deduplicated relational catalog of tracks, albums, artists, genres and
//! artwork. Rescans are idempotent: an unchanged tree produces no catalog
//! changes.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod library;
pub mod metadata;
pub mod model;
pub mod scanner;
#[cfg(test)]
pub mod test_utils;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("shellac=info".parse()?))
        .init();

    cli::run_command(&args)
}
