// =============================================================================
// Matrixon State Resolution - Clap Module
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Command line interface of the state resolution tool: resolve a fixture's
//   state maps, or check one fixture event against the fixture's state.
//
// =============================================================================

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, instrument};

/// Returns the current version of the crate with extra info if supplied
///
/// Set the environment variable `MATRIXON_VERSION_EXTRA` at build time to
/// include it in parenthesis after the SemVer version, e.g. a git commit hash.
pub fn version() -> String {
    let cargo_pkg_version = env!("CARGO_PKG_VERSION");

    match option_env!("MATRIXON_VERSION_EXTRA") {
        Some(x) => format!("{} ({})", cargo_pkg_version, x),
        None => cargo_pkg_version.to_owned(),
    }
}

/// Matrixon state resolution tool
///
/// Resolves conflicting room state with the Matrix state resolution v2
/// algorithm.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[clap(about, version, name = "matrixon-stateres")]
pub struct Args {
    /// Path to configuration file
    #[clap(short, long, help = "Path to configuration file", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[clap(short, long, help = "Log level override", global = true)]
    pub log_level: Option<String>,

    /// Enable verbose output
    #[clap(short, long, help = "Enable verbose output", global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Resolve the fixture's state maps and print the result as JSON
    Resolve {
        /// Fixture file
        #[clap(short, long, help = "Fixture file (JSON)")]
        fixture: PathBuf,
    },

    /// Check one fixture event against the fixture's first state map
    Check {
        /// Fixture file
        #[clap(short, long, help = "Fixture file (JSON)")]
        fixture: PathBuf,

        /// Event to check
        #[clap(short, long, help = "Event ID to check")]
        event: String,
    },
}

/// Parse command line arguments into structured data
#[instrument(level = "debug")]
pub fn parse() -> Args {
    let args = Args::parse();
    debug!("🔧 Command line arguments parsed");
    args
}
