// =============================================================================
// Matrixon State Resolution - Library Crate
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Tooling around the Matrixon state resolution engine: layered
//   configuration for the command line tool and the JSON fixture format it
//   resolves and checks.
//
// =============================================================================

pub mod config;
pub mod fixture;

pub use config::Config;
pub use fixture::Fixture;

// Re-export workspace crates
pub use matrixon_common as common;
pub use matrixon_core as core;
pub use matrixon_rooms as rooms;
