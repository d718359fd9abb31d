//! Matrixon Core Library
//!
//! Author: arkSong <arksong2018@gmail.com>
//! Version: 0.11.0-alpha
//!
//! Fundamental types and traits shared by the Matrixon state resolution
//! crates: the immutable [`Event`](types::Event) value, the
//! [`StateMap`](types::StateMap) with its one-value-per-key invariant, the
//! [`EventStore`](traits::EventStore) collaborator and the engine
//! configuration.
//!
//! # Examples
//! ```rust
//! use matrixon_core::{config::StateResConfig, Result};
//!
//! fn example() -> Result<()> {
//!     let config = StateResConfig::default();
//!     config.validate()?;
//!     Ok(())
//! }
//! # example().unwrap();
//! ```

pub mod config;
pub mod traits;
pub mod types;
pub mod utils;

pub use matrixon_common::error::{MatrixonError, Result};
pub use types::{Event, EventBuilder, Membership, StateKey, StateMap, StateMapId};
