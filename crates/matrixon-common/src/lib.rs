//! Matrixon Common Library
//!
//! Shared error types for the Matrixon state resolution crates.

pub mod error;

pub use error::{MatrixonError, Result};
