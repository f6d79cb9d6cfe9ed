//! Utility types shared across the crate.
//!
//! - [`Error`] / [`Result`] / [`Severity`] - Error handling

mod error;

pub use error::*;
