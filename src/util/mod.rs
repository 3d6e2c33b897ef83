//! Utility types and functions.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - Math re-exports from glam and the sampling helpers used by the kernels

mod error;
mod math;

pub use error::*;
pub use math::*;
