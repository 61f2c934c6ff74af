//! Shared utility helpers.

pub mod error;
pub mod matrix;

pub use error::{BfkError, BfkResult};
pub use matrix::Matrix;
