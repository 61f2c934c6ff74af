//! Error types for bfkern.

use thiserror::Error;

/// Result alias for bfkern operations.
pub type BfkResult<T> = std::result::Result<T, BfkError>;

/// Errors that can occur when running bfkern algorithms.
///
/// Per-sample and per-region measurement problems (NaN statistics, sparse
/// weight coverage, rejected correlations) are not errors: they mark the
/// affected sample unusable and processing continues. The variants here
/// cover malformed inputs and broken bookkeeping only.
#[derive(Debug, Error)]
pub enum BfkError {
    /// Zero-sized image or matrix dimensions.
    #[error("invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },
    /// Row stride shorter than the row width.
    #[error("invalid stride {stride} for width {width}")]
    InvalidStride { width: usize, stride: usize },
    /// Backing buffer shorter than the view requires.
    #[error("buffer too small: needed {needed}, got {got}")]
    BufferTooSmall { needed: usize, got: usize },
    /// Requested region does not fit inside the image.
    #[error("region ({x}, {y}) {width}x{height} out of bounds for {img_width}x{img_height} image")]
    RegionOutOfBounds {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        img_width: usize,
        img_height: usize,
    },
    /// The two images of a flat pair have different shapes.
    #[error("pair shape mismatch: {width1}x{height1} vs {width2}x{height2}")]
    PairShapeMismatch {
        width1: usize,
        height1: usize,
        width2: usize,
        height2: usize,
    },
    /// A square matrix was required.
    #[error("matrix is not square: {len} elements for side {side}")]
    NotSquare { len: usize, side: usize },
    /// A finished pair could not be routed back to any input exposure id.
    #[error("cannot match exposure id {id} back to an input exposure")]
    UnmatchedExposure { id: u64 },
    /// A configuration parameter is outside its valid range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
}
