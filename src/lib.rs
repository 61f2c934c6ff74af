//! bfkern measures the brighter-fatter effect of an imaging sensor and
//! turns it into deconvolution kernels.
//!
//! The workflow has two stages. First, matched pairs of flat-field images
//! are differenced and the spatial covariance of the difference is measured
//! as a function of signal level, either by direct summation or via FFT.
//! Second, the covariance samples of each detector region are rejected,
//! normalized, and averaged into a single correlation kernel, which a
//! Chebyshev-accelerated successive over-relaxation solver converts into
//! the final deconvolution kernel.
//!
//! Image loading, detector geometry lookup, and persistence of the results
//! are external concerns; the crate operates on in-memory pixel buffers and
//! plain parameter structs. Optional parallelism over regions is available
//! via the `rayon` feature.

pub mod cov;
pub mod detector;
pub mod image;
pub mod kernel;
pub mod pairs;
pub mod stats;
pub mod util;

pub use cov::{
    cov_matrices_from_lags, fft_shape_for, measure_mean_var_cov, CovConfig, CovEstimate,
    CovMethod, CovSample, CovSeries, LagCov, MaskedImage, Rect,
};
pub use detector::{solve_kernels, KernelLevel, KernelSet, RegionKernel, SolveConfig};
pub use image::{bin_image, bin_mask, mask_edges, ImageView, OwnedImage};
pub use kernel::solve::{successive_over_relax, SorConfig, SorReport};
pub use kernel::{
    average_correlations, scale_correlations, tile_quarter, AveragerConfig, ScaledCorrelations,
};
pub use pairs::{
    assemble_series, extract_covariances, match_exposure_index, DetectorLayout, Exposure,
    PairConfig, PairCovariances, PairPolicy, Region, RegionMode, SignalWindow,
};
pub use stats::{
    clipped_mean, clipped_moments, clipped_variance, sigma_clip_correction, ClipParams,
    ClippedMoments,
};
pub use util::{BfkError, BfkResult, Matrix};
