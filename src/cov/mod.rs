//! Covariance estimation from matched flat-field pairs.
//!
//! Given two flat images taken at the same signal level, this module forms
//! the flux-normalized difference image, measures its sigma-clipped mean and
//! variance, and computes the 2D autocovariance of the difference out to a
//! maximum lag, either by direct summation or in the frequency domain.
//! Estimation failures (NaN statistics, too few good pixels) are reported
//! as `Ok(None)` so that a calibration run continues with other pairs.

use tracing::warn;

use crate::image::{bin_image, bin_mask, ImageView, OwnedImage};
use crate::stats::{clipped_mean, clipped_moments, ClipParams};
use crate::util::{BfkError, BfkResult, Matrix};

pub(crate) mod direct;
pub(crate) mod fft;

pub use fft::fft_shape_for;

/// Rectangular pixel region of a detector, in detector coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

/// One image plus its mask plane, borrowed from the provider.
#[derive(Copy, Clone)]
pub struct MaskedImage<'a> {
    pub image: ImageView<'a, f32>,
    pub mask: ImageView<'a, u16>,
}

/// Covariance evaluation strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CovMethod {
    /// Zero-padded FFT autocorrelation with per-lag weight normalization.
    #[default]
    Fft,
    /// Direct summation over weighted pixel pairs.
    Direct,
}

/// Parameters of the per-pair covariance measurement.
#[derive(Clone, Debug)]
pub struct CovConfig {
    /// Maximum lag in both axes; the quarter matrix has side `max_lag + 1`.
    pub max_lag: usize,
    /// Sigma-clipping applied to means and to the difference variance.
    pub clip: ClipParams,
    /// Mask bits that exclude a pixel from statistics and weights.
    pub bad_mask_bits: u16,
    /// Minimum number of weighted pixels required to compute covariances.
    pub min_good_pixels: usize,
    /// Warn when variance and half the zero-lag covariance differ by more
    /// than this percentage.
    pub var_vs_cov_warn_percent: f64,
    /// Integer binning factor applied to both images before estimation.
    pub bin_size: usize,
    /// Number of border pixels flagged as suspect before estimation.
    pub edge_suspect: usize,
    /// Evaluation strategy.
    pub method: CovMethod,
}

impl Default for CovConfig {
    fn default() -> Self {
        Self {
            max_lag: 8,
            clip: ClipParams::default(),
            bad_mask_bits: u16::MAX,
            min_good_pixels: 10_000,
            var_vs_cov_warn_percent: 1.0,
            bin_size: 1,
            edge_suspect: 0,
            method: CovMethod::Fft,
        }
    }
}

/// Covariance of the difference image at one lag.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LagCov {
    /// Lag in x.
    pub dx: usize,
    /// Lag in y.
    pub dy: usize,
    /// Zero-lag covariance, repeated on every entry for reference.
    pub var: f64,
    /// Covariance at `(dx, dy)`.
    pub cov: f64,
    /// Number of pixel pairs that entered the estimate.
    pub npix: u64,
}

/// Successful per-pair measurement, before clip-bias correction.
#[derive(Clone, Debug)]
pub struct CovEstimate {
    /// Average of the clipped means of the two images (signal proxy).
    pub mean: f64,
    /// Half the clipped variance of the normalized difference image.
    pub variance: f64,
    /// Covariances for all lags with `0 <= dx, dy <= max_lag`, ordered with
    /// `dy` outer and `dx` inner; `(0, 0)` comes first.
    pub lags: Vec<LagCov>,
}

/// One covariance measurement of one region at one exposure level.
///
/// The quarter matrices are indexed `(dy, dx)`. `usable == false` records
/// an exclusion decision (NaN statistics or out-of-window flux); the sample
/// stays in its series slot so provenance lines up with processed pairs.
#[derive(Clone, Debug)]
pub struct CovSample {
    /// Exposure ids of the two flats that formed the difference.
    pub exposure_pair: (u64, u64),
    /// Exposure level the pair was matched on (time or id).
    pub exposure_level: f64,
    /// Mean signal in ADU.
    pub mean: f64,
    /// Clip-corrected difference variance in ADU^2.
    pub variance: f64,
    /// Clip-corrected quarter covariance matrix, side `max_lag + 1`,
    /// carrying the conventional factor of one half from the difference
    /// image (the kernel averager removes it).
    pub cov: Matrix,
    /// Inverse standard error of each covariance entry, NaN mapped to 0.
    pub sqrt_weight: Matrix,
    /// Pixel-pair counts per lag.
    pub npix: Matrix,
    /// Whether the sample may enter kernel averaging.
    pub usable: bool,
}

/// Ordered per-region sequence of covariance samples.
#[derive(Clone, Debug, Default)]
pub struct CovSeries {
    /// Samples sorted by mean signal.
    pub samples: Vec<CovSample>,
}

impl CovSeries {
    /// Iterates over the samples marked usable.
    pub fn usable(&self) -> impl Iterator<Item = &CovSample> {
        self.samples.iter().filter(|s| s.usable)
    }
}

/// Measures the mean of two matched flats and the variance and covariance
/// of their normalized difference.
///
/// Returns `Ok(None)` when the pair cannot produce a usable sample: NaN
/// clipped mean in either image, or fewer weighted pixels than
/// `min_good_pixels`. Shape mismatches between the two images are the only
/// fatal condition.
pub fn measure_mean_var_cov(
    im1: MaskedImage<'_>,
    im2: MaskedImage<'_>,
    region: Option<Rect>,
    cfg: &CovConfig,
) -> BfkResult<Option<CovEstimate>> {
    if im1.image.width() != im2.image.width() || im1.image.height() != im2.image.height() {
        return Err(BfkError::PairShapeMismatch {
            width1: im1.image.width(),
            height1: im1.image.height(),
            width2: im2.image.width(),
            height2: im2.image.height(),
        });
    }

    let (pix1, msk1) = prepare(im1, region, cfg.bin_size)?;
    let (pix2, msk2) = prepare(im2, region, cfg.bin_size)?;

    let mu1 = clipped_mean(&good_values(&pix1, &msk1, cfg.bad_mask_bits), cfg.clip);
    let mu2 = clipped_mean(&good_values(&pix2, &msk2, cfg.bad_mask_bits), cfg.clip);
    if mu1.is_nan() || mu2.is_nan() {
        warn!(mu1, mu2, "clipped mean of image 1 or 2 is NaN");
        return Ok(None);
    }
    let mu = 0.5 * (mu1 + mu2);

    // Symmetric difference: diff = (mu2*im1 - mu1*im2) / (0.5*(mu1 + mu2)).
    // Cancels the mean while preserving the fluctuation statistics.
    let width = pix1.width();
    let height = pix1.height();
    let mut diff = Vec::with_capacity(width * height);
    let mut diff_mask = Vec::with_capacity(width * height);
    for ((&v1, &v2), (&m1, &m2)) in pix1
        .as_slice()
        .iter()
        .zip(pix2.as_slice())
        .zip(msk1.as_slice().iter().zip(msk2.as_slice()))
    {
        diff.push((mu2 * v1 as f64 - mu1 * v2 as f64) / mu);
        diff_mask.push(m1 | m2);
    }

    let good: Vec<f64> = diff
        .iter()
        .zip(&diff_mask)
        .filter(|(_, &m)| m & cfg.bad_mask_bits == 0)
        .map(|(&d, _)| d)
        .collect();
    let diff_moments = clipped_moments(&good, cfg.clip);
    // Half the variance of the difference of two equal-variance images.
    let var_diff = 0.5 * diff_moments.variance;

    // Weight mask: pixels inside the clip cut and clean in both planes.
    let cut = diff_moments.mean + cfg.clip.n_sigma * diff_moments.variance.sqrt();
    let mut weight = Vec::with_capacity(diff.len());
    let mut n_good = 0u64;
    for (&d, &m) in diff.iter().zip(&diff_mask) {
        let w = if m & cfg.bad_mask_bits == 0 && d.abs() <= cut {
            n_good += 1;
            1.0
        } else {
            0.0
        };
        weight.push(w);
    }

    if (n_good as usize) < cfg.min_good_pixels {
        warn!(
            n_good,
            threshold = cfg.min_good_pixels,
            "too few good pixels for covariance calculation"
        );
        return Ok(None);
    }

    let diff_img = OwnedImage::new(diff, width, height)?;
    let weight_img = OwnedImage::new(weight, width, height)?;
    let lags = match cfg.method {
        CovMethod::Direct => direct::compute_cov_direct(&diff_img, &weight_img, cfg.max_lag),
        CovMethod::Fft => {
            let shape = fft_shape_for(width, height, cfg.max_lag);
            let transform = fft::CovFft::new(&diff_img, &weight_img, shape, cfg.max_lag)?;
            transform.report(cfg.max_lag)
        }
    };

    // Cov[0,0] carries a factor of two relative to the halved variance.
    let cov00 = lags[0].cov;
    let fractional_diff = 100.0 * (1.0 - var_diff / (0.5 * cov00)).abs();
    if fractional_diff >= cfg.var_vs_cov_warn_percent {
        warn!(
            fractional_diff,
            threshold = cfg.var_vs_cov_warn_percent,
            "clipped variance and Cov[0,0]/2 disagree"
        );
    }

    Ok(Some(CovEstimate {
        mean: mu,
        variance: var_diff,
        lags,
    }))
}

/// Packs a lag list into quarter matrices indexed `(dy, dx)`.
///
/// Entries are halved, because the covariances were measured on the
/// difference of two images; the stored zero lag is then directly
/// comparable to the halved variance. The weight matrix is the inverse
/// standard error of each entry under the first-order estimate
/// `var^2 * (1 + delta_00) / npix`, with non-finite entries mapped to zero.
pub fn cov_matrices_from_lags(lags: &[LagCov], max_lag: usize) -> (Matrix, Matrix, Matrix) {
    let side = max_lag + 1;
    let mut cov = Matrix::filled(side, f64::NAN);
    let mut sqrt_weight = Matrix::zeros(side);
    let mut npix = Matrix::zeros(side);
    for lag in lags {
        if lag.dx > max_lag || lag.dy > max_lag {
            continue;
        }
        let at = (lag.dy, lag.dx);
        cov[at] = 0.5 * lag.cov;
        npix[at] = lag.npix as f64;
        let half_var = 0.5 * lag.var;
        let self_term = if lag.dx == 0 && lag.dy == 0 { 2.0 } else { 1.0 };
        let vcov = half_var * half_var * self_term / lag.npix as f64;
        let w = 1.0 / vcov.sqrt();
        sqrt_weight[at] = if w.is_finite() { w } else { 0.0 };
    }
    (cov, sqrt_weight, npix)
}

fn prepare(
    im: MaskedImage<'_>,
    region: Option<Rect>,
    bin_size: usize,
) -> BfkResult<(OwnedImage<f32>, OwnedImage<u16>)> {
    let (img, msk) = match region {
        Some(r) => (
            im.image.view(r.x, r.y, r.width, r.height)?,
            im.mask.view(r.x, r.y, r.width, r.height)?,
        ),
        None => (im.image, im.mask),
    };
    Ok((bin_image(img, bin_size)?, bin_mask(msk, bin_size)?))
}

fn good_values(pixels: &OwnedImage<f32>, mask: &OwnedImage<u16>, bad_bits: u16) -> Vec<f64> {
    pixels
        .as_slice()
        .iter()
        .zip(mask.as_slice())
        .filter(|(_, &m)| m & bad_bits == 0)
        .map(|(&v, _)| v as f64)
        .collect()
}
