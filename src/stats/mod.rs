//! Sigma-clipped statistics primitives.
//!
//! Iterative outlier rejection around a running mean, NaN-safe, returning
//! NaN when the input is empty or every sample has been excluded. Clipped
//! variance underestimates the true variance by a factor that depends on
//! the clip threshold; `sigma_clip_correction` returns the multiplicative
//! de-bias factor callers apply to clipped variances.

use errorfunctions::RealErrorFunctions;

/// Sigma-clipping parameters passed explicitly into each statistics call.
#[derive(Clone, Copy, Debug)]
pub struct ClipParams {
    /// Clip threshold in units of the running standard deviation.
    pub n_sigma: f64,
    /// Maximum number of rejection passes.
    pub n_iter: usize,
}

impl Default for ClipParams {
    fn default() -> Self {
        Self {
            n_sigma: 5.5,
            n_iter: 3,
        }
    }
}

/// Clipped mean, variance, and the surviving-sample bookkeeping of one call.
#[derive(Clone, Copy, Debug)]
pub struct ClippedMoments {
    /// Mean of the surviving samples; NaN when none survive.
    pub mean: f64,
    /// Unbiased variance of the surviving samples; NaN when fewer than two
    /// survive.
    pub variance: f64,
    /// Number of surviving samples.
    pub count: usize,
}

impl ClippedMoments {
    fn empty() -> Self {
        Self {
            mean: f64::NAN,
            variance: f64::NAN,
            count: 0,
        }
    }
}

fn moments(values: &[f64], keep: &[bool]) -> ClippedMoments {
    let mut sum = 0.0;
    let mut count = 0usize;
    for (v, &k) in values.iter().zip(keep) {
        if k {
            sum += v;
            count += 1;
        }
    }
    if count == 0 {
        return ClippedMoments::empty();
    }
    let mean = sum / count as f64;
    if count < 2 {
        return ClippedMoments {
            mean,
            variance: f64::NAN,
            count,
        };
    }
    let mut ss = 0.0;
    for (v, &k) in values.iter().zip(keep) {
        if k {
            let d = v - mean;
            ss += d * d;
        }
    }
    ClippedMoments {
        mean,
        variance: ss / (count - 1) as f64,
        count,
    }
}

/// Computes sigma-clipped moments of `values`.
///
/// NaN samples are excluded up front. Each pass recomputes the mean and
/// standard deviation of the surviving set and rejects samples farther than
/// `n_sigma` standard deviations from the mean; iteration stops early when
/// a pass rejects nothing.
pub fn clipped_moments(values: &[f64], clip: ClipParams) -> ClippedMoments {
    let mut keep: Vec<bool> = values.iter().map(|v| v.is_finite()).collect();
    let mut current = moments(values, &keep);
    for _ in 0..clip.n_iter {
        if current.count < 2 || !current.variance.is_finite() {
            break;
        }
        let cut = clip.n_sigma * current.variance.sqrt();
        let mut rejected = false;
        for (v, k) in values.iter().zip(keep.iter_mut()) {
            if *k && (v - current.mean).abs() > cut {
                *k = false;
                rejected = true;
            }
        }
        if !rejected {
            break;
        }
        current = moments(values, &keep);
    }
    current
}

/// Sigma-clipped mean; NaN when the input is empty or fully clipped.
pub fn clipped_mean(values: &[f64], clip: ClipParams) -> f64 {
    clipped_moments(values, clip).mean
}

/// Sigma-clipped unbiased variance; NaN when fewer than two samples survive.
pub fn clipped_variance(values: &[f64], clip: ClipParams) -> f64 {
    clipped_moments(values, clip).variance
}

/// De-bias factor for variances measured with an `n_sigma` clip.
///
/// For a Gaussian population truncated at `k` standard deviations the
/// measured variance is low by `1 - 2k phi(k) / (2 Phi(k) - 1)`; the
/// returned value is `1/sqrt` of that, so a variance is corrected by
/// multiplying with the square of the return value.
pub fn sigma_clip_correction(n_sigma: f64) -> f64 {
    let pdf = (-0.5 * n_sigma * n_sigma).exp() / (2.0 * std::f64::consts::PI).sqrt();
    // Fully qualified so the call cannot drift to std's upcoming f64::erf.
    let central_prob = RealErrorFunctions::erf(n_sigma / std::f64::consts::SQRT_2);
    let var_factor = 1.0 - 2.0 * n_sigma * pdf / central_prob;
    1.0 / var_factor.sqrt()
}
