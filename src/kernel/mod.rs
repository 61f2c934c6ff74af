//! Kernel averaging: rejection, normalization, and tiling of covariance
//! samples into a single per-region correlation kernel.
//!
//! Each usable covariance sample is rescaled to electrons, stripped of its
//! Poisson self term, normalized to unit flux, and tiled from the quarter
//! matrix into a full mirrored square. Samples with no recoverable
//! correlation signal or an inconsistent triangle-inequality sum are
//! rejected. The accepted tiles are sigma-clip averaged cell by cell,
//! padded with a one-cell boundary frame for the solver, and forced to
//! zero total sum.

use tracing::{info, warn};

use crate::cov::CovSeries;
use crate::stats::{clipped_mean, ClipParams};
use crate::util::{BfkError, BfkResult, Matrix};

pub mod solve;

/// Parameters of sample rejection and averaging.
#[derive(Clone, Copy, Debug)]
pub struct AveragerConfig {
    /// Sigma clip for the per-cell average across samples.
    pub n_sigma_clip: f64,
    /// Clip iterations for the per-cell average.
    pub clip_iter: usize,
    /// Reject a sample when `|sum(tile)| / sum(|tile|)` exceeds this.
    pub xcorr_reject_level: f64,
}

impl Default for AveragerConfig {
    fn default() -> Self {
        Self {
            n_sigma_clip: 5.0,
            clip_iter: 3,
            xcorr_reject_level: 2.0,
        }
    }
}

/// Accepted tiled correlations of one region plus rejection bookkeeping.
#[derive(Clone, Debug, Default)]
pub struct ScaledCorrelations {
    /// Full mirrored tiles, one per accepted sample.
    pub accepted: Vec<Matrix>,
    /// Number of usable samples rejected during scaling.
    pub rejected: usize,
}

/// Mirrors a quarter matrix into the full square it represents.
///
/// A quarter matrix of side `n` covers lags `0..n` in both axes; the full
/// tile has side `2n - 1` with the `(0, 0)` cell at the center and each
/// quadrant mirrored from the same quarter data.
pub fn tile_quarter(quarter: &Matrix) -> Matrix {
    let length = quarter.side() - 1;
    let mut out = Matrix::zeros(2 * length + 1);
    for i in 0..=length {
        for j in 0..=length {
            let v = quarter[(i, j)];
            out[(length + i, length + j)] = v;
            out[(length - i, length + j)] = v;
            out[(length + i, length - j)] = v;
            out[(length - i, length - j)] = v;
        }
    }
    out
}

/// Rescales and filters the usable samples of one region.
///
/// Per sample: convert to electrons with `gain`, double to undo the
/// half-variance convention carried from the difference image, subtract
/// `2 * flux` from the zero lag to remove the Poisson self term (rejecting
/// the sample when nothing negative remains), normalize by `-2 * flux^2`,
/// tile, and apply the triangle-inequality consistency check.
pub fn scale_correlations(
    series: &CovSeries,
    gain: f64,
    cfg: &AveragerConfig,
    label: &str,
) -> ScaledCorrelations {
    let total = series.samples.len();
    let mut out = ScaledCorrelations::default();
    for (num, sample) in series.usable().enumerate() {
        let num = num + 1;
        let flux = sample.mean * gain;
        let var = sample.variance * gain * gain;

        let mut q = sample.cov.clone();
        // Into electrons, and remove the factor of 1/2 applied upstream.
        q.scale(gain * gain * 2.0);
        let (q10, q01) = if q.side() > 1 {
            (q[(1, 0)], q[(0, 1)])
        } else {
            (f64::NAN, f64::NAN)
        };
        info!(
            label,
            sample = num,
            of = total,
            flux,
            var,
            q00 = q[(0, 0)],
            q10,
            q01,
            "scaling covariance sample"
        );

        q[(0, 0)] -= 2.0 * flux;
        if q[(0, 0)] >= 0.0 {
            warn!(
                label,
                sample = num,
                residual = q[(0, 0)],
                "skipped: variance minus twice the flux is not negative"
            );
            out.rejected += 1;
            continue;
        }

        q.scale(-1.0 / (2.0 * flux * flux));
        let tiled = tile_quarter(&q);

        let xcorr_check = tiled.sum().abs() / tiled.abs_sum();
        if xcorr_check > cfg.xcorr_reject_level {
            warn!(
                label,
                sample = num,
                xcorr_check,
                "skipped: triangle-inequality sum too large"
            );
            out.rejected += 1;
            continue;
        }

        info!(
            label,
            sample = num,
            of = total,
            q00 = q[(0, 0)],
            xcorr_check,
            "sample accepted"
        );
        out.accepted.push(tiled);
    }
    out
}

/// Sigma-clip averages accepted tiles into one kernel.
///
/// Cells are averaged independently across samples, the result is padded
/// by one zero row/column on every side as the solver's boundary frame,
/// and the total sum is subtracted from the center cell so the kernel
/// integrates to zero.
pub fn average_correlations(
    tiles: &[Matrix],
    cfg: &AveragerConfig,
    label: &str,
) -> BfkResult<Matrix> {
    let first = tiles
        .first()
        .ok_or(BfkError::InvalidParameter("no accepted correlations"))?;
    let side = first.side();
    let clip = ClipParams {
        n_sigma: cfg.n_sigma_clip,
        n_iter: cfg.clip_iter,
    };

    let mut mean = Matrix::zeros(side);
    let mut cell = Vec::with_capacity(tiles.len());
    for i in 0..side {
        for j in 0..side {
            cell.clear();
            cell.extend(tiles.iter().map(|t| t[(i, j)]));
            mean[(i, j)] = clipped_mean(&cell, clip);
        }
    }

    let mut padded = mean.padded(1);
    let center = padded.center();
    let total = padded.sum();
    padded[(center, center)] -= total;
    info!(label, zero_sum_scale = total, "zero-sum normalization");
    Ok(padded)
}
