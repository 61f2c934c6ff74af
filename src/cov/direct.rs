//! Real-space autocovariance by direct summation over weighted pixel pairs.

use crate::image::OwnedImage;

use super::LagCov;

/// Computes the autocovariance of `diff` under weight `w` for all lags
/// `0 <= dx, dy <= max_lag` by direct summation.
///
/// Mixed lags (`dx > 0 && dy > 0`) average the `(dx, dy)` and `(dx, -dy)`
/// estimates and pool their pair counts, so the quarter matrix represents
/// both diagonal orientations. Entries are ordered with `dy` outer and `dx`
/// inner; `(0, 0)` comes first.
pub(crate) fn compute_cov_direct(
    diff: &OwnedImage<f64>,
    w: &OwnedImage<f64>,
    max_lag: usize,
) -> Vec<LagCov> {
    let mut out = Vec::with_capacity((max_lag + 1) * (max_lag + 1));
    let mut var = 0.0;
    for dy in 0..=max_lag {
        for dx in 0..=max_lag {
            let (cov, npix) = if dx > 0 && dy > 0 {
                let (cov1, npix1) = cov_direct_value(diff, w, dx, dy as isize);
                let (cov2, npix2) = cov_direct_value(diff, w, dx, -(dy as isize));
                (0.5 * (cov1 + cov2), npix1 + npix2)
            } else {
                cov_direct_value(diff, w, dx, dy as isize)
            };
            if dx == 0 && dy == 0 {
                var = cov;
            }
            out.push(LagCov {
                dx,
                dy,
                var,
                cov,
                npix,
            });
        }
    }
    out
}

/// Weighted covariance of pixel pairs separated by `(dx, dy)`.
///
/// Each window mean is subtracted separately, which cancels residual
/// large-scale structure that survives the flux normalization.
fn cov_direct_value(
    diff: &OwnedImage<f64>,
    w: &OwnedImage<f64>,
    dx: usize,
    dy: isize,
) -> (f64, u64) {
    let width = diff.width();
    let height = diff.height();
    let d = diff.as_slice();
    let wt = w.as_slice();

    if dx >= width || dy.unsigned_abs() >= height {
        return (f64::NAN, 0);
    }
    let span_x = width - dx;
    let span_y = height - dy.unsigned_abs();
    // For dy >= 0 the shifted window starts at (dx, dy); for dy < 0 it
    // starts at (dx, 0) and the unshifted one at (0, -dy).
    let (off1_y, off2_y) = if dy >= 0 { (dy as usize, 0) } else { (0, (-dy) as usize) };

    let mut n = 0.0f64;
    let mut s1 = 0.0f64;
    let mut s2 = 0.0f64;
    let mut p = 0.0f64;
    for y in 0..span_y {
        let row1 = (y + off1_y) * width + dx;
        let row2 = (y + off2_y) * width;
        for x in 0..span_x {
            let w12 = wt[row1 + x] * wt[row2 + x];
            if w12 == 0.0 {
                continue;
            }
            let v1 = d[row1 + x];
            let v2 = d[row2 + x];
            n += w12;
            s1 += v1 * w12;
            s2 += v2 * w12;
            p += v1 * v2 * w12;
        }
    }

    if n == 0.0 {
        return (f64::NAN, 0);
    }
    let cov = p / n - (s1 / n) * (s2 / n);
    (cov, n.round() as u64)
}
