//! Frequency-domain autocovariance with per-lag weight normalization.
//!
//! The weighted difference image and its weight mask are zero-padded to a
//! power-of-two shape and transformed once; products of the two spectra
//! give, after inverse transform, the raw autocorrelation, the windowed
//! sums, and the pixel-pair count at every circular lag. Dividing by the
//! weight autocorrelation cancels edge and mask effects, so the result
//! matches direct summation without any apodization.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::image::OwnedImage;
use crate::util::{BfkError, BfkResult};

use super::LagCov;

/// Zero-padded FFT shape for a `width` x `height` image and a maximum lag.
///
/// Each dimension is rounded to the power of two strictly greater than
/// `dim + max_lag`, which leaves enough padding that circular wraparound
/// cannot alias any reported lag.
pub fn fft_shape_for(width: usize, height: usize, max_lag: usize) -> (usize, usize) {
    let pad = |dim: usize| {
        let s = dim + max_lag;
        2usize.pow(s.ilog2() + 1)
    };
    (pad(width), pad(height))
}

/// Precomputed autocorrelation planes of one difference image.
#[derive(Debug)]
pub(crate) struct CovFft {
    fft_w: usize,
    fft_h: usize,
    /// IFFT of `F(d*w) * conj(F(d*w))`: windowed sum of products per lag.
    p_cov: Vec<f64>,
    /// IFFT of `F(d*w) * conj(F(w))`: windowed sum of values per lag.
    p_mean: Vec<f64>,
    /// IFFT of `F(w) * conj(F(w))`: pixel-pair count per lag.
    p_count: Vec<f64>,
}

impl CovFft {
    /// Transforms the weighted difference and the weight mask.
    pub(crate) fn new(
        diff: &OwnedImage<f64>,
        w: &OwnedImage<f64>,
        fft_shape: (usize, usize),
        max_lag: usize,
    ) -> BfkResult<Self> {
        let (fft_w, fft_h) = fft_shape;
        if fft_w <= diff.width() + max_lag || fft_h <= diff.height() + max_lag {
            return Err(BfkError::InvalidParameter(
                "fft shape too small for the requested lag range",
            ));
        }

        let width = diff.width();
        let height = diff.height();
        let mut signal = vec![Complex::new(0.0, 0.0); fft_w * fft_h];
        let mut mask = vec![Complex::new(0.0, 0.0); fft_w * fft_h];
        for y in 0..height {
            for x in 0..width {
                let src = y * width + x;
                let dst = y * fft_w + x;
                let weight = w.as_slice()[src];
                signal[dst] = Complex::new(diff.as_slice()[src] * weight, 0.0);
                mask[dst] = Complex::new(weight, 0.0);
            }
        }

        let mut planner = FftPlanner::new();
        fft2(&mut signal, fft_w, fft_h, &mut planner, false);
        fft2(&mut mask, fft_w, fft_h, &mut planner, false);

        let mut cov_spec = Vec::with_capacity(signal.len());
        let mut mean_spec = Vec::with_capacity(signal.len());
        let mut count_spec = Vec::with_capacity(signal.len());
        for (s, m) in signal.iter().zip(&mask) {
            cov_spec.push(s * s.conj());
            mean_spec.push(s * m.conj());
            count_spec.push(m * m.conj());
        }
        fft2(&mut cov_spec, fft_w, fft_h, &mut planner, true);
        fft2(&mut mean_spec, fft_w, fft_h, &mut planner, true);
        fft2(&mut count_spec, fft_w, fft_h, &mut planner, true);

        let norm = 1.0 / (fft_w * fft_h) as f64;
        Ok(Self {
            fft_w,
            fft_h,
            p_cov: cov_spec.iter().map(|c| c.re * norm).collect(),
            p_mean: mean_spec.iter().map(|c| c.re * norm).collect(),
            p_count: count_spec.iter().map(|c| c.re * norm).collect(),
        })
    }

    /// Circular index for a signed lag.
    fn at(&self, plane: &[f64], dy: isize, dx: isize) -> f64 {
        let y = dy.rem_euclid(self.fft_h as isize) as usize;
        let x = dx.rem_euclid(self.fft_w as isize) as usize;
        plane[y * self.fft_w + x]
    }

    /// Covariance at `(dx, dy)`, averaged with `(dx, -dy)` when both lags
    /// are nonzero.
    pub(crate) fn cov(&self, dx: usize, dy: usize) -> (f64, u64) {
        let (dx, dy) = (dx as isize, dy as isize);
        let npix1 = self.at(&self.p_count, dy, dx).round();
        let cov1 = self.at(&self.p_cov, dy, dx) / npix1
            - self.at(&self.p_mean, dy, dx) * self.at(&self.p_mean, -dy, -dx) / (npix1 * npix1);
        if dx == 0 || dy == 0 {
            return (cov1, npix1 as u64);
        }
        let npix2 = self.at(&self.p_count, -dy, dx).round();
        let cov2 = self.at(&self.p_cov, -dy, dx) / npix2
            - self.at(&self.p_mean, -dy, dx) * self.at(&self.p_mean, dy, -dx) / (npix2 * npix2);
        (0.5 * (cov1 + cov2), (npix1 + npix2) as u64)
    }

    /// Reports all lags with `dy` outer and `dx` inner; `(0, 0)` first.
    pub(crate) fn report(&self, max_lag: usize) -> Vec<LagCov> {
        let mut out = Vec::with_capacity((max_lag + 1) * (max_lag + 1));
        let mut var = 0.0;
        for dy in 0..=max_lag {
            for dx in 0..=max_lag {
                let (cov, npix) = self.cov(dx, dy);
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
}

/// In-place 2D FFT over a row-major complex buffer: rows first, then
/// columns through a scratch vector. The inverse transform is left
/// unnormalized; callers divide by `width * height`.
fn fft2(
    buf: &mut [Complex<f64>],
    width: usize,
    height: usize,
    planner: &mut FftPlanner<f64>,
    inverse: bool,
) {
    let row_fft = if inverse {
        planner.plan_fft_inverse(width)
    } else {
        planner.plan_fft_forward(width)
    };
    for row in buf.chunks_exact_mut(width) {
        row_fft.process(row);
    }

    let col_fft = if inverse {
        planner.plan_fft_inverse(height)
    } else {
        planner.plan_fft_forward(height)
    };
    let mut column = vec![Complex::new(0.0, 0.0); height];
    for x in 0..width {
        for y in 0..height {
            column[y] = buf[y * width + x];
        }
        col_fft.process(&mut column);
        for y in 0..height {
            buf[y * width + x] = column[y];
        }
    }
}
