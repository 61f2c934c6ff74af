//! Detector-level kernel assembly.
//!
//! Drives the kernel averager and relaxation solver for every region of a
//! detector, and optionally pools the accepted per-sample correlations
//! across regions into one detector-wide kernel stored alongside the
//! per-region results. Regions are independent until the pooling step, so
//! the per-region work parallelizes when the `rayon` feature is enabled.

use std::collections::HashMap;

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::{info, warn};

use crate::cov::CovSeries;
use crate::kernel::solve::{successive_over_relax, SorConfig, SorReport};
use crate::kernel::{average_correlations, scale_correlations, AveragerConfig, ScaledCorrelations};
use crate::util::{BfkResult, Matrix};

/// Whether kernels are produced per region only or also pooled per detector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KernelLevel {
    /// One kernel per region.
    #[default]
    Region,
    /// Per-region kernels plus one pooled detector kernel.
    Detector,
}

/// Parameters of the averaging and solving stage.
#[derive(Clone, Debug, Default)]
pub struct SolveConfig {
    pub level: KernelLevel,
    /// Regions excluded from detector-level pooling.
    pub ignore_regions: Vec<String>,
    /// Per-region gain in e-/ADU; regions not listed use 1.0.
    pub gains: HashMap<String, f64>,
    pub averager: AveragerConfig,
    pub sor: SorConfig,
}

/// Kernel products of one region (or of the pooled detector).
#[derive(Clone, Debug)]
pub struct RegionKernel {
    /// Averaged, zero-sum correlation kernel before solving.
    pub mean_xcorr: Matrix,
    /// Solved deconvolution kernel, same shape.
    pub kernel: Matrix,
    /// Solver report; `None` when every sample was rejected and a zero
    /// kernel was emitted instead.
    pub report: Option<SorReport>,
    /// Number of samples that entered the average.
    pub accepted: usize,
    /// Number of usable samples rejected during scaling.
    pub rejected: usize,
}

/// All kernel products of one calibration run, with raw provenance.
#[derive(Clone, Debug, Default)]
pub struct KernelSet {
    pub region_kernels: HashMap<String, RegionKernel>,
    pub detector_kernel: Option<RegionKernel>,
    /// Per-region mean signals of every processed sample, flux ordered.
    pub means: HashMap<String, Vec<f64>>,
    /// Per-region variances of every processed sample.
    pub variances: HashMap<String, Vec<f64>>,
    /// Per-region raw quarter covariance matrices.
    pub raw_xcorrs: HashMap<String, Vec<Matrix>>,
}

/// Averages and solves kernels for every region of `detector`.
///
/// Regions with zero accepted samples get a zero kernel of the expected
/// padded shape and a diagnostic instead of aborting the run. Regions with
/// no samples at all are skipped entirely.
pub fn solve_kernels(
    series: &HashMap<String, CovSeries>,
    detector: &str,
    cfg: &SolveConfig,
) -> BfkResult<KernelSet> {
    let mut names: Vec<String> = series.keys().cloned().collect();
    names.sort();

    let solved = map_regions(&names, |name| {
        let region_series = &series[name];
        solve_region(name, region_series, cfg)
    })?;

    let mut out = KernelSet::default();
    let mut pooled: Vec<Matrix> = Vec::new();
    for (name, (kernel, scaled)) in names.iter().zip(solved) {
        let region_series = &series[name];
        out.means.insert(
            name.clone(),
            region_series.samples.iter().map(|s| s.mean).collect(),
        );
        out.variances.insert(
            name.clone(),
            region_series.samples.iter().map(|s| s.variance).collect(),
        );
        out.raw_xcorrs.insert(
            name.clone(),
            region_series.samples.iter().map(|s| s.cov.clone()).collect(),
        );
        let Some(kernel) = kernel else {
            warn!(region = %name, "no samples for region, skipping");
            continue;
        };
        if cfg.level == KernelLevel::Detector && !cfg.ignore_regions.contains(name) {
            pooled.extend(scaled.accepted.iter().cloned());
        }
        out.region_kernels.insert(name.clone(), kernel);
    }

    if cfg.level == KernelLevel::Detector {
        let label = format!("Det: {detector}");
        if pooled.is_empty() {
            warn!(detector, "no accepted correlations to pool for detector kernel");
        } else {
            let mean_xcorr = average_correlations(&pooled, &cfg.averager, &label)?;
            let (kernel, report) = successive_over_relax(&mean_xcorr, &cfg.sor);
            log_kernel(&label, &mean_xcorr, &kernel);
            out.detector_kernel = Some(RegionKernel {
                mean_xcorr,
                kernel,
                report: Some(report),
                accepted: pooled.len(),
                rejected: 0,
            });
        }
    }

    Ok(out)
}

fn solve_region(
    name: &str,
    series: &CovSeries,
    cfg: &SolveConfig,
) -> BfkResult<(Option<RegionKernel>, ScaledCorrelations)> {
    let Some(first) = series.samples.first() else {
        return Ok((None, ScaledCorrelations::default()));
    };
    let gain = cfg.gains.get(name).copied().unwrap_or(1.0);
    let label = format!("Amp: {name}");
    let scaled = scale_correlations(series, gain, &cfg.averager, &label);

    if scaled.accepted.is_empty() {
        warn!(region = %name, "all inputs rejected, emitting zero kernel");
        // Padded full-tile shape: quarter side n tiles to 2n-1, plus frame.
        let side = 2 * first.cov.side() + 1;
        let kernel = RegionKernel {
            mean_xcorr: Matrix::zeros(side),
            kernel: Matrix::zeros(side),
            report: None,
            accepted: 0,
            rejected: scaled.rejected,
        };
        return Ok((Some(kernel), scaled));
    }

    let mean_xcorr = average_correlations(&scaled.accepted, &cfg.averager, &label)?;
    let (kernel, report) = successive_over_relax(&mean_xcorr, &cfg.sor);
    log_kernel(&label, &mean_xcorr, &kernel);
    let region = RegionKernel {
        accepted: scaled.accepted.len(),
        rejected: scaled.rejected,
        mean_xcorr,
        kernel,
        report: Some(report),
    };
    Ok((Some(region), scaled))
}

fn log_kernel(label: &str, pre: &Matrix, post: &Matrix) {
    let center = pre.center();
    info!(
        label,
        sum = pre.sum(),
        center_pre = pre[(center, center)],
        center_post = post[(center, center)],
        "kernel solved"
    );
}

#[cfg(feature = "rayon")]
fn map_regions<T: Send, F>(names: &[String], f: F) -> BfkResult<Vec<T>>
where
    F: Fn(&str) -> BfkResult<T> + Sync,
{
    names.par_iter().map(|name| f(name)).collect()
}

#[cfg(not(feature = "rayon"))]
fn map_regions<T, F>(names: &[String], f: F) -> BfkResult<Vec<T>>
where
    F: Fn(&str) -> BfkResult<T>,
{
    names.iter().map(|name| f(name)).collect()
}
