//! Pair matching and covariance aggregation.
//!
//! Groups flat exposures into matched pairs by exposure level, runs the
//! covariance estimator for every pair and detector region, applies the
//! sigma-clip bias correction and the per-region signal acceptance window,
//! and routes each finished pair back to the input exposure that requested
//! it. Samples that fail estimation stay in the output with NaN statistics
//! and `usable == false`, so provenance keeps one slot per processed pair.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::cov::{
    cov_matrices_from_lags, measure_mean_var_cov, CovConfig, CovSample, CovSeries, MaskedImage,
    Rect,
};
use crate::image::{mask_edges, OwnedImage, MASK_EDGE};
use crate::stats::sigma_clip_correction;
use crate::util::{BfkError, BfkResult, Matrix};

/// Named detector region (amplifier) with its pixel bounds.
#[derive(Clone, Debug)]
pub struct Region {
    pub name: String,
    pub rect: Rect,
}

/// Detector geometry: a name and its measurement regions.
#[derive(Clone, Debug)]
pub struct DetectorLayout {
    pub name: String,
    pub regions: Vec<Region>,
}

/// One flat exposure as supplied by the image provider.
pub struct Exposure {
    /// Opaque exposure identifier.
    pub id: u64,
    /// Nominal exposure level (exposure time or other flux proxy).
    pub level: f64,
    pub image: OwnedImage<f32>,
    pub mask: OwnedImage<u16>,
}

/// How exposures are matched into pairs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PairPolicy {
    /// Bucket by the nominal exposure level.
    #[default]
    ByExposureTime,
    /// Bucket by exact exposure identifier.
    ByExposureId,
}

/// Where the per-pair statistics are measured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RegionMode {
    /// Each configured region separately.
    #[default]
    PerRegion,
    /// The full image, repeated for every configured region.
    FullImage,
}

/// Signal acceptance window in ADU, per region with a shared default.
#[derive(Clone, Debug)]
pub struct SignalWindow {
    default: (f64, f64),
    per_region: HashMap<String, (f64, f64)>,
}

impl Default for SignalWindow {
    fn default() -> Self {
        Self::global(0.0, 1.0e6)
    }
}

impl SignalWindow {
    /// Same acceptance window for every region.
    pub fn global(min: f64, max: f64) -> Self {
        Self {
            default: (min, max),
            per_region: HashMap::new(),
        }
    }

    /// Overrides the window for one region.
    pub fn set_region(&mut self, name: impl Into<String>, min: f64, max: f64) {
        self.per_region.insert(name.into(), (min, max));
    }

    /// Window bounds applying to `region`.
    pub fn bounds(&self, region: &str) -> (f64, f64) {
        self.per_region
            .get(region)
            .copied()
            .unwrap_or(self.default)
    }
}

/// Parameters for pair matching and per-pair estimation.
#[derive(Clone, Debug, Default)]
pub struct PairConfig {
    pub policy: PairPolicy,
    pub region_mode: RegionMode,
    pub cov: CovConfig,
    pub signal_window: SignalWindow,
}

/// Covariance samples of one processed pair, keyed by region name.
#[derive(Clone, Debug)]
pub struct PairCovariances {
    /// Exposure ids of the pair, in input order.
    pub exposure_ids: (u64, u64),
    /// Exposure level the pair was matched on.
    pub level: f64,
    /// Index of the input exposure this pair is routed back to.
    pub input_index: usize,
    pub samples: HashMap<String, CovSample>,
}

/// Matches exposures into pairs and measures covariances for every region.
///
/// Buckets with a single exposure are dropped with a warning; buckets with
/// more than two use the first two and warn about the rest. The returned
/// list is sparse: only processed pairs appear, each routed to an input
/// exposure index. Routing failure is fatal.
pub fn extract_covariances(
    exposures: &[Exposure],
    layout: &DetectorLayout,
    cfg: &PairConfig,
) -> BfkResult<Vec<PairCovariances>> {
    // Edge flagging mutates the mask plane, so work on copies when enabled.
    let edged_masks: Option<Vec<OwnedImage<u16>>> = (cfg.cov.edge_suspect > 0).then(|| {
        exposures
            .iter()
            .map(|exp| {
                let mut mask = exp.mask.clone();
                mask_edges(&mut mask, cfg.cov.edge_suspect, MASK_EDGE);
                mask
            })
            .collect()
    });
    let mask_of = |idx: usize| -> &OwnedImage<u16> {
        edged_masks
            .as_ref()
            .map(|m| &m[idx])
            .unwrap_or(&exposures[idx].mask)
    };

    let input_ids: Vec<u64> = exposures.iter().map(|e| e.id).collect();
    let var_factor = sigma_clip_correction(cfg.cov.clip.n_sigma).powi(2);

    let mut out = Vec::new();
    for (level, bucket) in group_by_level(exposures, cfg.policy) {
        if bucket.len() < 2 {
            warn!(
                level,
                exposure = exposures[bucket[0]].id,
                "only one exposure at this level, dropping it"
            );
            continue;
        }
        let (i1, i2) = (bucket[0], bucket[1]);
        if bucket.len() > 2 {
            let ignored: Vec<u64> = bucket[2..].iter().map(|&i| exposures[i].id).collect();
            warn!(level, ?ignored, "more than two exposures at this level");
        }
        let exp1 = &exposures[i1];
        let exp2 = &exposures[i2];
        let im1 = MaskedImage {
            image: exp1.image.view(),
            mask: mask_of(i1).view(),
        };
        let im2 = MaskedImage {
            image: exp2.image.view(),
            mask: mask_of(i2).view(),
        };

        let mut samples = HashMap::with_capacity(layout.regions.len());
        for region in &layout.regions {
            let rect = match cfg.region_mode {
                RegionMode::PerRegion => Some(region.rect),
                RegionMode::FullImage => None,
            };
            let estimate = measure_mean_var_cov(im1, im2, rect, &cfg.cov)?;
            let sample = match estimate {
                Some(est) => {
                    let (mut cov, sqrt_weight, npix) =
                        cov_matrices_from_lags(&est.lags, cfg.cov.max_lag);
                    // Clip bias: the factor applies twice to the matrix as a
                    // whole but only once to the zero-lag cell, which already
                    // carries one factor through the direct variance.
                    cov.scale(var_factor * var_factor);
                    cov[(0, 0)] /= var_factor;
                    let (min_signal, max_signal) = cfg.signal_window.bounds(&region.name);
                    let usable = est.mean > min_signal && est.mean < max_signal;
                    if !usable {
                        warn!(
                            region = %region.name,
                            mean = est.mean,
                            min_signal,
                            max_signal,
                            "mean signal outside acceptance window"
                        );
                    }
                    CovSample {
                        exposure_pair: (exp1.id, exp2.id),
                        exposure_level: level,
                        mean: est.mean,
                        variance: est.variance * var_factor,
                        cov,
                        sqrt_weight,
                        npix,
                        usable,
                    }
                }
                None => {
                    warn!(
                        region = %region.name,
                        pair = ?(exp1.id, exp2.id),
                        "NaN mean or variance, or no covariance; sample unusable"
                    );
                    nan_sample((exp1.id, exp2.id), level, cfg.cov.max_lag)
                }
            };
            samples.insert(region.name.clone(), sample);
        }

        let input_index = match_exposure_index(exp1.id, &input_ids)?;
        out.push(PairCovariances {
            exposure_ids: (exp1.id, exp2.id),
            level,
            input_index,
            samples,
        });
    }
    Ok(out)
}

/// Collects per-pair samples into one flux-ordered series per region.
pub fn assemble_series(
    pairs: &[PairCovariances],
    layout: &DetectorLayout,
) -> HashMap<String, CovSeries> {
    let mut series: HashMap<String, CovSeries> = layout
        .regions
        .iter()
        .map(|r| (r.name.clone(), CovSeries::default()))
        .collect();
    for pair in pairs {
        for (name, sample) in &pair.samples {
            if let Some(s) = series.get_mut(name) {
                s.samples.push(sample.clone());
            }
        }
    }
    for s in series.values_mut() {
        // NaN means sort to the back.
        s.samples.sort_by(|a, b| a.mean.total_cmp(&b.mean));
    }
    series
}

/// Resolves an exposure id against the caller-supplied id list.
///
/// Ids may carry auxiliary decimal suffixes (for example a zero-padded
/// detector number), so matching retries with both sides truncated by
/// successive powers of ten. Exhaustion of the ladder is fatal.
pub fn match_exposure_index(id: u64, input_ids: &[u64]) -> BfkResult<usize> {
    for div in [1u64, 10, 100, 1000] {
        if let Some(idx) = input_ids
            .iter()
            .position(|&cand| cand == id / div || cand / div == id)
        {
            return Ok(idx);
        }
    }
    Err(BfkError::UnmatchedExposure { id })
}

fn group_by_level(exposures: &[Exposure], policy: PairPolicy) -> Vec<(f64, Vec<usize>)> {
    let mut buckets: BTreeMap<u64, (f64, Vec<usize>)> = BTreeMap::new();
    for (idx, exp) in exposures.iter().enumerate() {
        let level = match policy {
            PairPolicy::ByExposureTime => exp.level,
            PairPolicy::ByExposureId => exp.id as f64,
        };
        buckets
            .entry(level.to_bits())
            .or_insert_with(|| (level, Vec::new()))
            .1
            .push(idx);
    }
    buckets.into_values().collect()
}

fn nan_sample(pair: (u64, u64), level: f64, max_lag: usize) -> CovSample {
    let side = max_lag + 1;
    CovSample {
        exposure_pair: pair,
        exposure_level: level,
        mean: f64::NAN,
        variance: f64::NAN,
        cov: Matrix::filled(side, f64::NAN),
        sqrt_weight: Matrix::zeros(side),
        npix: Matrix::zeros(side),
        usable: false,
    }
}
