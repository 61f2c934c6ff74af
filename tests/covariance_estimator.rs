//! Integration tests for the per-pair covariance estimator.

use bfkern::{
    measure_mean_var_cov, CovConfig, CovMethod, ImageView, MaskedImage, OwnedImage, Rect,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

const WIDTH: usize = 128;
const HEIGHT: usize = 128;

/// Gaussian flat with correlation injected at one lag: each pixel adds
/// `alpha` times the value of its `(dx0, dy0)` neighbor.
fn correlated_flat(
    rng: &mut StdRng,
    mean: f32,
    sigma: f32,
    alpha: f32,
    dx0: usize,
    dy0: usize,
) -> OwnedImage<f32> {
    let normal = Normal::new(0.0f32, sigma).unwrap();
    let noise: Vec<f32> = (0..WIDTH * HEIGHT).map(|_| normal.sample(rng)).collect();
    let mut data = Vec::with_capacity(WIDTH * HEIGHT);
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let mut v = noise[y * WIDTH + x];
            if x >= dx0 && y >= dy0 {
                v += alpha * noise[(y - dy0) * WIDTH + (x - dx0)];
            }
            data.push(mean + v);
        }
    }
    OwnedImage::new(data, WIDTH, HEIGHT).unwrap()
}

fn masked<'a>(img: &'a OwnedImage<f32>, mask: &'a OwnedImage<u16>) -> MaskedImage<'a> {
    MaskedImage {
        image: img.view(),
        mask: mask.view(),
    }
}

fn test_config(method: CovMethod) -> CovConfig {
    CovConfig {
        max_lag: 4,
        min_good_pixels: 1000,
        method,
        ..CovConfig::default()
    }
}

#[test]
fn fft_and_direct_agree_on_injected_correlation() {
    let mut rng = StdRng::seed_from_u64(7);
    let (dx0, dy0) = (2, 1);
    let im1 = correlated_flat(&mut rng, 1000.0, 10.0, 0.4, dx0, dy0);
    let im2 = correlated_flat(&mut rng, 1000.0, 10.0, 0.4, dx0, dy0);
    let clean = OwnedImage::filled(0u16, WIDTH, HEIGHT).unwrap();

    let direct = measure_mean_var_cov(
        masked(&im1, &clean),
        masked(&im2, &clean),
        None,
        &test_config(CovMethod::Direct),
    )
    .unwrap()
    .unwrap();
    let fft = measure_mean_var_cov(
        masked(&im1, &clean),
        masked(&im2, &clean),
        None,
        &test_config(CovMethod::Fft),
    )
    .unwrap()
    .unwrap();

    assert!((direct.mean - fft.mean).abs() < 1e-9);
    assert_eq!(direct.lags.len(), fft.lags.len());
    for (d, f) in direct.lags.iter().zip(&fft.lags) {
        assert_eq!((d.dx, d.dy), (f.dx, f.dy));
        assert_eq!(d.npix, f.npix);
        assert!(
            (d.cov - f.cov).abs() < 1e-8,
            "lag ({}, {}): direct {} vs fft {}",
            d.dx,
            d.dy,
            d.cov,
            f.cov
        );
    }

    // The injected lag stands out; other nonzero lags sit near the noise
    // floor of the estimate.
    let var = direct.lags[0].cov;
    let injected = direct
        .lags
        .iter()
        .find(|l| (l.dx, l.dy) == (dx0, dy0))
        .unwrap();
    // Mixed lags average the (dx, +dy) and (dx, -dy) orientations, so a
    // correlation injected at a single orientation shows up at half its
    // one-sided strength.
    let expected_frac = 0.5 * 0.4 / (1.0 + 0.4f64 * 0.4);
    assert!((injected.cov / var - expected_frac).abs() < 0.05);
    for lag in &direct.lags {
        if (lag.dx, lag.dy) != (0, 0) && (lag.dx, lag.dy) != (dx0, dy0) {
            assert!(
                (lag.cov / var).abs() < 0.05,
                "unexpected correlation at ({}, {})",
                lag.dx,
                lag.dy
            );
        }
    }
}

#[test]
fn zero_lag_covariance_matches_clipped_variance() {
    let mut rng = StdRng::seed_from_u64(11);
    let im1 = correlated_flat(&mut rng, 5000.0, 30.0, 0.0, 0, 0);
    let im2 = correlated_flat(&mut rng, 5000.0, 30.0, 0.0, 0, 0);
    let clean = OwnedImage::filled(0u16, WIDTH, HEIGHT).unwrap();

    let est = measure_mean_var_cov(
        masked(&im1, &clean),
        masked(&im2, &clean),
        None,
        &test_config(CovMethod::Fft),
    )
    .unwrap()
    .unwrap();

    // Cov[0,0] carries a factor of two relative to the halved variance.
    assert!((est.variance / (0.5 * est.lags[0].cov) - 1.0).abs() < 0.02);
    assert!((est.mean - 5000.0).abs() < 5.0);
}

#[test]
fn bad_pixels_are_excluded_from_counts() {
    let mut rng = StdRng::seed_from_u64(13);
    let im1 = correlated_flat(&mut rng, 1000.0, 10.0, 0.0, 0, 0);
    let im2 = correlated_flat(&mut rng, 1000.0, 10.0, 0.0, 0, 0);
    let clean = OwnedImage::filled(0u16, WIDTH, HEIGHT).unwrap();
    let mut bad = clean.clone();
    for idx in 0..400 {
        bad.as_mut_slice()[idx * 17 % (WIDTH * HEIGHT)] = 1;
    }

    let with_clean = measure_mean_var_cov(
        masked(&im1, &clean),
        masked(&im2, &clean),
        None,
        &test_config(CovMethod::Fft),
    )
    .unwrap()
    .unwrap();
    let with_bad = measure_mean_var_cov(
        masked(&im1, &bad),
        masked(&im2, &clean),
        None,
        &test_config(CovMethod::Fft),
    )
    .unwrap()
    .unwrap();

    assert!(with_bad.lags[0].npix < with_clean.lags[0].npix);
}

#[test]
fn insufficient_coverage_yields_unusable_sample() {
    let mut rng = StdRng::seed_from_u64(17);
    let im1 = correlated_flat(&mut rng, 1000.0, 10.0, 0.0, 0, 0);
    let im2 = correlated_flat(&mut rng, 1000.0, 10.0, 0.0, 0, 0);
    let all_bad = OwnedImage::filled(1u16, WIDTH, HEIGHT).unwrap();
    let clean = OwnedImage::filled(0u16, WIDTH, HEIGHT).unwrap();

    let result = measure_mean_var_cov(
        masked(&im1, &all_bad),
        masked(&im2, &clean),
        None,
        &test_config(CovMethod::Fft),
    )
    .unwrap();
    assert!(result.is_none());
}

#[test]
fn region_restriction_changes_the_pixel_count() {
    let mut rng = StdRng::seed_from_u64(19);
    let im1 = correlated_flat(&mut rng, 1000.0, 10.0, 0.0, 0, 0);
    let im2 = correlated_flat(&mut rng, 1000.0, 10.0, 0.0, 0, 0);
    let clean = OwnedImage::filled(0u16, WIDTH, HEIGHT).unwrap();
    let region = Rect {
        x: 0,
        y: 0,
        width: 64,
        height: 64,
    };

    let est = measure_mean_var_cov(
        masked(&im1, &clean),
        masked(&im2, &clean),
        Some(region),
        &test_config(CovMethod::Fft),
    )
    .unwrap()
    .unwrap();
    assert!(est.lags[0].npix <= 64 * 64);
    assert!(est.lags[0].npix > 3000);
}

#[test]
fn binning_reduces_shape_before_estimation() {
    let mut rng = StdRng::seed_from_u64(23);
    let im1 = correlated_flat(&mut rng, 1000.0, 10.0, 0.0, 0, 0);
    let im2 = correlated_flat(&mut rng, 1000.0, 10.0, 0.0, 0, 0);
    let clean = OwnedImage::filled(0u16, WIDTH, HEIGHT).unwrap();
    let cfg = CovConfig {
        bin_size: 2,
        ..test_config(CovMethod::Fft)
    };

    let est = measure_mean_var_cov(masked(&im1, &clean), masked(&im2, &clean), None, &cfg)
        .unwrap()
        .unwrap();
    assert!(est.lags[0].npix <= (WIDTH / 2) as u64 * (HEIGHT / 2) as u64);
}

#[test]
fn view_from_slice_rejects_bad_shapes() {
    let data = vec![0.0f32; 100];
    assert!(ImageView::from_slice(&data, 10, 10).is_ok());
    assert!(ImageView::from_slice(&data, 10, 11).is_err());
}
