#![allow(dead_code)]

use approx::assert_relative_eq;
use camino::Utf8PathBuf;
use nalgebra::{DMatrix, DVector};
use rand::{rngs::StdRng, Rng, SeedableRng};
use sedfit::{
    constants::StarIndex, stats::StarStatistics, NoiseModelData, ObservationCatalog,
    PhotometryCatalog, SedGrid,
};

pub const FILTERS: [&str; 3] = ["F475W", "F814W", "F160W"];

pub fn filters() -> Vec<String> {
    FILTERS.iter().map(|f| f.to_string()).collect()
}

pub fn utf8_path(dir: &tempfile::TempDir, name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
}

/// Three models with unit weights and a single `mass` parameter `[1, 2, 3]`.
pub fn mass_grid() -> (SedGrid, NoiseModelData) {
    let fluxes = DMatrix::from_row_slice(3, 3, &[1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 3.0, 6.0, 9.0]);
    let grid = SedGrid::new(fluxes, vec![0.475, 0.814, 1.6], vec![1.0, 1.0, 1.0])
        .unwrap()
        .with_specgrid_indices(vec![10, 11, 12])
        .unwrap()
        .with_column("mass", vec![1.0, 2.0, 3.0])
        .unwrap();
    let noise = NoiseModelData::uniform(3, 3, 0.1);
    (grid, noise)
}

fn model_flux(log_t: f64, m_ini: f64, av: f64, band: usize) -> f64 {
    let j = band as f64;
    m_ini.powf(0.5 + 0.2 * j) * (1.0 + 4.0 * (log_t - 3.6)) * (-av * (0.6 - 0.2 * j)).exp()
}

/// 60-model grid over `logT × M_ini × Av` with uneven prior weights (one row has weight 0)
/// and a catalog of `n_stars` noisy copies of random models.
pub fn synthetic_survey(n_stars: usize, seed: u64) -> (SedGrid, NoiseModelData, PhotometryCatalog) {
    let mut log_t = Vec::new();
    let mut m_ini = Vec::new();
    let mut av = Vec::new();
    for &t in &[3.6, 3.7, 3.8, 3.9, 4.0] {
        for &m in &[0.5, 1.0, 2.0, 4.0] {
            for &a in &[0.0, 0.5, 1.0] {
                log_t.push(t);
                m_ini.push(m);
                av.push(a);
            }
        }
    }
    let n_models = log_t.len();
    let fluxes = DMatrix::from_fn(n_models, 3, |i, j| model_flux(log_t[i], m_ini[i], av[i], j));
    let error = fluxes.map(|f| 0.05 * f + 0.01);
    let mut weights: Vec<f64> = (0..n_models).map(|i| 1.0 + (i % 3) as f64).collect();
    weights[7] = 0.0;

    let grid = SedGrid::new(fluxes.clone(), vec![0.475, 0.814, 1.6], weights)
        .unwrap()
        .with_specgrid_indices((0..n_models as i64).map(|i| 1000 + i).collect())
        .unwrap()
        .with_column("logT", log_t)
        .unwrap()
        .with_column("M_ini", m_ini)
        .unwrap()
        .with_column("Av", av)
        .unwrap()
        .with_column("stage", vec![0.0; n_models])
        .unwrap();
    let noise = NoiseModelData::new(error.clone(), DMatrix::zeros(n_models, 3)).unwrap();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut observed = DMatrix::<f64>::zeros(n_stars, 3);
    for e in 0..n_stars {
        let row = rng.random_range(0..n_models);
        for j in 0..3 {
            let sigma = error[(row, j)];
            observed[(e, j)] = fluxes[(row, j)] + sigma * rng.random_range(-1.0..1.0);
        }
    }
    let catalog = PhotometryCatalog::new(filters(), observed).unwrap();

    (grid, noise, catalog)
}

/// Catalog returning a flux vector of the wrong length for one star, which makes the
/// batch run stop there.
pub struct BrokenCatalog<'a> {
    pub inner: &'a PhotometryCatalog,
    pub broken_star: StarIndex,
}

impl ObservationCatalog for BrokenCatalog<'_> {
    fn n_stars(&self) -> usize {
        self.inner.n_stars()
    }

    fn filters(&self) -> &[String] {
        self.inner.filters()
    }

    fn flux(&self, e: StarIndex) -> DVector<f64> {
        if e == self.broken_star {
            DVector::zeros(1)
        } else {
            self.inner.flux(e)
        }
    }
}

pub fn assert_statistics_close(actual: &StarStatistics, expected: &StarStatistics, epsilon: f64) {
    assert_eq!(actual.best, expected.best);
    for (a, b) in actual.expectation.iter().zip(&expected.expectation) {
        assert_relative_eq!(*a, *b, epsilon = epsilon);
    }
    for (a, b) in actual.percentiles.iter().flatten().zip(expected.percentiles.iter().flatten()) {
        assert_relative_eq!(*a, *b, epsilon = epsilon);
    }
    assert_relative_eq!(actual.chi2_min, expected.chi2_min, epsilon = epsilon);
    assert_relative_eq!(actual.max_lnp, expected.max_lnp, epsilon = epsilon);
    assert_eq!(actual.chi2_min_index, expected.chi2_min_index);
    assert_eq!(actual.max_lnp_index, expected.max_lnp_index);
    assert_eq!(actual.specgrid_index, expected.specgrid_index);
}
