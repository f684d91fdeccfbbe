//! # Per-star posterior statistics
//!
//! The [`StatisticsReducer`] turns the sparse likelihood of one star into the compact
//! summary written to the statistics table and the 1D PDF file:
//!
//! 1. **Normalization** – weights `w = exp(lnp − max(lnp))`, a numerically stable
//!    softmax that never needs the log-partition sum.
//! 2. **Best fit** – the grid row of maximum weight (first occurrence on ties), which is
//!    also the `Pmax` row.
//! 3. **Chi-square minimum** – the grid row of minimum chi-square, found independently of
//!    the best fit (the prior can make them differ).
//! 4. **Expectation** – weighted mean of each parameter over the sparse rows.
//! 5. **Percentiles** – from each parameter's fast 1D marginal PDF, normalized by its own
//!    maximum, through [`weighted_percentile`] over the bin centres. A degenerate PDF (maximum zero) yields
//!    `0.0` for every requested percentile.
//!
//! The reducer is a pure function of its inputs and the immutable per-parameter binning.
use crate::{
    constants::{GridIndex, LnP, StarIndex},
    grid::ModelGrid,
    likelihood::SparseLikelihood,
    pdf1d::{FastPdf1d, ParameterBinning},
    sedfit_errors::SedFitError,
};

/// Weighted arithmetic mean, `None` when the total weight is zero.
pub fn expectation(values: &[f64], weights: &[f64]) -> Option<f64> {
    let (sum_vw, sum_w) = values
        .iter()
        .zip(weights)
        .fold((0.0, 0.0), |(svw, sw), (&v, &w)| (svw + v * w, sw + w));
    (sum_w > 0.0).then(|| sum_vw / sum_w)
}

/// Weighted percentiles of `data`.
///
/// The data are sorted with their weights and every sample is placed at the midpoint of
/// its own weight slice, `a_k = (Σ_{i≤k} w_i − w_k / 2) / Σ w`. Each requested percentile
/// `p` is linearly interpolated at `p / 100` on `(a_k, data_k)` and clamped to the first
/// (or last) datum outside the covered range. When every weight is exactly one the plain
/// sample percentile is used instead (rank `(n − 1) · p / 100`). The output is
/// non-decreasing in the requested percentile.
///
/// Arguments
/// -----------------
/// * `data`: sample values.
/// * `percentiles`: requested percentiles in `[0, 100]`.
/// * `weights`: non-negative weight of each sample.
///
/// Return
/// ----------
/// * One value per requested percentile; all zeros if the total weight is not positive.
pub fn weighted_percentile(data: &[f64], percentiles: &[f64], weights: &[f64]) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    if data.is_empty() || !(total > 0.0) {
        return vec![0.0; percentiles.len()];
    }

    let mut order: Vec<usize> = (0..data.len()).collect();
    order.sort_by(|&a, &b| data[a].total_cmp(&data[b]));
    let sorted: Vec<f64> = order.iter().map(|&i| data[i]).collect();

    if weights.iter().all(|&w| w == 1.0) {
        return percentiles
            .iter()
            .map(|&p| unweighted_percentile(&sorted, p))
            .collect();
    }

    let mut running = 0.0;
    let midpoints: Vec<f64> = order
        .iter()
        .map(|&i| {
            running += weights[i];
            (running - 0.5 * weights[i]) / total
        })
        .collect();

    let n = sorted.len();
    percentiles
        .iter()
        .map(|&p| {
            let q = p / 100.0;
            // first midpoint strictly above q closes the bracketing interval
            let n_below = midpoints.partition_point(|&a| a <= q);
            if n_below == 0 {
                sorted[0]
            } else if n_below == n {
                sorted[n - 1]
            } else {
                let j = n_below - 1;
                let frac = (q - midpoints[j]) / (midpoints[j + 1] - midpoints[j]);
                sorted[j] + frac * (sorted[j + 1] - sorted[j])
            }
        })
        .collect()
}

/// Linear-interpolation percentile of already sorted, non-empty samples.
fn unweighted_percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (sorted.len() - 1) as f64 * (p / 100.0).clamp(0.0, 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Percentiles of a binned marginal PDF.
///
/// The histogram is normalized by its maximum before interpolation. If the maximum is
/// not positive (empty subset or all-zero weights) every percentile is `0.0`.
pub fn pdf_percentiles(bin_centers: &[f64], histogram: &[f64], percentiles: &[f64]) -> Vec<f64> {
    let peak = histogram.iter().copied().fold(0.0, f64::max);
    if !(peak > 0.0) {
        return vec![0.0; percentiles.len()];
    }
    let density: Vec<f64> = histogram.iter().map(|h| h / peak).collect();
    weighted_percentile(bin_centers, percentiles, &density)
}

/// Summary statistics of one star.
///
/// Parameter-indexed vectors follow the order of
/// [`StatisticsReducer::parameter_names`].
#[derive(Debug, Clone, PartialEq)]
pub struct StarStatistics {
    pub best: Vec<f64>,
    pub expectation: Vec<f64>,
    /// `percentiles[k][i]`: parameter `k`, requested percentile `i`.
    pub percentiles: Vec<Vec<f64>>,
    /// Weighted marginal histogram of each parameter.
    pub pdf1d: Vec<Vec<f64>>,
    pub chi2_min: f64,
    pub chi2_min_index: GridIndex,
    pub max_lnp: LnP,
    pub max_lnp_index: GridIndex,
    pub specgrid_index: i64,
}

#[derive(Debug, Clone)]
struct ReducedParameter<'g> {
    name: String,
    values: &'g [f64],
    pdf: FastPdf1d,
}

/// Reduction of sparse likelihoods to [`StarStatistics`].
#[derive(Debug, Clone)]
pub struct StatisticsReducer<'g> {
    parameters: Vec<ReducedParameter<'g>>,
    percentiles: Vec<f64>,
    specgrid_indices: &'g [i64],
}

impl<'g> StatisticsReducer<'g> {
    /// Build the reducer and the fast marginal PDF of every parameter.
    ///
    /// Arguments
    /// -----------------
    /// * `grid`: model grid providing the parameter columns.
    /// * `parameters`: parameter names with their binning options.
    /// * `percentiles`: percentiles reported per parameter.
    /// * `max_nbins`: cap on the number of PDF bins.
    ///
    /// Return
    /// ----------
    /// * `Err(SedFitError::UnknownParameter)` for a name the grid does not provide.
    pub fn new<G: ModelGrid + ?Sized>(
        grid: &'g G,
        parameters: &[(String, ParameterBinning)],
        percentiles: &[f64],
        max_nbins: usize,
    ) -> Result<Self, SedFitError> {
        let parameters = parameters
            .iter()
            .map(|(name, binning)| {
                let values = grid.column(name)?;
                Ok(ReducedParameter {
                    name: name.clone(),
                    values,
                    pdf: FastPdf1d::new(values, max_nbins, *binning),
                })
            })
            .collect::<Result<Vec<_>, SedFitError>>()?;

        Ok(StatisticsReducer {
            parameters,
            percentiles: percentiles.to_vec(),
            specgrid_indices: grid.specgrid_indices(),
        })
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    pub fn n_parameters(&self) -> usize {
        self.parameters.len()
    }

    pub fn percentiles(&self) -> &[f64] {
        &self.percentiles
    }

    /// Marginal PDF binning of each parameter.
    pub fn pdfs(&self) -> impl Iterator<Item = &FastPdf1d> {
        self.parameters.iter().map(|p| &p.pdf)
    }

    /// Reduce the sparse likelihood of star `star`.
    ///
    /// Return
    /// ----------
    /// * `Err(SedFitError::EmptySparseLikelihood)` if the sparse set is empty.
    pub fn reduce(
        &self,
        star: StarIndex,
        sparse: &SparseLikelihood,
    ) -> Result<StarStatistics, SedFitError> {
        if sparse.is_empty() {
            return Err(SedFitError::EmptySparseLikelihood(star));
        }

        let mut best_pos = 0;
        let mut chi2_pos = 0;
        for k in 1..sparse.len() {
            if sparse.lnp[k] > sparse.lnp[best_pos] {
                best_pos = k;
            }
            if sparse.chi2[k] < sparse.chi2[chi2_pos] {
                chi2_pos = k;
            }
        }
        let max_lnp = sparse.lnp[best_pos];
        let weights: Vec<f64> = sparse.lnp.iter().map(|l| (l - max_lnp).exp()).collect();
        let best_row = sparse.grid_indices[best_pos];

        let n_params = self.parameters.len();
        let mut stats = StarStatistics {
            best: Vec::with_capacity(n_params),
            expectation: Vec::with_capacity(n_params),
            percentiles: Vec::with_capacity(n_params),
            pdf1d: Vec::with_capacity(n_params),
            chi2_min: sparse.chi2[chi2_pos],
            chi2_min_index: sparse.grid_indices[chi2_pos],
            max_lnp,
            max_lnp_index: best_row,
            specgrid_index: self.specgrid_indices[best_row],
        };

        let mut sparse_values = Vec::with_capacity(sparse.len());
        for param in &self.parameters {
            sparse_values.clear();
            sparse_values.extend(sparse.grid_indices.iter().map(|&row| param.values[row]));

            stats.best.push(param.values[best_row]);
            // max weight is 1, so the total weight is never zero here
            stats
                .expectation
                .push(expectation(&sparse_values, &weights).unwrap_or(0.0));

            let (centers, hist) = param.pdf.generate(&sparse.grid_indices, &weights);
            stats
                .percentiles
                .push(pdf_percentiles(centers, &hist, &self.percentiles));
            stats.pdf1d.push(hist);
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod test_stats {
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;
    use crate::grid::SedGrid;

    fn grid_with(values: Vec<f64>, specgrid: Vec<i64>) -> SedGrid {
        let n = values.len();
        SedGrid::new(DMatrix::zeros(n, 1), vec![1.0], vec![1.0; n])
            .unwrap()
            .with_specgrid_indices(specgrid)
            .unwrap()
            .with_column("logT", values)
            .unwrap()
    }

    #[test]
    fn test_unit_weights_use_sample_percentile() {
        let data = [4.0, 1.0, 3.0, 2.0];
        // ranks 0, 0.75, 1.5, 3
        let p = weighted_percentile(&data, &[0.0, 25.0, 50.0, 100.0], &[1.0; 4]);
        assert_eq!(p[0], 1.0);
        assert_relative_eq!(p[1], 1.75, max_relative = 1e-12);
        assert_relative_eq!(p[2], 2.5, max_relative = 1e-12);
        assert_eq!(p[3], 4.0);
    }

    #[test]
    fn test_weighted_percentile_midpoints() {
        // sorted [1, 3] with weights [1, 3]: midpoints [0.125, 0.625]
        let p = weighted_percentile(&[3.0, 1.0], &[10.0, 50.0, 62.5, 100.0], &[3.0, 1.0]);
        assert_eq!(p[0], 1.0);
        assert_relative_eq!(p[1], 2.5, max_relative = 1e-12);
        assert_eq!(p[2], 3.0);
        assert_eq!(p[3], 3.0);
    }

    #[test]
    fn test_pdf_percentiles_exact_values() {
        let centers = [1.0, 2.0, 3.0];

        // symmetric PDF: midpoints [0.125, 0.5, 0.875]
        let p = pdf_percentiles(&centers, &[1.0, 2.0, 1.0], &[16.0, 50.0, 84.0]);
        assert_eq!(p[1], 2.0);
        assert_relative_eq!(p[0], 1.0 + 0.035 / 0.375, max_relative = 1e-12);
        assert_relative_eq!(p[0] + p[2], 4.0, max_relative = 1e-12);

        // all mass in the middle bin: midpoints [0, 0.5, 1]
        let p = pdf_percentiles(&centers, &[0.0, 5.0, 0.0], &[16.0, 50.0, 84.0]);
        assert_relative_eq!(p[0], 1.32, max_relative = 1e-12);
        assert_eq!(p[1], 2.0);
        assert_relative_eq!(p[2], 2.68, max_relative = 1e-12);

        // single-bin PDF reports its centre for every percentile
        assert_eq!(
            pdf_percentiles(&[4.2], &[0.3], &[16.0, 50.0, 84.0]),
            vec![4.2, 4.2, 4.2]
        );
    }

    #[test]
    fn test_reduced_median_sits_on_dominant_bin() {
        let grid = grid_with(vec![1.0, 2.0, 3.0], vec![0, 1, 2]);
        let reducer = StatisticsReducer::new(
            &grid,
            &[("logT".to_string(), ParameterBinning::default())],
            &[16.0, 50.0, 84.0],
            50,
        )
        .unwrap();

        let sparse = SparseLikelihood {
            grid_indices: vec![1],
            lnp: vec![-0.5],
            chi2: vec![0.0],
        };
        let stats = reducer.reduce(0, &sparse).unwrap();
        assert_eq!(stats.pdf1d[0], vec![0.0, 1.0, 0.0]);
        assert_eq!(stats.percentiles[0][1], 2.0);

        // equal weight on the outer rows: median at the middle centre
        let sparse = SparseLikelihood {
            grid_indices: vec![0, 2],
            lnp: vec![-1.0, -1.0],
            chi2: vec![2.0, 2.0],
        };
        let stats = reducer.reduce(0, &sparse).unwrap();
        assert_eq!(stats.percentiles[0][1], 2.0);
    }

    #[test]
    fn test_percentiles_are_monotone() {
        let mut rng = StdRng::seed_from_u64(7);
        let centers: Vec<f64> = (0..30).map(|k| k as f64 * 0.5).collect();
        for _ in 0..50 {
            let hist: Vec<f64> = (0..30)
                .map(|_| if rng.random_bool(0.3) { 0.0 } else { rng.random::<f64>() })
                .collect();
            let p = pdf_percentiles(&centers, &hist, &[2.5, 16.0, 50.0, 84.0, 97.5]);
            assert!(p.windows(2).all(|w| w[0] <= w[1]), "{p:?}");
        }
    }

    #[test]
    fn test_degenerate_pdf_gives_zero_percentiles() {
        let centers = [1.0, 2.0, 3.0];
        assert_eq!(
            pdf_percentiles(&centers, &[0.0, 0.0, 0.0], &[16.0, 50.0, 84.0]),
            vec![0.0, 0.0, 0.0]
        );
        assert_eq!(
            weighted_percentile(&[], &[16.0, 50.0, 84.0], &[]),
            vec![0.0, 0.0, 0.0]
        );
        assert_eq!(expectation(&[1.0, 2.0], &[0.0, 0.0]), None);
    }

    #[test]
    fn test_expectation_matches_weighted_mean() {
        let mut rng = StdRng::seed_from_u64(11);
        let values: Vec<f64> = (0..200).map(|_| rng.random_range(3.5..4.5)).collect();
        let grid = grid_with(values.clone(), (0..200).collect());
        let reducer = StatisticsReducer::new(
            &grid,
            &[("logT".to_string(), ParameterBinning::default())],
            &[16.0, 50.0, 84.0],
            50,
        )
        .unwrap();

        for _ in 0..20 {
            let grid_indices: Vec<usize> = (0..200).filter(|_| rng.random_bool(0.2)).collect();
            if grid_indices.is_empty() {
                continue;
            }
            let lnp: Vec<f64> = grid_indices.iter().map(|_| -rng.random_range(0.0..10.0)).collect();
            let sparse = SparseLikelihood {
                chi2: lnp.iter().map(|l| -2.0 * l).collect(),
                grid_indices,
                lnp,
            };

            let stats = reducer.reduce(0, &sparse).unwrap();
            let max_lnp = sparse.lnp.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let (num, den) = sparse
                .grid_indices
                .iter()
                .zip(&sparse.lnp)
                .fold((0.0, 0.0), |(n, d), (&row, &l)| {
                    let w = (l - max_lnp).exp();
                    (n + w * values[row], d + w)
                });
            assert_relative_eq!(stats.expectation[0], num / den, max_relative = 1e-12);

            let p = &stats.percentiles[0];
            assert!(p[0] <= p[1] && p[1] <= p[2]);
            assert_relative_eq!(
                stats.pdf1d[0].iter().sum::<f64>(),
                den,
                max_relative = 1e-12
            );
        }
    }

    #[test]
    fn test_best_fit_and_chi2_are_independent() {
        let grid = grid_with(vec![10.0, 20.0, 30.0, 40.0], vec![7, 8, 9, 10]);
        let reducer = StatisticsReducer::new(
            &grid,
            &[("logT".to_string(), ParameterBinning::default())],
            &[16.0, 50.0, 84.0],
            50,
        )
        .unwrap();

        // rows 1 and 3 tie on lnp; row 2 has the smallest chi2
        let sparse = SparseLikelihood {
            grid_indices: vec![1, 2, 3],
            lnp: vec![-1.0, -3.0, -1.0],
            chi2: vec![4.0, 0.5, 4.0],
        };
        let stats = reducer.reduce(3, &sparse).unwrap();
        assert_eq!(stats.max_lnp_index, 1);
        assert_eq!(stats.max_lnp, -1.0);
        assert_eq!(stats.best, vec![20.0]);
        assert_eq!(stats.specgrid_index, 8);
        assert_eq!(stats.chi2_min_index, 2);
        assert_eq!(stats.chi2_min, 0.5);

        assert_eq!(
            reducer.reduce(3, &SparseLikelihood::default()).unwrap_err(),
            SedFitError::EmptySparseLikelihood(3)
        );
    }

    #[test]
    fn test_unknown_parameter_fails_fast() {
        let grid = grid_with(vec![1.0], vec![0]);
        let err = StatisticsReducer::new(
            &grid,
            &[("Av".to_string(), ParameterBinning::default())],
            &[50.0],
            50,
        )
        .unwrap_err();
        assert_eq!(err, SedFitError::UnknownParameter("Av".into()));
    }
}
