//! Owned result arrays of a batch run.
//!
//! [`PosteriorState`] holds, for every star of the catalog, the statistics produced by the
//! [`StatisticsReducer`](crate::stats::StatisticsReducer), plus the 1D PDF array of every
//! parameter. It is created zeroed for a fresh run or filled from the artifacts of a
//! previous run, mutated one star at a time by the batch loop, and written wholesale at
//! every flush.
//!
//! Star rows that were never processed stay at zero. In particular `max_lnp` is `0.0` for
//! them, which is what [`PosteriorState::resume_position`] relies on.
use nalgebra::DMatrix;

use crate::{
    constants::{GridIndex, LnP, StarIndex},
    stats::{StarStatistics, StatisticsReducer},
};

#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorState {
    pub(crate) parameter_names: Vec<String>,
    pub(crate) percentiles: Vec<f64>,
    /// `n_stars × n_params`
    pub(crate) best: DMatrix<f64>,
    /// `n_stars × n_params`
    pub(crate) expectation: DMatrix<f64>,
    /// One `n_stars × n_percentiles` matrix per parameter.
    pub(crate) percentile_values: Vec<DMatrix<f64>>,
    pub(crate) chi2_min: Vec<f64>,
    pub(crate) chi2_min_index: Vec<GridIndex>,
    pub(crate) max_lnp: Vec<LnP>,
    pub(crate) max_lnp_index: Vec<GridIndex>,
    pub(crate) specgrid_index: Vec<i64>,
    /// One `(n_stars + 1) × n_bins` matrix per parameter, last row = bin centres.
    pub(crate) pdf1d: Vec<DMatrix<f64>>,
}

impl PosteriorState {
    /// Zero-initialized state for `n_stars` stars, shaped after the reducer's parameters,
    /// percentiles and PDF binnings.
    pub fn new_zeroed(n_stars: usize, reducer: &StatisticsReducer<'_>) -> Self {
        let n_params = reducer.n_parameters();
        let n_pct = reducer.percentiles().len();

        let pdf1d = reducer
            .pdfs()
            .map(|pdf| {
                let mut m = DMatrix::zeros(n_stars + 1, pdf.n_bins());
                for (k, &c) in pdf.bin_centers().iter().enumerate() {
                    m[(n_stars, k)] = c;
                }
                m
            })
            .collect();

        PosteriorState {
            parameter_names: reducer.parameter_names().map(str::to_string).collect(),
            percentiles: reducer.percentiles().to_vec(),
            best: DMatrix::zeros(n_stars, n_params),
            expectation: DMatrix::zeros(n_stars, n_params),
            percentile_values: vec![DMatrix::zeros(n_stars, n_pct); n_params],
            chi2_min: vec![0.0; n_stars],
            chi2_min_index: vec![0; n_stars],
            max_lnp: vec![0.0; n_stars],
            max_lnp_index: vec![0; n_stars],
            specgrid_index: vec![0; n_stars],
            pdf1d,
        }
    }

    pub fn n_stars(&self) -> usize {
        self.max_lnp.len()
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    pub fn percentiles(&self) -> &[f64] {
        &self.percentiles
    }

    /// 1D PDF array of parameter `k`; the last row holds the bin centres.
    pub fn pdf1d(&self, k: usize) -> &DMatrix<f64> {
        &self.pdf1d[k]
    }

    pub fn max_lnp(&self) -> &[LnP] {
        &self.max_lnp
    }

    /// Store the statistics of star `e`.
    pub fn record(&mut self, e: StarIndex, stats: &StarStatistics) {
        for k in 0..self.parameter_names.len() {
            self.best[(e, k)] = stats.best[k];
            self.expectation[(e, k)] = stats.expectation[k];
            for (i, &v) in stats.percentiles[k].iter().enumerate() {
                self.percentile_values[k][(e, i)] = v;
            }
            for (b, &h) in stats.pdf1d[k].iter().enumerate() {
                self.pdf1d[k][(e, b)] = h;
            }
        }
        self.chi2_min[e] = stats.chi2_min;
        self.chi2_min_index[e] = stats.chi2_min_index;
        self.max_lnp[e] = stats.max_lnp;
        self.max_lnp_index[e] = stats.max_lnp_index;
        self.specgrid_index[e] = stats.specgrid_index;
    }

    /// Statistics stored for star `e` (all zeros if it was never processed).
    pub fn star(&self, e: StarIndex) -> StarStatistics {
        let n_params = self.parameter_names.len();
        StarStatistics {
            best: (0..n_params).map(|k| self.best[(e, k)]).collect(),
            expectation: (0..n_params).map(|k| self.expectation[(e, k)]).collect(),
            percentiles: self
                .percentile_values
                .iter()
                .map(|m| m.row(e).iter().copied().collect())
                .collect(),
            pdf1d: self
                .pdf1d
                .iter()
                .map(|m| m.row(e).iter().copied().collect())
                .collect(),
            chi2_min: self.chi2_min[e],
            chi2_min_index: self.chi2_min_index[e],
            max_lnp: self.max_lnp[e],
            max_lnp_index: self.max_lnp_index[e],
            specgrid_index: self.specgrid_index[e],
        }
    }

    /// One past the highest star with a non-zero `max_lnp`, or `0` if there is none.
    ///
    /// Stars are filled in increasing order, so every star before this position has been
    /// processed by a previous run.
    pub fn resume_position(&self) -> StarIndex {
        self.max_lnp
            .iter()
            .rposition(|&p| p != 0.0)
            .map_or(0, |e| e + 1)
    }
}
