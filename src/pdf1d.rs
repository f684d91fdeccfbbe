//! # Fast 1D marginal PDFs
//!
//! Marginalizing the sparse posterior of one star over every parameter but one would
//! require a histogram of that parameter per star. Scanning the full grid for each star
//! and each parameter is far too slow, so [`FastPdf1d`] precomputes, **once per
//! parameter**, the bin of every grid row. Generating a star's marginal PDF is then a
//! single pass over its sparse rows: `hist[bin(row)] += weight`.
//!
//! ## Binning scheme
//! -----------------
//! * `nbins = min(distinct values in the full column, max_nbins)` (at least 1).
//! * Bin centres are evenly spaced, `c_k = min + k·Δ` with `Δ = (max − min) / (nbins − 1)`;
//!   each row falls in the bin of its nearest centre (edges sit half a step around centres).
//! * **Log spacing** (mass-like parameters stored in linear units) bins `log10(value)`;
//!   the reported centres are converted back to linear units. Non-positive values cannot
//!   be placed and are treated as missing.
//! * **Ignore-below**: values at or below a sentinel (e.g. `-99.99` for quantities that
//!   only apply to white dwarfs) are excluded from the range and never receive mass.
//! * A degenerate range (single valid value, or none at all) maps every valid row to
//!   bin 0.
//!
//! The scheme is immutable once built and shared read-only by every star of a batch.
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::constants::{GridIndex, LOG_SPACED_PARAMETERS, MISSING_VALUE_SENTINEL, WHITE_DWARF_TAG};

/// Binning options of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterBinning {
    /// Bin `log10(value)` instead of `value`.
    pub log_spacing: bool,
    /// Exclude values `<=` this sentinel.
    pub ignore_below: Option<f64>,
}

impl ParameterBinning {
    /// Default binning for a parameter, derived from its name.
    ///
    /// * `M_ini`, `M_act`, `radius` → log spacing.
    /// * names containing `_wd` → ignore values at or below `-99.99`.
    pub fn for_parameter(name: &str) -> Self {
        ParameterBinning {
            log_spacing: LOG_SPACED_PARAMETERS.contains(&name),
            ignore_below: name
                .contains(WHITE_DWARF_TAG)
                .then_some(MISSING_VALUE_SENTINEL),
        }
    }

    fn transform(&self, value: f64) -> Option<f64> {
        if !value.is_finite() {
            return None;
        }
        if matches!(self.ignore_below, Some(floor) if value <= floor) {
            return None;
        }
        if self.log_spacing {
            (value > 0.0).then(|| value.log10())
        } else {
            Some(value)
        }
    }
}

/// Precomputed row → bin mapping of one grid parameter.
#[derive(Debug, Clone)]
pub struct FastPdf1d {
    bin_centers: Vec<f64>,
    row_bins: Vec<Option<u32>>,
    binning: ParameterBinning,
}

impl FastPdf1d {
    /// Build the binning of a parameter from its values over the **full** grid.
    ///
    /// Arguments
    /// -----------------
    /// * `values`: the parameter column, one value per grid row (zero-weight rows included).
    /// * `max_nbins`: cap on the number of bins.
    /// * `binning`: log spacing / sentinel options.
    pub fn new(values: &[f64], max_nbins: usize, binning: ParameterBinning) -> Self {
        let n_distinct = values
            .iter()
            .sorted_by(|a, b| a.total_cmp(b))
            .dedup()
            .count();
        let nbins = n_distinct.min(max_nbins).max(1);

        let scaled: Vec<Option<f64>> = values.iter().map(|&v| binning.transform(v)).collect();
        let (min_val, max_val) = scaled
            .iter()
            .flatten()
            .fold(None, |acc: Option<(f64, f64)>, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
            .unwrap_or((0.0, 0.0));

        let delta = if nbins > 1 && max_val > min_val {
            (max_val - min_val) / (nbins - 1) as f64
        } else {
            0.0
        };

        let last_bin = (nbins - 1) as f64;
        let row_bins = scaled
            .iter()
            .map(|v| {
                v.map(|v| {
                    if delta > 0.0 {
                        ((v - min_val) / delta).round().clamp(0.0, last_bin) as u32
                    } else {
                        0
                    }
                })
            })
            .collect();

        let bin_centers = (0..nbins)
            .map(|k| {
                let c = min_val + delta * k as f64;
                if binning.log_spacing {
                    10f64.powf(c)
                } else {
                    c
                }
            })
            .collect();

        FastPdf1d {
            bin_centers,
            row_bins,
            binning,
        }
    }

    pub fn n_bins(&self) -> usize {
        self.bin_centers.len()
    }

    /// Bin centres, in the parameter's linear units.
    pub fn bin_centers(&self) -> &[f64] {
        &self.bin_centers
    }

    pub fn binning(&self) -> ParameterBinning {
        self.binning
    }

    /// Bin of a grid row, `None` for missing or filtered values.
    pub fn bin_of(&self, row: GridIndex) -> Option<usize> {
        self.row_bins[row].map(|b| b as usize)
    }

    /// Weighted histogram of a sparse subset of grid rows.
    ///
    /// Runs in time proportional to `indices.len()`, independent of the grid size.
    ///
    /// Arguments
    /// -----------------
    /// * `indices`: rows of the full grid.
    /// * `weights`: non-negative weight of each row, parallel to `indices`.
    ///
    /// Return
    /// ----------
    /// * `(bin_centers, histogram)`; the histogram is all zeros for an empty subset.
    pub fn generate(&self, indices: &[GridIndex], weights: &[f64]) -> (&[f64], Vec<f64>) {
        debug_assert_eq!(indices.len(), weights.len());

        let mut hist = vec![0.0; self.n_bins()];
        for (&row, &w) in indices.iter().zip(weights) {
            if let Some(bin) = self.row_bins[row] {
                hist[bin as usize] += w;
            }
        }
        (&self.bin_centers, hist)
    }
}
