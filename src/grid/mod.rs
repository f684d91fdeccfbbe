//! # Stellar model grid
//!
//! This module defines the **capability contract** the posterior reduction expects from a
//! precomputed grid of synthetic spectral energy distributions (SEDs), together with
//! [`SedGrid`], a validated in-memory implementation.
//!
//! ## Contract
//! -----------------
//! A [`ModelGrid`] exposes, for `n_models` rows and `n_bands` photometric bands:
//!
//! * a flux matrix (`n_models × n_bands`, rows = models),
//! * a non-negative prior weight per row,
//! * a back-index per row into the secondary spectral grid,
//! * the wavelength axis of the bands,
//! * named parameter columns, looked up by name with a typed failure
//!   ([`SedFitError::UnknownParameter`]) when absent.
//!
//! The core is agnostic to where the grid lives: memory, a cache, or a file-backed store
//! only need to implement the trait.
//!
//! ## Invariants
//! -----------------
//! * `weights.len() == specgrid_indices.len() == fluxes.nrows()`
//! * `wavelengths.len() == fluxes.ncols()`
//! * every weight is finite and `≥ 0`; rows with weight `0` never enter the likelihood
//! * every parameter column has one value per row
//!
//! ## See also
//! ------------
//! * [`noise_model`] – Per-row flux error and bias arrays indexed like the grid.
//! * [`crate::likelihood::SparseLikelihoodEngine`] – Consumer of fluxes and weights.
use nalgebra::DMatrix;

use crate::sedfit_errors::SedFitError;

pub mod noise_model;

/// Read access to a model grid, independent of its storage backend.
pub trait ModelGrid {
    /// Flux matrix, one row per model and one column per band.
    fn fluxes(&self) -> &DMatrix<f64>;

    /// Prior weight of every model row.
    fn weights(&self) -> &[f64];

    /// Wavelength of every band (same order as the flux columns).
    fn wavelengths(&self) -> &[f64];

    /// Index of every model row in the secondary spectral grid.
    fn specgrid_indices(&self) -> &[i64];

    /// Names of the available parameter columns, in storage order.
    fn column_names(&self) -> Vec<&str>;

    /// Values of the parameter column `name`, one per model row.
    ///
    /// Return
    /// ----------
    /// * `Err(SedFitError::UnknownParameter)` if the grid has no such column.
    fn column(&self, name: &str) -> Result<&[f64], SedFitError>;

    fn n_models(&self) -> usize {
        self.fluxes().nrows()
    }

    fn n_bands(&self) -> usize {
        self.fluxes().ncols()
    }
}

/// In-memory model grid.
///
/// Built with [`SedGrid::new`] and extended column by column with
/// [`SedGrid::with_column`]; every step checks the grid invariants.
#[derive(Debug, Clone)]
pub struct SedGrid {
    fluxes: DMatrix<f64>,
    weights: Vec<f64>,
    wavelengths: Vec<f64>,
    specgrid_indices: Vec<i64>,
    columns: Vec<(String, Vec<f64>)>,
}

impl SedGrid {
    /// Create a grid from its fluxes, band wavelengths and prior weights.
    ///
    /// Arguments
    /// -----------------
    /// * `fluxes`: `n_models × n_bands` flux matrix.
    /// * `wavelengths`: one wavelength per band.
    /// * `weights`: one non-negative prior weight per model.
    ///
    /// The spectral-grid back-index defaults to the row number; override it with
    /// [`SedGrid::with_specgrid_indices`].
    ///
    /// Return
    /// ----------
    /// * `Err(SedFitError::InconsistentGrid)` on any length mismatch or invalid weight.
    pub fn new(
        fluxes: DMatrix<f64>,
        wavelengths: Vec<f64>,
        weights: Vec<f64>,
    ) -> Result<Self, SedFitError> {
        if wavelengths.len() != fluxes.ncols() {
            return Err(SedFitError::InconsistentGrid(format!(
                "{} wavelengths for {} flux bands",
                wavelengths.len(),
                fluxes.ncols()
            )));
        }
        if weights.len() != fluxes.nrows() {
            return Err(SedFitError::InconsistentGrid(format!(
                "{} weights for {} models",
                weights.len(),
                fluxes.nrows()
            )));
        }
        if let Some(bad) = weights.iter().position(|w| !w.is_finite() || *w < 0.0) {
            return Err(SedFitError::InconsistentGrid(format!(
                "weight of model {bad} is {} (must be finite and >= 0)",
                weights[bad]
            )));
        }

        let specgrid_indices = (0..fluxes.nrows() as i64).collect();
        Ok(SedGrid {
            fluxes,
            weights,
            wavelengths,
            specgrid_indices,
            columns: Vec::new(),
        })
    }

    /// Replace the spectral-grid back-index column.
    pub fn with_specgrid_indices(mut self, indices: Vec<i64>) -> Result<Self, SedFitError> {
        if indices.len() != self.fluxes.nrows() {
            return Err(SedFitError::InconsistentGrid(format!(
                "{} spectral grid indices for {} models",
                indices.len(),
                self.fluxes.nrows()
            )));
        }
        self.specgrid_indices = indices;
        Ok(self)
    }

    /// Add a named parameter column.
    ///
    /// Return
    /// ----------
    /// * `Err(SedFitError::InconsistentGrid)` if the column length differs from the
    ///   number of models or the name is already taken.
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<Self, SedFitError> {
        let name = name.into();
        if values.len() != self.fluxes.nrows() {
            return Err(SedFitError::InconsistentGrid(format!(
                "column '{name}' has {} values for {} models",
                values.len(),
                self.fluxes.nrows()
            )));
        }
        if self.columns.iter().any(|(n, _)| *n == name) {
            return Err(SedFitError::InconsistentGrid(format!(
                "column '{name}' defined twice"
            )));
        }
        self.columns.push((name, values));
        Ok(self)
    }
}

impl ModelGrid for SedGrid {
    fn fluxes(&self) -> &DMatrix<f64> {
        &self.fluxes
    }

    fn weights(&self) -> &[f64] {
        &self.weights
    }

    fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    fn specgrid_indices(&self) -> &[i64] {
        &self.specgrid_indices
    }

    fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    fn column(&self, name: &str) -> Result<&[f64], SedFitError> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
            .ok_or_else(|| SedFitError::UnknownParameter(name.to_string()))
    }
}
