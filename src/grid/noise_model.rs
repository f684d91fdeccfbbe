//! # Flux-space noise model
//!
//! Per model row and per band, the noise model provides the 1-σ flux **error** and the
//! additive flux **bias** measured from artificial star tests. Both arrays are indexed
//! exactly like the rows of the [`ModelGrid`](crate::grid::ModelGrid), and are consumed
//! directly inside the likelihood kernel (the observed flux is compared to
//! `model + bias` with uncertainty `error`).
use nalgebra::DMatrix;

use crate::sedfit_errors::SedFitError;

/// Read access to per-model flux errors and biases.
pub trait NoiseModel {
    /// 1-σ flux error, `n_models × n_bands`.
    fn error(&self) -> &DMatrix<f64>;

    /// Additive flux bias, `n_models × n_bands`.
    fn bias(&self) -> &DMatrix<f64>;
}

/// In-memory noise model.
#[derive(Debug, Clone)]
pub struct NoiseModelData {
    error: DMatrix<f64>,
    bias: DMatrix<f64>,
}

impl NoiseModelData {
    /// Build a noise model, checking that error and bias share the same shape.
    pub fn new(error: DMatrix<f64>, bias: DMatrix<f64>) -> Result<Self, SedFitError> {
        if error.shape() != bias.shape() {
            return Err(SedFitError::InconsistentGrid(format!(
                "noise error is {:?} but noise bias is {:?}",
                error.shape(),
                bias.shape()
            )));
        }
        Ok(NoiseModelData { error, bias })
    }

    /// Unbiased noise model with the same error for every model and band.
    pub fn uniform(n_models: usize, n_bands: usize, error: f64) -> Self {
        NoiseModelData {
            error: DMatrix::from_element(n_models, n_bands, error),
            bias: DMatrix::zeros(n_models, n_bands),
        }
    }
}

impl NoiseModel for NoiseModelData {
    fn error(&self) -> &DMatrix<f64> {
        &self.error
    }

    fn bias(&self) -> &DMatrix<f64> {
        &self.bias
    }
}
