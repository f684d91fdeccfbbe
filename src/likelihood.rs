//! # Sparse likelihood over a model grid
//!
//! For one observed star, the [`SparseLikelihoodEngine`] evaluates the Gaussian
//! log-likelihood of every model row with a positive prior weight, adds the log prior, and
//! keeps only the rows close enough to the peak to matter: the **sparse likelihood**.
//!
//! ## Likelihood kernel
//! -----------------
//! For model row `i` and every band `j` whose observed flux `f_j` is finite:
//!
//! ```text
//! chi2_i = Σ_j ((f_j − (m_ij + b_ij)) / σ_ij)²
//! lnL_i  = −chi2_i / 2 − Σ_j ln σ_ij − (n / 2) ln 2π
//! ```
//!
//! where `m` is the model flux, `b` the noise-model bias and `σ` the noise-model error.
//! The bias and error enter the kernel directly; there is no separate convolution step.
//! A row with a non-positive (or non-finite) error in a used band cannot be evaluated and
//! gets `lnL = −∞`, `chi2 = +∞`.
//!
//! ## Prior
//! -----------------
//! Rows with weight `0` are dropped once at construction. The remaining rows carry the log
//! prior `ln(w_i) − ln(Σ w)`, which does not depend on the observation and is therefore
//! computed a single time for the whole batch.
//!
//! ## Sparsification
//! -----------------
//! With `lnp_i = lnL_i + ln prior_i` and `max_lnp` the maximum over **finite** entries,
//! row `i` is retained iff `lnp_i` is finite and `lnp_i − max_lnp > −|threshold|`.
//! The absolute value makes the cutoff always extend downward from the peak, whatever the
//! sign convention of the caller. If no entry is finite the star cannot be reduced and
//! [`SedFitError::NoFiniteLikelihood`] is returned.
use nalgebra::{DMatrix, DVector};
use rand::Rng;

use crate::{
    constants::{GridIndex, LnP, StarIndex, LN_2PI},
    grid::{noise_model::NoiseModel, ModelGrid},
    sedfit_errors::SedFitError,
};

/// Evaluate the log-likelihood and chi-square of one model row.
///
/// Arguments
/// -----------------
/// * `observed`: observed flux vector (non-finite entries are skipped).
/// * `fluxes`, `error`, `bias`: model and noise matrices sharing the grid row indexing.
/// * `row`: model row to evaluate.
///
/// Return
/// ----------
/// * `(lnL, chi2)`, or `(−∞, +∞)` when a used band has a non-positive error.
pub fn log_likelihood_row(
    observed: &DVector<f64>,
    fluxes: &DMatrix<f64>,
    error: &DMatrix<f64>,
    bias: &DMatrix<f64>,
    row: GridIndex,
) -> (LnP, f64) {
    let mut chi2 = 0.0;
    let mut ln_sigma = 0.0;
    let mut n_used = 0usize;

    for (j, &flux) in observed.iter().enumerate() {
        if !flux.is_finite() {
            continue;
        }
        let sigma = error[(row, j)];
        if !(sigma > 0.0 && sigma.is_finite()) {
            return (f64::NEG_INFINITY, f64::INFINITY);
        }
        let resid = (flux - (fluxes[(row, j)] + bias[(row, j)])) / sigma;
        chi2 += resid * resid;
        ln_sigma += sigma.ln();
        n_used += 1;
    }

    let lnp = -0.5 * chi2 - ln_sigma - 0.5 * n_used as f64 * LN_2PI;
    (lnp, chi2)
}

/// Threshold-filtered likelihood of one star.
///
/// The three vectors are parallel; `grid_indices` refers to rows of the full model grid,
/// in increasing order. `lnp` includes the log prior.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SparseLikelihood {
    pub grid_indices: Vec<GridIndex>,
    pub lnp: Vec<LnP>,
    pub chi2: Vec<f64>,
}

impl SparseLikelihood {
    pub fn len(&self) -> usize {
        self.grid_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grid_indices.is_empty()
    }

    /// Draw `n_points` entries without replacement.
    ///
    /// When `n_points` is at least the number of entries the whole set is returned
    /// unchanged. Drawn entries keep their grid order.
    pub fn subsample(&self, n_points: usize, rng: &mut impl Rng) -> SparseLikelihood {
        if n_points >= self.len() {
            return self.clone();
        }

        let mut picks = rand::seq::index::sample(rng, self.len(), n_points).into_vec();
        picks.sort_unstable();

        SparseLikelihood {
            grid_indices: picks.iter().map(|&k| self.grid_indices[k]).collect(),
            lnp: picks.iter().map(|&k| self.lnp[k]).collect(),
            chi2: picks.iter().map(|&k| self.chi2[k]).collect(),
        }
    }
}

/// Likelihood evaluator shared by every star of a batch.
///
/// Holds borrowed views of the grid fluxes and noise arrays, the rows with positive
/// weight, and their log prior.
#[derive(Debug, Clone)]
pub struct SparseLikelihoodEngine<'g> {
    fluxes: &'g DMatrix<f64>,
    error: &'g DMatrix<f64>,
    bias: &'g DMatrix<f64>,
    active_rows: Vec<GridIndex>,
    ln_prior: Vec<LnP>,
    threshold: f64,
}

impl<'g> SparseLikelihoodEngine<'g> {
    /// Prepare the engine for a grid and its noise model.
    ///
    /// Arguments
    /// -----------------
    /// * `grid`: model grid (fluxes and prior weights).
    /// * `noise`: per-row flux error and bias, same shape as the grid fluxes.
    /// * `threshold`: sparse cutoff in log units; only `|threshold|` is used.
    ///
    /// Return
    /// ----------
    /// * `Err(SedFitError::InconsistentGrid)` if the noise arrays do not match the grid.
    /// * `Err(SedFitError::EmptyPrior)` if no row has a positive weight.
    /// * `Err(SedFitError::InvalidFitParameter)` if the threshold is zero or not finite.
    pub fn new<G, N>(grid: &'g G, noise: &'g N, threshold: f64) -> Result<Self, SedFitError>
    where
        G: ModelGrid + ?Sized,
        N: NoiseModel + ?Sized,
    {
        let fluxes = grid.fluxes();
        if noise.error().shape() != fluxes.shape() || noise.bias().shape() != fluxes.shape() {
            return Err(SedFitError::InconsistentGrid(format!(
                "noise model is {:?} but grid fluxes are {:?}",
                noise.error().shape(),
                fluxes.shape()
            )));
        }
        if !threshold.is_finite() || threshold == 0.0 {
            return Err(SedFitError::InvalidFitParameter(format!(
                "threshold must be finite and non-zero, got {threshold}"
            )));
        }

        let weights = grid.weights();
        let active_rows: Vec<GridIndex> = (0..weights.len()).filter(|&i| weights[i] > 0.0).collect();
        if active_rows.is_empty() {
            return Err(SedFitError::EmptyPrior);
        }

        let ln_norm = active_rows.iter().map(|&i| weights[i]).sum::<f64>().ln();
        let ln_prior = active_rows
            .iter()
            .map(|&i| weights[i].ln() - ln_norm)
            .collect();

        tracing::debug!(
            n_rows = weights.len(),
            n_active = active_rows.len(),
            "model grid pre-filtered on positive weight"
        );

        Ok(SparseLikelihoodEngine {
            fluxes,
            error: noise.error(),
            bias: noise.bias(),
            active_rows,
            ln_prior,
            threshold: threshold.abs(),
        })
    }

    /// Grid rows with a positive prior weight, in increasing order.
    pub fn active_rows(&self) -> &[GridIndex] {
        &self.active_rows
    }

    /// Log prior of every active row.
    pub fn ln_prior(&self) -> &[LnP] {
        &self.ln_prior
    }

    /// Absolute sparse cutoff.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Log posterior (likelihood + prior) and chi-square of every active row.
    ///
    /// Return
    /// ----------
    /// * Two vectors parallel to [`active_rows`](Self::active_rows).
    /// * `Err(SedFitError::BandCountMismatch)` if the observed vector has the wrong length.
    pub fn full_log_posterior(
        &self,
        observed: &DVector<f64>,
    ) -> Result<(Vec<LnP>, Vec<f64>), SedFitError> {
        if observed.len() != self.fluxes.ncols() {
            return Err(SedFitError::BandCountMismatch {
                expected: self.fluxes.ncols(),
                found: observed.len(),
            });
        }

        let (lnp, chi2) = self
            .active_rows
            .iter()
            .zip(&self.ln_prior)
            .map(|(&row, &prior)| {
                let (lnl, chi2) =
                    log_likelihood_row(observed, self.fluxes, self.error, self.bias, row);
                (lnl + prior, chi2)
            })
            .unzip();

        Ok((lnp, chi2))
    }

    /// Sparse likelihood of star `star` with observed flux `observed`.
    ///
    /// Return
    /// ----------
    /// * The retained rows, never empty on success.
    /// * `Err(SedFitError::NoFiniteLikelihood)` if no row has a finite log posterior.
    pub fn compute(
        &self,
        star: StarIndex,
        observed: &DVector<f64>,
    ) -> Result<SparseLikelihood, SedFitError> {
        let (lnp, chi2) = self.full_log_posterior(observed)?;

        let max_lnp = lnp
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);
        if !max_lnp.is_finite() {
            return Err(SedFitError::NoFiniteLikelihood(star));
        }

        let mut sparse = SparseLikelihood::default();
        for (k, (&l, &c)) in lnp.iter().zip(&chi2).enumerate() {
            if l.is_finite() && l - max_lnp > -self.threshold {
                sparse.grid_indices.push(self.active_rows[k]);
                sparse.lnp.push(l);
                sparse.chi2.push(c);
            }
        }
        Ok(sparse)
    }
}
