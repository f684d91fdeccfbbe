//! # Batch fit configuration
//!
//! This module defines [`FitParams`], the configuration of a batch posterior-statistics
//! run, and its validating builder [`FitParamsBuilder`].
//!
//! ## Overview
//! -----------------
//! [`FitParams`] centralizes every option recognized by the batch runner:
//!
//! - **Reduction**: requested parameters, reported percentiles, histogram bin cap and
//!   per-parameter binning overrides.
//! - **Sparse likelihood**: the log-likelihood threshold below the peak and the optional
//!   number of points persisted per star.
//! - **Checkpointing**: the flush interval (in stars) and the resume flag.
//! - **Outputs**: the path of each of the three artifacts, each independently optional.
//!
//! The struct is `serde`-serializable so a run configuration can be stored next to its
//! outputs and reloaded for a resumed run.
//!
//! ## Example
//! -----------------
//! ```rust,no_run
//! use sedfit::fit_params::FitParams;
//!
//! let params = FitParams::builder()
//!     .parameters(["logT", "logg", "M_ini"])
//!     .threshold(-10.0)
//!     .save_every(1000)
//!     .lnp_npts(500)
//!     .stats_path("run/stats.parquet")
//!     .pdf1d_path("run/pdf1d.parquet")
//!     .lnp_path("run/lnp.zip")
//!     .build()
//!     .unwrap();
//! ```
//!
//! ## Validation
//! -----------------
//! [`FitParamsBuilder::build`] checks everything that does not need the model grid.
//! Parameter names are checked against the grid by [`FitParams::resolve_parameters`],
//! which the batch runner calls before any star is processed.
use std::cmp::Ordering::{Equal, Greater, Less};
use std::collections::BTreeMap;
use std::fmt;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{DEFAULT_LNP_THRESHOLD, DEFAULT_MAX_NBINS, DEFAULT_PERCENTILES, NON_PARAMETER_COLUMNS},
    grid::ModelGrid,
    sedfit_errors::SedFitError,
};

pub use crate::pdf1d::ParameterBinning;

/// Output location of each artifact; `None` disables that artifact.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutputPaths {
    /// Summary statistics table (Parquet).
    pub stats: Option<Utf8PathBuf>,
    /// 1D marginal PDFs (Parquet).
    pub pdf1d: Option<Utf8PathBuf>,
    /// Sparse likelihood archive (ZIP).
    pub lnp: Option<Utf8PathBuf>,
}

/// Configuration of a batch fit.
///
/// Defaults
/// -----------------
/// * every grid parameter column, percentiles `[16, 50, 84]`, at most 50 bins;
/// * threshold `-40` (only `|threshold|` is used);
/// * flush only at the end of the run, no subsampling, fresh start, no outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitParams {
    /// Requested parameters; `None` selects every grid column except bookkeeping ones.
    pub parameters: Option<Vec<String>>,
    pub percentiles: Vec<f64>,
    pub max_nbins: usize,
    pub threshold: f64,
    /// Flush the artifacts every `save_every` stars.
    pub save_every: Option<usize>,
    /// Number of sparse points persisted per star in the likelihood archive.
    pub lnp_npts: Option<usize>,
    pub resume: bool,
    pub binning_overrides: BTreeMap<String, ParameterBinning>,
    pub outputs: OutputPaths,
}

impl Default for FitParams {
    fn default() -> Self {
        FitParams {
            parameters: None,
            percentiles: DEFAULT_PERCENTILES.to_vec(),
            max_nbins: DEFAULT_MAX_NBINS,
            threshold: DEFAULT_LNP_THRESHOLD,
            save_every: None,
            lnp_npts: None,
            resume: false,
            binning_overrides: BTreeMap::new(),
            outputs: OutputPaths::default(),
        }
    }
}

impl FitParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a [`FitParamsBuilder`] initialized with the defaults.
    pub fn builder() -> FitParamsBuilder {
        FitParamsBuilder::new()
    }

    /// Column label of each percentile, e.g. `p16`.
    pub fn percentile_labels(&self) -> Vec<String> {
        percentile_labels(&self.percentiles)
    }

    /// Check the grid-independent rules, see [`FitParamsBuilder::build`].
    pub fn validate(&self) -> Result<(), SedFitError> {
        let invalid = |msg: &str| Err(SedFitError::InvalidFitParameter(msg.into()));

        if self.percentiles.is_empty() {
            return invalid("at least one percentile is required");
        }
        if !self.percentiles.iter().all(|&p| ge0(p) && le(p, 100.0)) {
            return invalid("percentiles must lie in [0, 100]");
        }
        if !self.percentiles.windows(2).all(|w| lt(w[0], w[1])) {
            return invalid("percentiles must be strictly increasing");
        }
        let labels = self.percentile_labels();
        if labels.windows(2).any(|w| w[0] == w[1]) {
            return invalid("percentiles must have distinct integer parts");
        }
        if self.max_nbins == 0 {
            return invalid("max_nbins must be >= 1");
        }
        if !self.threshold.is_finite() || self.threshold == 0.0 {
            return invalid("threshold must be finite and non-zero");
        }
        if self.save_every == Some(0) {
            return invalid("save_every must be >= 1");
        }
        if self.lnp_npts == Some(0) {
            return invalid("lnp_npts must be >= 1");
        }
        if matches!(&self.parameters, Some(list) if list.is_empty()) {
            return invalid("parameter list must not be empty");
        }
        if self.resume && self.outputs.stats.is_none() {
            return invalid("resume requires a summary table path");
        }
        Ok(())
    }

    /// Resolve the requested parameters against a model grid.
    ///
    /// Bookkeeping columns (`osl`, `keep`, `weight`, `fullgrid_idx`, `stage`,
    /// `specgrid_indx`) are never reduced, even when requested explicitly.
    ///
    /// Return
    /// ----------
    /// * `(name, binning)` pairs in request order (grid order when no list is given),
    ///   with overrides applied on top of [`ParameterBinning::for_parameter`].
    /// * `Err(SedFitError::UnknownParameter)` for the first name missing from the grid.
    pub fn resolve_parameters<G: ModelGrid + ?Sized>(
        &self,
        grid: &G,
    ) -> Result<Vec<(String, ParameterBinning)>, SedFitError> {
        let requested: Vec<String> = match &self.parameters {
            Some(list) => list.clone(),
            None => grid.column_names().into_iter().map(str::to_string).collect(),
        };

        requested
            .into_iter()
            .filter(|name| !NON_PARAMETER_COLUMNS.contains(&name.as_str()))
            .map(|name| {
                grid.column(&name)?;
                let binning = self
                    .binning_overrides
                    .get(&name)
                    .copied()
                    .unwrap_or_else(|| ParameterBinning::for_parameter(&name));
                Ok((name, binning))
            })
            .collect()
    }
}

pub(crate) fn percentile_labels(percentiles: &[f64]) -> Vec<String> {
    percentiles.iter().map(|p| format!("p{}", *p as i64)).collect()
}

/// Return true iff x >= 0.0 and comparable (i.e., not NaN).
#[inline]
fn ge0(x: f64) -> bool {
    matches!(x.partial_cmp(&0.0), Some(Greater) | Some(Equal))
}

/// Return true iff a <= b and comparable.
#[inline]
fn le(a: f64, b: f64) -> bool {
    matches!(a.partial_cmp(&b), Some(Less) | Some(Equal))
}

#[inline]
fn lt(a: f64, b: f64) -> bool {
    a.partial_cmp(&b) == Some(Less)
}

/// Builder for [`FitParams`], with validation.
#[derive(Debug, Clone, Default)]
pub struct FitParamsBuilder {
    params: FitParams,
}

impl FitParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: FitParams::default(),
        }
    }

    // --- Reduction ---
    pub fn parameters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params.parameters = Some(names.into_iter().map(Into::into).collect());
        self
    }
    pub fn percentiles(mut self, v: Vec<f64>) -> Self {
        self.params.percentiles = v;
        self
    }
    pub fn max_nbins(mut self, v: usize) -> Self {
        self.params.max_nbins = v;
        self
    }
    pub fn binning(mut self, name: impl Into<String>, binning: ParameterBinning) -> Self {
        self.params.binning_overrides.insert(name.into(), binning);
        self
    }

    // --- Sparse likelihood ---
    pub fn threshold(mut self, v: f64) -> Self {
        self.params.threshold = v;
        self
    }
    pub fn lnp_npts(mut self, v: usize) -> Self {
        self.params.lnp_npts = Some(v);
        self
    }

    // --- Checkpointing ---
    pub fn save_every(mut self, v: usize) -> Self {
        self.params.save_every = Some(v);
        self
    }
    pub fn resume(mut self, v: bool) -> Self {
        self.params.resume = v;
        self
    }

    // --- Outputs ---
    pub fn stats_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.params.outputs.stats = Some(path.into());
        self
    }
    pub fn pdf1d_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.params.outputs.pdf1d = Some(path.into());
        self
    }
    pub fn lnp_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.params.outputs.lnp = Some(path.into());
        self
    }

    /// Finalize the builder.
    ///
    /// Validation rules
    /// -----------------
    /// * at least one percentile, each in `[0, 100]`, strictly increasing, with distinct
    ///   integer parts (they name the `p{int}` columns);
    /// * `max_nbins >= 1`;
    /// * `threshold` finite and non-zero;
    /// * `save_every >= 1` and `lnp_npts >= 1` when set;
    /// * an explicit parameter list is not empty;
    /// * `resume` requires a summary table path (the resume position is read from it).
    ///
    /// Returns
    /// -----------------
    /// * `Err(SedFitError::InvalidFitParameter)` naming the first broken rule.
    pub fn build(self) -> Result<FitParams, SedFitError> {
        self.params.validate()?;
        Ok(self.params)
    }
}

impl fmt::Display for FitParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt<T: fmt::Display>(v: &Option<T>) -> String {
            v.as_ref().map_or_else(|| "-".to_string(), |v| v.to_string())
        }

        writeln!(f, "Batch fit parameters")?;
        writeln!(f, "--------------------")?;
        match &self.parameters {
            Some(list) => writeln!(f, "  parameters  = {}", list.join(", "))?,
            None => writeln!(f, "  parameters  = <all grid columns>")?,
        }
        writeln!(f, "  percentiles = {:?}", self.percentiles)?;
        writeln!(f, "  max_nbins   = {}", self.max_nbins)?;
        writeln!(f, "  threshold   = {}", self.threshold)?;
        writeln!(f, "  save_every  = {}", opt(&self.save_every))?;
        writeln!(f, "  lnp_npts    = {}", opt(&self.lnp_npts))?;
        writeln!(f, "  resume      = {}", self.resume)?;
        writeln!(f, "  stats       = {}", opt(&self.outputs.stats))?;
        writeln!(f, "  pdf1d       = {}", opt(&self.outputs.pdf1d))?;
        write!(f, "  lnp         = {}", opt(&self.outputs.lnp))
    }
}
