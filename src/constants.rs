//! # Constants and type definitions for sedfit
//!
//! This module centralizes the **default configuration values**, the **sentinel
//! markers** found in stellar model grids, and the **common type aliases** used
//! throughout the crate.
//!
//! ## Overview
//!
//! - Defaults for the posterior reduction (percentiles, histogram bins, sparse threshold)
//! - Grid bookkeeping columns that are never treated as physical parameters
//! - Parameters that are binned in log space by default
//! - Type aliases for star and grid indices
//!
//! These definitions are used by the likelihood engine, the statistics reducer and the
//! checkpointed batch runner.

// -------------------------------------------------------------------------------------------------
// Posterior reduction defaults
// -------------------------------------------------------------------------------------------------

/// Percentiles reported for every parameter (median and ±1σ for a unimodal PDF)
pub const DEFAULT_PERCENTILES: [f64; 3] = [16.0, 50.0, 84.0];

/// Maximum number of bins used by a fast 1D marginal PDF
pub const DEFAULT_MAX_NBINS: usize = 50;

/// Default sparse-likelihood threshold (log units below the peak)
pub const DEFAULT_LNP_THRESHOLD: f64 = -40.0;

/// `ln(2π)`, normalization of the Gaussian likelihood kernel
pub const LN_2PI: f64 = 1.837_877_066_409_345_3;

// -------------------------------------------------------------------------------------------------
// Grid conventions
// -------------------------------------------------------------------------------------------------

/// Marker used by model grids for quantities that do not apply to a row
/// (white-dwarf-only quantities are stored as `-99.99` for every other model).
pub const MISSING_VALUE_SENTINEL: f64 = -99.99;

/// Name fragment identifying white-dwarf-only quantities.
pub const WHITE_DWARF_TAG: &str = "_wd";

/// Linear-valued parameters whose marginal PDF is binned in log space by default.
pub const LOG_SPACED_PARAMETERS: [&str; 3] = ["M_ini", "M_act", "radius"];

/// Grid columns holding bookkeeping data rather than physical parameters.
pub const NON_PARAMETER_COLUMNS: [&str; 6] = [
    "osl",
    "keep",
    "weight",
    "fullgrid_idx",
    "stage",
    "specgrid_indx",
];

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Position of a star in the observation catalog (join key of every output artifact)
pub type StarIndex = usize;
/// Row index in the full (unfiltered) model grid
pub type GridIndex = usize;
/// Natural log of a probability
pub type LnP = f64;
