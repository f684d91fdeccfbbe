pub mod batch;
pub mod constants;
pub mod fit_params;
pub mod grid;
pub mod likelihood;
pub mod observations;
pub mod output;
pub mod pdf1d;
pub(crate) mod progress_bar;
pub mod sedfit_errors;
pub mod stats;

pub use batch::{BatchFit, FitReport, PosteriorState, RunStart};
pub use fit_params::FitParams;
pub use grid::{noise_model::NoiseModelData, ModelGrid, SedGrid};
pub use observations::{ObservationCatalog, PhotometryCatalog};
pub use sedfit_errors::SedFitError;
