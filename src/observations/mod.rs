//! # Observed photometry catalog
//!
//! The batch runner only needs three things from the observation catalog: how many stars
//! it holds, the names of its photometric filters, and the observed flux vector of a star
//! given its **stable enumeration index** `e`. Per-filter flux columns are also exposed
//! for callers building ancillary output. That index is the join key of every output
//! artifact, so an implementation must return the same star for the same `e` across runs
//! (resumed runs depend on it).
//!
//! [`PhotometryCatalog`] is the in-memory implementation: one row per star, one column
//! per filter.
use nalgebra::{DMatrix, DVector};

use crate::{constants::StarIndex, sedfit_errors::SedFitError};

/// Read access to an observation catalog.
pub trait ObservationCatalog {
    /// Number of stars in the catalog.
    fn n_stars(&self) -> usize;

    /// Filter names, in the band order of the flux vectors.
    fn filters(&self) -> &[String];

    /// Observed flux vector of star `e` (one value per filter).
    fn flux(&self, e: StarIndex) -> DVector<f64>;

    /// Fluxes of every star in one filter, or `None` for an unknown filter.
    fn filter_fluxes(&self, filter: &str) -> Option<DVector<f64>> {
        let j = self.filters().iter().position(|f| f == filter)?;
        Some(DVector::from_iterator(
            self.n_stars(),
            (0..self.n_stars()).map(|e| self.flux(e)[j]),
        ))
    }

    /// Enumerate `(e, flux)` pairs from star `start` to the end, in increasing index order.
    fn enumerate_from(
        &self,
        start: StarIndex,
    ) -> impl Iterator<Item = (StarIndex, DVector<f64>)> + '_ {
        (start..self.n_stars()).map(move |e| (e, self.flux(e)))
    }
}

/// In-memory catalog of observed fluxes.
#[derive(Debug, Clone)]
pub struct PhotometryCatalog {
    filters: Vec<String>,
    fluxes: DMatrix<f64>,
}

impl PhotometryCatalog {
    /// Build a catalog from an `n_stars × n_filters` flux matrix.
    ///
    /// Non-finite fluxes are allowed and mark a band as not measured for that star;
    /// the likelihood kernel skips them.
    pub fn new(filters: Vec<String>, fluxes: DMatrix<f64>) -> Result<Self, SedFitError> {
        if filters.len() != fluxes.ncols() {
            return Err(SedFitError::InconsistentGrid(format!(
                "{} filter names for {} flux columns",
                filters.len(),
                fluxes.ncols()
            )));
        }
        Ok(PhotometryCatalog { filters, fluxes })
    }
}

impl ObservationCatalog for PhotometryCatalog {
    fn n_stars(&self) -> usize {
        self.fluxes.nrows()
    }

    fn filters(&self) -> &[String] {
        &self.filters
    }

    fn flux(&self, e: StarIndex) -> DVector<f64> {
        self.fluxes.row(e).transpose()
    }

    fn filter_fluxes(&self, filter: &str) -> Option<DVector<f64>> {
        let j = self.filters.iter().position(|f| f == filter)?;
        Some(self.fluxes.column(j).into_owned())
    }
}
