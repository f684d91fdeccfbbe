//! # Checkpointed batch fit
//!
//! [`BatchFit`] drives the posterior reduction of a whole observation catalog and keeps
//! the three output artifacts (summary table, 1D PDF file, likelihood archive) on disk up
//! to date, so that a run killed at any point can be resumed.
//!
//! ## Run lifecycle
//! -----------------
//! ```text
//! FreshStart ─┐
//!             ├─> Running <──> Flushing ──> Done
//! Resumed ────┘
//! ```
//!
//! * **FreshStart** – every statistic is zero; a new likelihood archive holding the grid
//!   wavelengths and the filter names is created before the first star.
//! * **Resumed** – the summary table (and the 1D PDF file, when enabled) of a previous run
//!   are loaded; the loop restarts one past the last star with a non-zero `Pmax`.
//! * **Running** – stars are processed in increasing index order. Each one goes through the
//!   [`SparseLikelihoodEngine`] and the [`StatisticsReducer`]; its statistics are stored
//!   in the [`PosteriorState`] and, when the archive is enabled, the (optionally
//!   subsampled) sparse likelihood is queued.
//! * **Flushing** – on the [`CheckpointPolicy`] interval and always at the end: the PDF
//!   file and the summary table are rewritten from the full in-memory state, then the
//!   queued groups are appended to the archive and the queue is cleared.
//! * **Done** – nothing is written anymore.
//!
//! Processing is strictly sequential: the resume position relies on stars being filled in
//! order without gaps.
//!
//! ## Failure of a star
//! -----------------
//! If a star cannot be reduced (no finite likelihood, band count mismatch), the artifacts
//! are flushed so every earlier star is persisted, then the error is returned. A later run
//! with `resume` restarts at the failing star.
//!
//! ## Example
//! -----------------
//! ```rust,no_run
//! use rand::{rngs::StdRng, SeedableRng};
//! use sedfit::batch::BatchFit;
//! use sedfit::fit_params::FitParams;
//! # use sedfit::grid::{SedGrid, noise_model::NoiseModelData};
//! # use sedfit::observations::PhotometryCatalog;
//! # let grid: SedGrid = unimplemented!();
//! # let noise: NoiseModelData = unimplemented!();
//! # let catalog: PhotometryCatalog = unimplemented!();
//!
//! let params = FitParams::builder()
//!     .save_every(500)
//!     .stats_path("run/stats.parquet")
//!     .pdf1d_path("run/pdf1d.parquet")
//!     .lnp_path("run/lnp.zip")
//!     .build()
//!     .unwrap();
//!
//! let mut rng = StdRng::seed_from_u64(42);
//! let report = BatchFit::new(&grid, &catalog, &noise, &params).run(&mut rng).unwrap();
//! println!("{} stars processed", report.stars_processed);
//! ```
use std::fmt;

use nalgebra::DVector;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::{
    constants::StarIndex,
    fit_params::FitParams,
    grid::{noise_model::NoiseModel, ModelGrid},
    likelihood::SparseLikelihoodEngine,
    observations::ObservationCatalog,
    output::{
        lnp_archive::{ArchiveLocation, LnpArchive, LnpMetadata, StoredLikelihood},
        pdf1d_file, summary_table, AncillaryColumn,
    },
    progress_bar::StarProgress,
    sedfit_errors::SedFitError,
    stats::{StarStatistics, StatisticsReducer},
};

pub mod checkpoint;
pub mod state;

pub use checkpoint::CheckpointPolicy;
pub use state::PosteriorState;

/// Phase of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    FreshStart,
    Resumed,
    Running,
    Flushing,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::FreshStart => "fresh start",
            RunPhase::Resumed => "resumed",
            RunPhase::Running => "running",
            RunPhase::Flushing => "flushing",
            RunPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// How a run started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStart {
    Fresh,
    /// Resumed from the artifacts of a previous run, first star processed = `position`.
    Resumed { position: StarIndex },
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct FitReport {
    pub start: RunStart,
    /// Stars reduced by this run (excluding those loaded from a previous run).
    pub stars_processed: usize,
    /// Number of flushes, the final one included.
    pub flushes: usize,
    /// Archive the likelihood groups ended up in, `None` when disabled.
    pub lnp_location: Option<ArchiveLocation>,
    pub state: PosteriorState,
}

/// Batch posterior reduction of an observation catalog against a model grid.
pub struct BatchFit<'a, G, O, N> {
    grid: &'a G,
    catalog: &'a O,
    noise: &'a N,
    params: &'a FitParams,
    ancillary: Vec<AncillaryColumn>,
}

/// Mutable side of a run: the owned result arrays, the pending archive groups and the
/// current phase.
struct RunState {
    phase: RunPhase,
    state: PosteriorState,
    pending: Vec<StoredLikelihood>,
    archive: Option<LnpArchive>,
    flushes: usize,
}

impl RunState {
    fn enter(&mut self, next: RunPhase) {
        debug!(from = %self.phase, to = %next, "batch fit phase");
        self.phase = next;
    }
}

impl<'a, G, O, N> BatchFit<'a, G, O, N>
where
    G: ModelGrid,
    O: ObservationCatalog,
    N: NoiseModel,
{
    pub fn new(grid: &'a G, catalog: &'a O, noise: &'a N, params: &'a FitParams) -> Self {
        BatchFit {
            grid,
            catalog,
            noise,
            params,
            ancillary: Vec::new(),
        }
    }

    /// Extra per-star columns written in front of the summary table statistics.
    pub fn with_ancillary(mut self, columns: Vec<AncillaryColumn>) -> Self {
        self.ancillary = columns;
        self
    }

    fn check_inputs(&self) -> Result<(), SedFitError> {
        self.params.validate()?;
        if self.catalog.filters().len() != self.grid.n_bands() {
            return Err(SedFitError::BandCountMismatch {
                expected: self.grid.n_bands(),
                found: self.catalog.filters().len(),
            });
        }
        let n_stars = self.catalog.n_stars();
        if let Some(col) = self.ancillary.iter().find(|c| c.values.len() != n_stars) {
            return Err(SedFitError::InvalidFitParameter(format!(
                "ancillary column '{}' has {} values for {n_stars} stars",
                col.name,
                col.values.len()
            )));
        }
        Ok(())
    }

    /// Run the batch fit.
    ///
    /// Arguments
    /// -----------------
    /// * `rng`: source of randomness for the subsampling of persisted likelihoods.
    ///
    /// Return
    /// ----------
    /// * A [`FitReport`] with the final in-memory state.
    /// * `Err(SedFitError::UnknownParameter)` before any computation if a requested
    ///   parameter is not a grid column.
    /// * `Err(SedFitError::MissingResumeArtifact)` when resuming without the previous
    ///   summary table or PDF file.
    /// * The error of the first star that cannot be reduced, after a flush.
    pub fn run(&self, rng: &mut impl Rng) -> Result<FitReport, SedFitError> {
        self.check_inputs()?;
        let parameters = self.params.resolve_parameters(self.grid)?;
        let engine = SparseLikelihoodEngine::new(self.grid, self.noise, self.params.threshold)?;
        let reducer = StatisticsReducer::new(
            self.grid,
            &parameters,
            &self.params.percentiles,
            self.params.max_nbins,
        )?;
        let policy = CheckpointPolicy::new(self.params.save_every);
        let n_stars = self.catalog.n_stars();

        let (mut run, start) = self.start(n_stars, &reducer)?;
        let start_position = match start {
            RunStart::Fresh => 0,
            RunStart::Resumed { position } => position,
        };

        run.enter(RunPhase::Running);
        let mut progress = StarProgress::new(n_stars, start_position);
        let mut stars_processed = 0;

        for (e, flux) in self.catalog.enumerate_from(start_position) {
            let stats = match self.process_star(e, &flux, &engine, &reducer, &mut run, &mut *rng) {
                Ok(stats) => stats,
                Err(err) => {
                    warn!(star = e, error = %err, "star could not be reduced, saving progress");
                    if let Err(flush_err) = self.flush(&mut run, e) {
                        warn!(error = %flush_err, "checkpoint after failure did not complete");
                    }
                    progress.finish();
                    return Err(err);
                }
            };
            run.state.record(e, &stats);
            stars_processed += 1;
            progress.star_done();

            if policy.should_flush(e) {
                progress.flushing(e);
                self.flush(&mut run, e)?;
            }
        }

        self.flush(&mut run, n_stars.saturating_sub(1))?;
        progress.finish();
        run.enter(RunPhase::Done);

        info!(
            stars_processed,
            flushes = run.flushes,
            "batch fit complete"
        );

        Ok(FitReport {
            start,
            stars_processed,
            flushes: run.flushes,
            lnp_location: run.archive.as_ref().map(|a| a.location().clone()),
            state: run.state,
        })
    }

    /// Build the initial run state, fresh or from a previous run's artifacts.
    fn start(
        &self,
        n_stars: usize,
        reducer: &StatisticsReducer<'_>,
    ) -> Result<(RunState, RunStart), SedFitError> {
        let outputs = &self.params.outputs;
        let mut state = PosteriorState::new_zeroed(n_stars, reducer);
        let metadata = LnpMetadata {
            grid_waves: self.grid.wavelengths().to_vec(),
            filters: self.catalog.filters().to_vec(),
        };

        if self.params.resume {
            let stats_path = outputs.stats.as_ref().ok_or_else(|| {
                SedFitError::InvalidFitParameter("resume requires a summary table path".into())
            })?;
            summary_table::load_into(stats_path, &mut state)?;
            if let Some(pdf_path) = &outputs.pdf1d {
                pdf1d_file::load_into(pdf_path, &mut state)?;
            }
            let position = state.resume_position();
            let archive = outputs
                .lnp
                .clone()
                .map(|path| LnpArchive::attach(path, metadata));

            info!(start = position, n_stars, "batch fit resumed");
            let run = RunState {
                phase: RunPhase::Resumed,
                state,
                pending: Vec::new(),
                archive,
                flushes: 0,
            };
            Ok((run, RunStart::Resumed { position }))
        } else {
            let archive = outputs
                .lnp
                .clone()
                .map(|path| LnpArchive::create(path, metadata))
                .transpose()?;

            info!(n_stars, "batch fit started");
            let run = RunState {
                phase: RunPhase::FreshStart,
                state,
                pending: Vec::new(),
                archive,
                flushes: 0,
            };
            Ok((run, RunStart::Fresh))
        }
    }

    fn process_star(
        &self,
        e: StarIndex,
        flux: &DVector<f64>,
        engine: &SparseLikelihoodEngine<'_>,
        reducer: &StatisticsReducer<'_>,
        run: &mut RunState,
        rng: &mut impl Rng,
    ) -> Result<StarStatistics, SedFitError> {
        let sparse = engine.compute(e, flux)?;
        let stats = reducer.reduce(e, &sparse)?;

        if run.archive.is_some() {
            let kept = match self.params.lnp_npts {
                Some(n) => sparse.subsample(n, rng),
                None => sparse,
            };
            run.pending.push(StoredLikelihood::from_sparse(e, &kept, flux));
        }
        Ok(stats)
    }

    /// Write the full PDF file and summary table, then append the pending archive groups.
    fn flush(&self, run: &mut RunState, e: StarIndex) -> Result<(), SedFitError> {
        run.enter(RunPhase::Flushing);
        let outputs = &self.params.outputs;

        if let Some(path) = &outputs.pdf1d {
            pdf1d_file::write(path, &run.state)?;
        }
        if let Some(path) = &outputs.stats {
            summary_table::write(path, &run.state, &self.ancillary)?;
        }
        if let Some(archive) = run.archive.as_mut() {
            let report = archive.append(&run.pending)?;
            if !report.skipped.is_empty() {
                debug!(skipped = report.skipped.len(), "duplicate likelihood groups skipped");
            }
        }

        info!(star = e, pending_groups = run.pending.len(), "checkpoint written");
        run.pending.clear();
        run.flushes += 1;
        run.enter(RunPhase::Running);
        Ok(())
    }
}
