use rand::{rngs::StdRng, SeedableRng};
use sedfit::{
    sedfit_errors::Artifact, BatchFit, FitParams, RunStart, SedFitError,
};

mod common;
use common::{assert_statistics_close, synthetic_survey, utf8_path, BrokenCatalog};

const N_STARS: usize = 10;

fn params(dir: &tempfile::TempDir, resume: bool) -> FitParams {
    FitParams::builder()
        .threshold(-20.0)
        .save_every(3)
        .resume(resume)
        .stats_path(utf8_path(dir, "stats.parquet"))
        .pdf1d_path(utf8_path(dir, "pdf1d.parquet"))
        .lnp_path(utf8_path(dir, "lnp.zip"))
        .build()
        .unwrap()
}

#[test]
fn test_interrupted_then_resumed_matches_single_pass() {
    let (grid, noise, catalog) = synthetic_survey(N_STARS, 11);
    let mut rng = StdRng::seed_from_u64(2);

    let single_dir = tempfile::tempdir().unwrap();
    let single = BatchFit::new(&grid, &catalog, &noise, &params(&single_dir, false))
        .run(&mut rng)
        .unwrap();
    assert_eq!(single.stars_processed, N_STARS);
    // stars 3, 6, 9 and the end of the run
    assert_eq!(single.flushes, 4);

    // first run stops at star 5, after checkpointing stars 0..5
    let dir = tempfile::tempdir().unwrap();
    let broken = BrokenCatalog {
        inner: &catalog,
        broken_star: 5,
    };
    let err = BatchFit::new(&grid, &broken, &noise, &params(&dir, false))
        .run(&mut rng)
        .unwrap_err();
    assert_eq!(
        err,
        SedFitError::BandCountMismatch {
            expected: 3,
            found: 1
        }
    );

    let resumed = BatchFit::new(&grid, &catalog, &noise, &params(&dir, true))
        .run(&mut rng)
        .unwrap();
    assert_eq!(resumed.start, RunStart::Resumed { position: 5 });
    assert_eq!(resumed.stars_processed, N_STARS - 5);

    for e in 0..N_STARS {
        assert_statistics_close(&resumed.state.star(e), &single.state.star(e), 1e-12);
    }
    for k in 0..3 {
        assert_eq!(resumed.state.pdf1d(k), single.state.pdf1d(k));
    }
}

#[test]
fn test_resume_of_complete_run_is_idempotent() {
    let (grid, noise, catalog) = synthetic_survey(4, 21);
    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(3);

    let first = BatchFit::new(&grid, &catalog, &noise, &params(&dir, false))
        .run(&mut rng)
        .unwrap();
    let stats_bytes = std::fs::read(utf8_path(&dir, "stats.parquet")).unwrap();

    let again = BatchFit::new(&grid, &catalog, &noise, &params(&dir, true))
        .run(&mut rng)
        .unwrap();
    assert_eq!(again.start, RunStart::Resumed { position: 4 });
    assert_eq!(again.stars_processed, 0);
    assert_eq!(again.state, first.state);
    assert_eq!(
        std::fs::read(utf8_path(&dir, "stats.parquet")).unwrap(),
        stats_bytes
    );
}

#[test]
fn test_missing_resume_artifacts() {
    let (grid, noise, catalog) = synthetic_survey(3, 4);
    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(0);

    let err = BatchFit::new(&grid, &catalog, &noise, &params(&dir, true))
        .run(&mut rng)
        .unwrap_err();
    assert_eq!(
        err,
        SedFitError::MissingResumeArtifact {
            artifact: Artifact::SummaryTable,
            path: utf8_path(&dir, "stats.parquet"),
        }
    );

    // summary table present, PDF file gone
    BatchFit::new(&grid, &catalog, &noise, &params(&dir, false))
        .run(&mut rng)
        .unwrap();
    std::fs::remove_file(utf8_path(&dir, "pdf1d.parquet")).unwrap();
    let err = BatchFit::new(&grid, &catalog, &noise, &params(&dir, true))
        .run(&mut rng)
        .unwrap_err();
    assert_eq!(
        err,
        SedFitError::MissingResumeArtifact {
            artifact: Artifact::Pdf1d,
            path: utf8_path(&dir, "pdf1d.parquet"),
        }
    );
}
