//! # Persisted artifacts of a batch fit
//!
//! A batch run produces three artifacts, joined by the star index `e` (row position) or
//! by parameter name. Each one is optional and checkpointed independently.
//!
//! Modules
//! -----------------
//! * [`summary_table`] – one row per star: `{param}_Best`, `{param}_Exp`,
//!   `{param}_p{pct}`, `chi2min`, `chi2min_indx`, `Pmax`, `Pmax_indx`, `specgrid_indx`,
//!   preceded by optional caller-supplied [`AncillaryColumn`]s (Parquet, full overwrite).
//! * [`pdf1d_file`] – one `List<Float64>` column per parameter, `n_stars + 1` rows, the
//!   last one holding the bin centres (Parquet, full overwrite).
//! * [`lnp_archive`] – global metadata plus one `star_{e}` group per star with its
//!   (possibly subsampled) sparse likelihood (ZIP, append-only).
//!
//! Full-overwrite artifacts are written to a temporary sibling file and renamed over the
//! destination, so an interruption during a flush leaves the previous version intact.
use std::fs;

use arrow_array::RecordBatch;
use camino::{Utf8Path, Utf8PathBuf};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::{
    constants::StarIndex,
    sedfit_errors::{Artifact, SedFitError},
};

pub mod lnp_archive;
pub mod pdf1d_file;
pub mod summary_table;

/// Values of a caller-supplied column of the summary table.
#[derive(Debug, Clone, PartialEq)]
pub enum AncillaryValues {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Text(Vec<String>),
}

impl AncillaryValues {
    pub fn len(&self) -> usize {
        match self {
            AncillaryValues::Float(v) => v.len(),
            AncillaryValues::Int(v) => v.len(),
            AncillaryValues::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Extra per-star column (star name, coordinates, input photometry...) written before the
/// statistics columns of the summary table.
#[derive(Debug, Clone, PartialEq)]
pub struct AncillaryColumn {
    pub name: String,
    pub values: AncillaryValues,
}

impl AncillaryColumn {
    pub fn float(name: impl Into<String>, values: Vec<f64>) -> Self {
        AncillaryColumn {
            name: name.into(),
            values: AncillaryValues::Float(values),
        }
    }

    pub fn int(name: impl Into<String>, values: Vec<i64>) -> Self {
        AncillaryColumn {
            name: name.into(),
            values: AncillaryValues::Int(values),
        }
    }

    pub fn text(name: impl Into<String>, values: Vec<String>) -> Self {
        AncillaryColumn {
            name: name.into(),
            values: AncillaryValues::Text(values),
        }
    }
}

/// Name of the group holding star `e` in the likelihood archive.
pub fn star_group_name(e: StarIndex) -> String {
    format!("star_{e}")
}

fn temp_sibling(path: &Utf8Path) -> Utf8PathBuf {
    let name = path.file_name().unwrap_or("artifact");
    path.with_file_name(format!(".{name}.tmp"))
}

/// Write an artifact through a temporary sibling file renamed over `path` on success.
pub(crate) fn write_replacing<F>(
    artifact: Artifact,
    path: &Utf8PathBuf,
    write: F,
) -> Result<(), SedFitError>
where
    F: FnOnce(fs::File) -> Result<(), SedFitError>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| SedFitError::artifact_io(artifact, path, e))?;
    }

    let tmp = temp_sibling(path);
    let file = fs::File::create(&tmp).map_err(|e| SedFitError::artifact_io(artifact, path, e))?;
    if let Err(err) = write(file) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    fs::rename(&tmp, path).map_err(|e| SedFitError::artifact_io(artifact, path, e))
}

/// Open an artifact needed to resume a run.
pub(crate) fn open_for_resume(artifact: Artifact, path: &Utf8PathBuf) -> Result<fs::File, SedFitError> {
    fs::File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => SedFitError::MissingResumeArtifact {
            artifact,
            path: path.clone(),
        },
        _ => SedFitError::artifact_io(artifact, path, e),
    })
}

/// Read every record batch of a Parquet artifact needed for resuming.
pub(crate) fn read_batches(
    artifact: Artifact,
    path: &Utf8PathBuf,
) -> Result<Vec<RecordBatch>, SedFitError> {
    let file = open_for_resume(artifact, path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .and_then(|builder| builder.build())
        .map_err(|e| SedFitError::malformed(artifact, path, e.to_string()))?;
    reader
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SedFitError::malformed(artifact, path, e.to_string()))
}

#[cfg(test)]
mod test_output {
    use super::*;

    #[test]
    fn test_temp_sibling() {
        assert_eq!(
            temp_sibling(Utf8Path::new("run/stats.parquet")),
            Utf8PathBuf::from("run/.stats.parquet.tmp")
        );
    }

    #[test]
    fn test_failed_write_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("stats.parquet")).unwrap();
        fs::write(&path, b"previous").unwrap();

        let err = write_replacing(Artifact::SummaryTable, &path, |_| {
            Err(SedFitError::InvalidFitParameter("boom".into()))
        });
        assert!(err.is_err());
        assert_eq!(fs::read(&path).unwrap(), b"previous");
        assert!(!temp_sibling(&path).exists());
    }

    #[test]
    fn test_missing_resume_artifact() {
        let path = Utf8PathBuf::from("/nonexistent/dir/pdf1d.parquet");
        assert_eq!(
            open_for_resume(Artifact::Pdf1d, &path).unwrap_err(),
            SedFitError::MissingResumeArtifact {
                artifact: Artifact::Pdf1d,
                path
            }
        );
    }
}
