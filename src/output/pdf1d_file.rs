//! 1D marginal PDF file (Parquet).
//!
//! One `List<Float64>` column per parameter, named after the parameter, with
//! `n_stars + 1` rows: row `e` holds the weighted histogram of star `e`, the last row the
//! bin centres. Every list of a column has the bin count of that parameter.
use std::sync::Arc;

use arrow_array::{
    builder::{Float64Builder, ListBuilder},
    Array, ArrayRef, Float64Array, ListArray, RecordBatch,
};
use arrow_schema::{DataType, Field, Schema};
use camino::Utf8PathBuf;
use parquet::{arrow::ArrowWriter, basic::Compression, file::properties::WriterProperties};

use super::{read_batches, write_replacing};
use crate::{
    batch::state::PosteriorState,
    sedfit_errors::{Artifact, SedFitError},
};

const ARTIFACT: Artifact = Artifact::Pdf1d;

/// Build the record batch of the PDF file.
pub fn to_record_batch(state: &PosteriorState) -> Result<RecordBatch, SedFitError> {
    let mut fields = Vec::with_capacity(state.parameter_names.len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(state.parameter_names.len());

    for (name, pdf) in state.parameter_names.iter().zip(&state.pdf1d) {
        let mut lists = ListBuilder::with_capacity(Float64Builder::new(), pdf.nrows());
        for row in pdf.row_iter() {
            lists.values().append_slice(&row.iter().copied().collect::<Vec<_>>());
            lists.append(true);
        }
        fields.push(Field::new(
            name,
            DataType::List(Arc::new(Field::new_list_field(DataType::Float64, true))),
            false,
        ));
        columns.push(Arc::new(lists.finish()));
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Overwrite the PDF file at `path` with the arrays of `state`.
pub fn write(path: &Utf8PathBuf, state: &PosteriorState) -> Result<(), SedFitError> {
    let batch = to_record_batch(state)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    write_replacing(ARTIFACT, path, |file| {
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
        writer.write(&batch)?;
        writer.close()?;
        Ok(())
    })
}

/// Load the star rows of a previous run's PDF file into `state`.
///
/// The bin-centre row of `state` is kept: it is rebuilt from the grid at every run.
///
/// Return
/// ----------
/// * `Err(SedFitError::MissingResumeArtifact)` if `path` does not exist.
/// * `Err(SedFitError::MalformedArtifact)` if a parameter column is missing, the row
///   count is not `n_stars + 1`, or a row width differs from the parameter's bin count.
pub fn load_into(path: &Utf8PathBuf, state: &mut PosteriorState) -> Result<(), SedFitError> {
    let batches = read_batches(ARTIFACT, path)?;
    let n_stars = state.n_stars();
    let n_rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
    if n_rows != n_stars + 1 {
        return Err(SedFitError::malformed(
            ARTIFACT,
            path,
            format!("{n_rows} rows, expected {} stars plus the bin centres", n_stars),
        ));
    }

    for (name, pdf) in state.parameter_names.iter().zip(state.pdf1d.iter_mut()) {
        let n_bins = pdf.ncols();
        let mut e = 0;
        for batch in &batches {
            let lists = batch
                .column_by_name(name)
                .ok_or_else(|| SedFitError::malformed(ARTIFACT, path, format!("missing column '{name}'")))?
                .as_any()
                .downcast_ref::<ListArray>()
                .ok_or_else(|| {
                    SedFitError::malformed(ARTIFACT, path, format!("column '{name}' is not a list column"))
                })?;

            for i in 0..lists.len() {
                if e < n_stars {
                    let row = lists.value(i);
                    let values = row.as_any().downcast_ref::<Float64Array>().ok_or_else(|| {
                        SedFitError::malformed(ARTIFACT, path, format!("column '{name}' is not a Float64 list"))
                    })?;
                    if values.len() != n_bins {
                        return Err(SedFitError::malformed(
                            ARTIFACT,
                            path,
                            format!("'{name}' row {e} has {} bins, expected {n_bins}", values.len()),
                        ));
                    }
                    for (b, &h) in values.values().iter().enumerate() {
                        pdf[(e, b)] = h;
                    }
                }
                e += 1;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test_pdf1d_file {
    use nalgebra::DMatrix;

    use super::*;
    use crate::{grid::SedGrid, pdf1d::ParameterBinning, stats::StatisticsReducer};

    fn state(n_stars: usize, max_nbins: usize) -> PosteriorState {
        let grid = SedGrid::new(DMatrix::zeros(4, 1), vec![1.0], vec![1.0; 4])
            .unwrap()
            .with_column("Av", vec![0.0, 1.0, 2.0, 3.0])
            .unwrap()
            .with_column("M_ini", vec![1.0, 10.0, 10.0, 100.0])
            .unwrap();
        let params = [
            ("Av".to_string(), ParameterBinning::default()),
            ("M_ini".to_string(), ParameterBinning::for_parameter("M_ini")),
        ];
        let reducer = StatisticsReducer::new(&grid, &params, &[50.0], max_nbins).unwrap();
        PosteriorState::new_zeroed(n_stars, &reducer)
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("pdf1d.parquet")).unwrap();

        let mut written = state(2, 50);
        written.pdf1d[0][(1, 2)] = 0.5;
        written.pdf1d[1][(0, 0)] = 1.0;
        write(&path, &written).unwrap();

        let batch = to_record_batch(&written).unwrap();
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.schema().field(1).name(), "M_ini");

        let mut loaded = state(2, 50);
        load_into(&path, &mut loaded).unwrap();
        assert_eq!(loaded.pdf1d, written.pdf1d);
    }

    #[test]
    fn test_shape_checks() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("pdf1d.parquet")).unwrap();
        write(&path, &state(2, 50)).unwrap();

        // wrong star count
        assert!(matches!(
            load_into(&path, &mut state(3, 50)),
            Err(SedFitError::MalformedArtifact { .. })
        ));
        // wrong bin count
        assert!(matches!(
            load_into(&path, &mut state(2, 2)),
            Err(SedFitError::MalformedArtifact { .. })
        ));
    }
}
