//! Summary statistics table (Parquet).
//!
//! One row per star, in star order. Columns, in order:
//!
//! * the caller's [`AncillaryColumn`]s, if any;
//! * for each parameter `q`: `q_Best`, `q_Exp`, then `q_p{pct}` for each percentile;
//! * `chi2min` (Float64), `chi2min_indx` (Int64), `Pmax` (Float64), `Pmax_indx` (Int64),
//!   `specgrid_indx` (Int64).
//!
//! The table is rewritten in full from the in-memory [`PosteriorState`] at every flush.
//! On resume it is read back into the state, columns being looked up by name so that
//! ancillary columns are ignored.
use std::sync::Arc;

use arrow_array::{Array, ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use camino::Utf8PathBuf;
use parquet::{
    arrow::ArrowWriter,
    basic::Compression,
    file::properties::WriterProperties,
};

use super::{read_batches, write_replacing, AncillaryColumn, AncillaryValues};
use crate::{
    batch::state::PosteriorState,
    fit_params::percentile_labels,
    sedfit_errors::{Artifact, SedFitError},
};

const ARTIFACT: Artifact = Artifact::SummaryTable;

/// Names of the statistics columns, without the ancillary ones.
pub fn statistics_column_names(parameters: &[String], percentiles: &[f64]) -> Vec<String> {
    let labels = percentile_labels(percentiles);
    let mut names = Vec::with_capacity(parameters.len() * (2 + labels.len()) + 5);
    for q in parameters {
        names.push(format!("{q}_Best"));
        names.push(format!("{q}_Exp"));
        names.extend(labels.iter().map(|l| format!("{q}_{l}")));
    }
    names.extend(
        ["chi2min", "chi2min_indx", "Pmax", "Pmax_indx", "specgrid_indx"].map(String::from),
    );
    names
}

fn as_i64(indices: &[usize]) -> Vec<i64> {
    indices.iter().map(|&i| i as i64).collect()
}

/// Build the record batch of the summary table.
pub fn to_record_batch(
    state: &PosteriorState,
    ancillary: &[AncillaryColumn],
) -> Result<RecordBatch, SedFitError> {
    let mut fields = Vec::new();
    let mut columns: Vec<ArrayRef> = Vec::new();

    for col in ancillary {
        if col.values.len() != state.n_stars() {
            return Err(SedFitError::InvalidFitParameter(format!(
                "ancillary column '{}' has {} values for {} stars",
                col.name,
                col.values.len(),
                state.n_stars()
            )));
        }
        let (dtype, array): (DataType, ArrayRef) = match &col.values {
            AncillaryValues::Float(v) => (DataType::Float64, Arc::new(Float64Array::from(v.clone()))),
            AncillaryValues::Int(v) => (DataType::Int64, Arc::new(Int64Array::from(v.clone()))),
            AncillaryValues::Text(v) => (DataType::Utf8, Arc::new(StringArray::from(v.clone()))),
        };
        fields.push(Field::new(&col.name, dtype, false));
        columns.push(array);
    }

    let float = |values: Vec<f64>| -> ArrayRef { Arc::new(Float64Array::from(values)) };
    let int = |values: Vec<i64>| -> ArrayRef { Arc::new(Int64Array::from(values)) };

    let mut stat_columns = Vec::new();
    for k in 0..state.parameter_names.len() {
        stat_columns.push(float(state.best.column(k).iter().copied().collect()));
        stat_columns.push(float(state.expectation.column(k).iter().copied().collect()));
        let pct = &state.percentile_values[k];
        for i in 0..pct.ncols() {
            stat_columns.push(float(pct.column(i).iter().copied().collect()));
        }
    }
    stat_columns.push(float(state.chi2_min.clone()));
    stat_columns.push(int(as_i64(&state.chi2_min_index)));
    stat_columns.push(float(state.max_lnp.clone()));
    stat_columns.push(int(as_i64(&state.max_lnp_index)));
    stat_columns.push(int(state.specgrid_index.clone()));

    let names = statistics_column_names(&state.parameter_names, &state.percentiles);
    for (name, array) in names.iter().zip(stat_columns) {
        fields.push(Field::new(name, array.data_type().clone(), false));
        columns.push(array);
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Overwrite the summary table at `path` with the content of `state`.
pub fn write(
    path: &Utf8PathBuf,
    state: &PosteriorState,
    ancillary: &[AncillaryColumn],
) -> Result<(), SedFitError> {
    let batch = to_record_batch(state, ancillary)?;
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

fn column<'b, T: Array + 'static>(
    batch: &'b RecordBatch,
    name: &str,
    path: &Utf8PathBuf,
) -> Result<&'b T, SedFitError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| SedFitError::malformed(ARTIFACT, path, format!("missing column '{name}'")))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| SedFitError::malformed(ARTIFACT, path, format!("column '{name}' has an unexpected type")))
}

fn float_column(batches: &[RecordBatch], name: &str, path: &Utf8PathBuf) -> Result<Vec<f64>, SedFitError> {
    let mut out = Vec::new();
    for batch in batches {
        out.extend_from_slice(column::<Float64Array>(batch, name, path)?.values());
    }
    Ok(out)
}

fn int_column(batches: &[RecordBatch], name: &str, path: &Utf8PathBuf) -> Result<Vec<i64>, SedFitError> {
    let mut out = Vec::new();
    for batch in batches {
        out.extend_from_slice(column::<Int64Array>(batch, name, path)?.values());
    }
    Ok(out)
}

fn index_column(batches: &[RecordBatch], name: &str, path: &Utf8PathBuf) -> Result<Vec<usize>, SedFitError> {
    int_column(batches, name, path)?
        .into_iter()
        .map(|v| {
            usize::try_from(v).map_err(|_| {
                SedFitError::malformed(ARTIFACT, path, format!("negative grid index in '{name}'"))
            })
        })
        .collect()
}

/// Load the statistics of a previous run into `state`.
///
/// Return
/// ----------
/// * `Err(SedFitError::MissingResumeArtifact)` if `path` does not exist.
/// * `Err(SedFitError::MalformedArtifact)` if the file cannot be decoded, a statistics
///   column is missing or mistyped, or the row count differs from the number of stars.
pub fn load_into(path: &Utf8PathBuf, state: &mut PosteriorState) -> Result<(), SedFitError> {
    let batches = read_batches(ARTIFACT, path)?;
    let n_rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
    if n_rows != state.n_stars() {
        return Err(SedFitError::malformed(
            ARTIFACT,
            path,
            format!("{n_rows} rows for {} stars", state.n_stars()),
        ));
    }

    let labels = percentile_labels(&state.percentiles);
    for k in 0..state.parameter_names.len() {
        let q = state.parameter_names[k].clone();
        let best = float_column(&batches, &format!("{q}_Best"), path)?;
        let exp = float_column(&batches, &format!("{q}_Exp"), path)?;
        state.best.set_column(k, &nalgebra::DVector::from_vec(best));
        state.expectation.set_column(k, &nalgebra::DVector::from_vec(exp));
        for (i, label) in labels.iter().enumerate() {
            let values = float_column(&batches, &format!("{q}_{label}"), path)?;
            state.percentile_values[k].set_column(i, &nalgebra::DVector::from_vec(values));
        }
    }
    state.chi2_min = float_column(&batches, "chi2min", path)?;
    state.chi2_min_index = index_column(&batches, "chi2min_indx", path)?;
    state.max_lnp = float_column(&batches, "Pmax", path)?;
    state.max_lnp_index = index_column(&batches, "Pmax_indx", path)?;
    state.specgrid_index = int_column(&batches, "specgrid_indx", path)?;
    Ok(())
}

#[cfg(test)]
mod test_summary_table {
    use nalgebra::DMatrix;

    use super::*;
    use crate::{grid::SedGrid, pdf1d::ParameterBinning, stats::StarStatistics, stats::StatisticsReducer};

    fn state(n_stars: usize) -> PosteriorState {
        let grid = SedGrid::new(DMatrix::zeros(2, 1), vec![1.0], vec![1.0; 2])
            .unwrap()
            .with_column("logA", vec![0.0, 1.0])
            .unwrap();
        let reducer = StatisticsReducer::new(
            &grid,
            &[("logA".to_string(), ParameterBinning::default())],
            &[16.0, 50.0, 84.0],
            50,
        )
        .unwrap();
        PosteriorState::new_zeroed(n_stars, &reducer)
    }

    #[test]
    fn test_column_layout() {
        let names = statistics_column_names(&["Av".into(), "logg".into()], &[16.0, 84.0]);
        assert_eq!(
            names,
            vec![
                "Av_Best", "Av_Exp", "Av_p16", "Av_p84", "logg_Best", "logg_Exp", "logg_p16",
                "logg_p84", "chi2min", "chi2min_indx", "Pmax", "Pmax_indx", "specgrid_indx"
            ]
        );

        let batch = to_record_batch(
            &state(2),
            &[AncillaryColumn::text("Name", vec!["a".into(), "b".into()])],
        )
        .unwrap();
        assert_eq!(batch.schema().field(0).name(), "Name");
        assert_eq!(batch.schema().field(1).name(), "logA_Best");
        assert_eq!(batch.num_columns(), 1 + 5 + 5);
        assert_eq!(batch.num_rows(), 2);
    }

    #[test]
    fn test_ancillary_length_mismatch() {
        let err = to_record_batch(&state(2), &[AncillaryColumn::float("RA", vec![1.0])]);
        assert!(matches!(err, Err(SedFitError::InvalidFitParameter(_))));
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("stats.parquet")).unwrap();

        let mut written = state(3);
        written.record(
            1,
            &StarStatistics {
                best: vec![1.0],
                expectation: vec![0.75],
                percentiles: vec![vec![0.2, 0.8, 1.0]],
                pdf1d: vec![vec![0.3, 1.0]],
                chi2_min: 2.5,
                chi2_min_index: 0,
                max_lnp: -4.0,
                max_lnp_index: 1,
                specgrid_index: 11,
            },
        );
        write(&path, &written, &[AncillaryColumn::int("id", vec![7, 8, 9])]).unwrap();

        let mut loaded = state(3);
        load_into(&path, &mut loaded).unwrap();
        // the PDF arrays live in their own artifact
        let mut expected = written.clone();
        expected.pdf1d = loaded.pdf1d.clone();
        assert_eq!(loaded, expected);
        assert_eq!(loaded.resume_position(), 2);

        let mut too_many = state(4);
        assert!(matches!(
            load_into(&path, &mut too_many),
            Err(SedFitError::MalformedArtifact { .. })
        ));
    }
}
