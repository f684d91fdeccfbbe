//! # Sparse likelihood archive (ZIP)
//!
//! The archive keeps, for every processed star, the projection of its sparse likelihood
//! that was selected for persistence (all retained rows, or a fixed-size random subset).
//!
//! ## Layout
//! -----------------
//! | entry              | content                                        |
//! |--------------------|------------------------------------------------|
//! | `grid_waves`       | model wavelength axis, little-endian `f64`     |
//! | `obs_filters`      | observed filter names, JSON string list        |
//! | `star_{e}/input`   | observed flux of star `e`, little-endian `f64` |
//! | `star_{e}/idx`     | sparse grid rows, little-endian `i64`          |
//! | `star_{e}/lnp`     | log posterior, little-endian `f32`             |
//! | `star_{e}/chi2`    | chi-square, little-endian `f32`                |
//!
//! The two metadata entries are written once, when the archive is created. Star groups are
//! only ever appended.
//!
//! ## Recovery
//! -----------------
//! A previous run killed while appending can leave an archive whose central directory
//! cannot be read. [`LnpArchive::append`] does not fail in that case: it switches to a
//! fallback archive next to the primary one (`lnp` replaced by `lnp_partial` in the file
//! name, or a `_partial` suffix on the stem), creates it with the same metadata if needed,
//! and keeps appending there for the rest of the run. The outcome is reported as an
//! [`ArchiveLocation`].
//!
//! A group that already exists in the archive (a star flushed twice) is skipped, never
//! written a second time.
use std::{
    collections::HashSet,
    fs::{self, File, OpenOptions},
    io::{Read, Write},
};

use camino::{Utf8Path, Utf8PathBuf};
use nalgebra::DVector;
use tracing::{debug, info, warn};
use zip::{
    write::{FileOptions, ZipWriter},
    CompressionMethod, ZipArchive,
};

use super::star_group_name;
use crate::{
    constants::StarIndex,
    likelihood::SparseLikelihood,
    sedfit_errors::{Artifact, SedFitError},
};

const ARTIFACT: Artifact = Artifact::LikelihoodArchive;
const GRID_WAVES: &str = "grid_waves";
const OBS_FILTERS: &str = "obs_filters";

/// Global metadata stored at the archive root.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LnpMetadata {
    pub grid_waves: Vec<f64>,
    pub filters: Vec<String>,
}

/// Persisted projection of the sparse likelihood of one star.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredLikelihood {
    pub star: StarIndex,
    pub input: Vec<f64>,
    pub grid_indices: Vec<i64>,
    pub lnp: Vec<f32>,
    pub chi2: Vec<f32>,
}

impl StoredLikelihood {
    /// Reduced-precision copy of a sparse likelihood, with the observed flux.
    pub fn from_sparse(star: StarIndex, sparse: &SparseLikelihood, input: &DVector<f64>) -> Self {
        StoredLikelihood {
            star,
            input: input.iter().copied().collect(),
            grid_indices: sparse.grid_indices.iter().map(|&i| i as i64).collect(),
            lnp: sparse.lnp.iter().map(|&v| v as f32).collect(),
            chi2: sparse.chi2.iter().map(|&v| v as f32).collect(),
        }
    }
}

/// Where star groups are currently being appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveLocation {
    Primary(Utf8PathBuf),
    Fallback(Utf8PathBuf),
}

impl ArchiveLocation {
    pub fn path(&self) -> &Utf8Path {
        match self {
            ArchiveLocation::Primary(p) | ArchiveLocation::Fallback(p) => p,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ArchiveLocation::Fallback(_))
    }
}

/// Outcome of one [`LnpArchive::append`].
#[derive(Debug, Clone, PartialEq)]
pub struct AppendReport {
    pub written: Vec<StarIndex>,
    /// Stars whose group already existed.
    pub skipped: Vec<StarIndex>,
    pub location: ArchiveLocation,
}

/// Path of the archive used when `primary` cannot be read.
pub fn fallback_path(primary: &Utf8Path) -> Utf8PathBuf {
    let name = primary.file_name().unwrap_or_default();
    let fallback_name = if name.contains("lnp") {
        name.replacen("lnp", "lnp_partial", 1)
    } else {
        match (primary.file_stem(), primary.extension()) {
            (Some(stem), Some(ext)) => format!("{stem}_partial.{ext}"),
            (Some(stem), None) => format!("{stem}_partial"),
            _ => "lnp_partial".to_string(),
        }
    };
    primary.with_file_name(fallback_name)
}

fn entry_options() -> FileOptions<'static, ()> {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644)
}

fn encode<const N: usize, T: Copy>(values: &[T], to: fn(T) -> [u8; N]) -> Vec<u8> {
    values.iter().flat_map(|&v| to(v)).collect()
}

fn decode<const N: usize, T>(bytes: &[u8], from: fn([u8; N]) -> T) -> Option<Vec<T>> {
    if bytes.len() % N != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(N)
            .map(|chunk| {
                let mut buf = [0u8; N];
                buf.copy_from_slice(chunk);
                from(buf)
            })
            .collect(),
    )
}

/// Write a new archive holding only the metadata, replacing any file at `path`.
fn create_with_metadata(path: &Utf8PathBuf, metadata: &LnpMetadata) -> Result<(), SedFitError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| SedFitError::artifact_io(ARTIFACT, path, e))?;
    }
    let file = File::create(path).map_err(|e| SedFitError::artifact_io(ARTIFACT, path, e))?;
    let mut zip = ZipWriter::new(file);
    let options = entry_options();

    zip.start_file(GRID_WAVES, options)?;
    zip.write_all(&encode(&metadata.grid_waves, f64::to_le_bytes))?;
    zip.start_file(OBS_FILTERS, options)?;
    zip.write_all(serde_json::to_string(&metadata.filters)?.as_bytes())?;
    zip.finish()?;
    Ok(())
}

/// Star groups present in an archive, or the reason it cannot be read.
fn existing_groups(file: &File) -> Result<HashSet<String>, String> {
    let archive = ZipArchive::new(file).map_err(|e| e.to_string())?;
    Ok(archive
        .file_names()
        .filter_map(|name| name.split_once('/').map(|(group, _)| group.to_string()))
        .collect())
}

enum Opened {
    Ready(File, HashSet<String>),
    Unreadable(String),
}

fn open_for_append(path: &Utf8PathBuf, metadata: &LnpMetadata) -> Result<Opened, SedFitError> {
    if !path.exists() {
        info!(path = %path, "creating likelihood archive");
        create_with_metadata(path, metadata)?;
    }
    let file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(f) => f,
        Err(e) => return Ok(Opened::Unreadable(e.to_string())),
    };
    Ok(match existing_groups(&file) {
        Ok(groups) => Opened::Ready(file, groups),
        Err(reason) => Opened::Unreadable(reason),
    })
}

/// Append-only writer of the likelihood archive of a run.
#[derive(Debug, Clone)]
pub struct LnpArchive {
    primary: Utf8PathBuf,
    location: ArchiveLocation,
    metadata: LnpMetadata,
}

impl LnpArchive {
    /// Start a fresh archive at `path`: any previous file is replaced by one holding only
    /// the metadata.
    pub fn create(path: Utf8PathBuf, metadata: LnpMetadata) -> Result<Self, SedFitError> {
        create_with_metadata(&path, &metadata)?;
        Ok(LnpArchive {
            location: ArchiveLocation::Primary(path.clone()),
            primary: path,
            metadata,
        })
    }

    /// Continue the archive of a previous run. Nothing is read or written until the first
    /// append; a missing archive is then created with `metadata`.
    pub fn attach(path: Utf8PathBuf, metadata: LnpMetadata) -> Self {
        LnpArchive {
            location: ArchiveLocation::Primary(path.clone()),
            primary: path,
            metadata,
        }
    }

    pub fn location(&self) -> &ArchiveLocation {
        &self.location
    }

    /// Append star groups, skipping those already present.
    ///
    /// Return
    /// ----------
    /// * An [`AppendReport`] with the written and skipped stars and the archive used.
    /// * `Err(SedFitError::LikelihoodArchiveUnavailable)` if neither the primary nor the
    ///   fallback archive can be read.
    pub fn append(&mut self, groups: &[StoredLikelihood]) -> Result<AppendReport, SedFitError> {
        let mut report = AppendReport {
            written: Vec::new(),
            skipped: Vec::new(),
            location: self.location.clone(),
        };
        if groups.is_empty() {
            return Ok(report);
        }

        let path = self.location.path().to_path_buf();
        let (file, mut present) = match open_for_append(&path, &self.metadata)? {
            Opened::Ready(file, present) => (file, present),
            Opened::Unreadable(reason) if !self.location.is_fallback() => {
                let fallback = fallback_path(&self.primary);
                warn!(
                    primary = %self.primary,
                    fallback = %fallback,
                    reason = %reason,
                    "likelihood archive unreadable, switching to fallback"
                );
                match open_for_append(&fallback, &self.metadata)? {
                    Opened::Ready(file, present) => {
                        self.location = ArchiveLocation::Fallback(fallback);
                        report.location = self.location.clone();
                        (file, present)
                    }
                    Opened::Unreadable(reason) => {
                        return Err(SedFitError::LikelihoodArchiveUnavailable {
                            primary: self.primary.clone(),
                            fallback,
                            reason,
                        })
                    }
                }
            }
            Opened::Unreadable(reason) => {
                return Err(SedFitError::LikelihoodArchiveUnavailable {
                    primary: self.primary.clone(),
                    fallback: path,
                    reason,
                })
            }
        };

        let mut zip = ZipWriter::new_append(file)?;
        let options = entry_options();
        for group in groups {
            let name = star_group_name(group.star);
            if !present.insert(name.clone()) {
                debug!(star = group.star, "likelihood group already archived, skipped");
                report.skipped.push(group.star);
                continue;
            }

            zip.start_file(format!("{name}/input"), options)?;
            zip.write_all(&encode(&group.input, f64::to_le_bytes))?;
            zip.start_file(format!("{name}/idx"), options)?;
            zip.write_all(&encode(&group.grid_indices, i64::to_le_bytes))?;
            zip.start_file(format!("{name}/lnp"), options)?;
            zip.write_all(&encode(&group.lnp, f32::to_le_bytes))?;
            zip.start_file(format!("{name}/chi2"), options)?;
            zip.write_all(&encode(&group.chi2, f32::to_le_bytes))?;
            report.written.push(group.star);
        }
        zip.finish()?;

        Ok(report)
    }
}

/// Read access to a likelihood archive.
pub struct LnpArchiveReader {
    path: Utf8PathBuf,
    archive: ZipArchive<File>,
}

impl LnpArchiveReader {
    pub fn open(path: impl Into<Utf8PathBuf>) -> Result<Self, SedFitError> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| SedFitError::artifact_io(ARTIFACT, &path, e))?;
        let archive =
            ZipArchive::new(file).map_err(|e| SedFitError::malformed(ARTIFACT, &path, e.to_string()))?;
        Ok(LnpArchiveReader { path, archive })
    }

    fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, SedFitError> {
        let mut entry = self
            .archive
            .by_name(name)
            .map_err(|_| SedFitError::malformed(ARTIFACT, &self.path, format!("missing entry '{name}'")))?;
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .map_err(|e| SedFitError::artifact_io(ARTIFACT, &self.path, e))?;
        Ok(data)
    }

    fn read_values<const N: usize, T>(
        &mut self,
        name: &str,
        from: fn([u8; N]) -> T,
    ) -> Result<Vec<T>, SedFitError> {
        let bytes = self.read_entry(name)?;
        decode(&bytes, from).ok_or_else(|| {
            SedFitError::malformed(ARTIFACT, &self.path, format!("entry '{name}' has a truncated value"))
        })
    }

    pub fn metadata(&mut self) -> Result<LnpMetadata, SedFitError> {
        let grid_waves = self.read_values(GRID_WAVES, f64::from_le_bytes)?;
        let filters = serde_json::from_slice(&self.read_entry(OBS_FILTERS)?)?;
        Ok(LnpMetadata { grid_waves, filters })
    }

    /// Stars with a group in the archive, in increasing order.
    pub fn stars(&self) -> Vec<StarIndex> {
        let mut stars: Vec<StarIndex> = self
            .archive
            .file_names()
            .filter_map(|name| name.split_once('/'))
            .filter_map(|(group, _)| group.strip_prefix("star_")?.parse().ok())
            .collect();
        stars.sort_unstable();
        stars.dedup();
        stars
    }

    pub fn star(&mut self, e: StarIndex) -> Result<StoredLikelihood, SedFitError> {
        let name = star_group_name(e);
        Ok(StoredLikelihood {
            star: e,
            input: self.read_values(&format!("{name}/input"), f64::from_le_bytes)?,
            grid_indices: self.read_values(&format!("{name}/idx"), i64::from_le_bytes)?,
            lnp: self.read_values(&format!("{name}/lnp"), f32::from_le_bytes)?,
            chi2: self.read_values(&format!("{name}/chi2"), f32::from_le_bytes)?,
        })
    }
}

#[cfg(test)]
mod test_lnp_archive {
    use super::*;

    fn metadata() -> LnpMetadata {
        LnpMetadata {
            grid_waves: vec![0.45, 0.55, 0.8],
            filters: vec!["F475W".into(), "F555W".into(), "F814W".into()],
        }
    }

    fn group(star: StarIndex) -> StoredLikelihood {
        StoredLikelihood {
            star,
            input: vec![1.0, 2.0, f64::NAN],
            grid_indices: vec![3, 8],
            lnp: vec![-1.5, -2.25],
            chi2: vec![0.5, 2.0],
        }
    }

    fn tmp_path(dir: &tempfile::TempDir, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
    }

    #[test]
    fn test_fallback_path() {
        assert_eq!(
            fallback_path(Utf8Path::new("out/run_lnp.zip")),
            Utf8PathBuf::from("out/run_lnp_partial.zip")
        );
        assert_eq!(
            fallback_path(Utf8Path::new("out/likelihood.zip")),
            Utf8PathBuf::from("out/likelihood_partial.zip")
        );
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = tmp_path(&dir, "lnp.zip");
        let mut archive = LnpArchive::create(path.clone(), metadata()).unwrap();

        let report = archive.append(&[group(0), group(1)]).unwrap();
        assert_eq!(report.written, vec![0, 1]);
        assert_eq!(report.location, ArchiveLocation::Primary(path.clone()));

        // a second flush of the same stars writes nothing
        let report = archive.append(&[group(1), group(2)]).unwrap();
        assert_eq!(report.written, vec![2]);
        assert_eq!(report.skipped, vec![1]);

        let mut reader = LnpArchiveReader::open(&path).unwrap();
        assert_eq!(reader.metadata().unwrap(), metadata());
        assert_eq!(reader.stars(), vec![0, 1, 2]);
        let stored = reader.star(2).unwrap();
        assert_eq!(stored.grid_indices, vec![3, 8]);
        assert_eq!(stored.lnp, vec![-1.5, -2.25]);
        assert!(stored.input[2].is_nan());
    }

    #[test]
    fn test_corrupted_archive_switches_to_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = tmp_path(&dir, "lnp.zip");
        fs::write(&path, b"truncated by a crash").unwrap();

        let mut archive = LnpArchive::attach(path.clone(), metadata());
        let report = archive.append(&[group(4)]).unwrap();
        let fallback = tmp_path(&dir, "lnp_partial.zip");
        assert_eq!(report.location, ArchiveLocation::Fallback(fallback.clone()));
        assert_eq!(report.written, vec![4]);

        // the run stays on the fallback archive
        let report = archive.append(&[group(5)]).unwrap();
        assert!(report.location.is_fallback());

        let mut reader = LnpArchiveReader::open(&fallback).unwrap();
        assert_eq!(reader.metadata().unwrap(), metadata());
        assert_eq!(reader.stars(), vec![4, 5]);
        assert_eq!(fs::read(&path).unwrap(), b"truncated by a crash");
    }

    #[test]
    fn test_both_archives_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = tmp_path(&dir, "lnp.zip");
        fs::write(&path, b"garbage").unwrap();
        fs::write(tmp_path(&dir, "lnp_partial.zip"), b"garbage").unwrap();

        let mut archive = LnpArchive::attach(path.clone(), metadata());
        assert_eq!(
            archive.append(&[group(0)]).unwrap_err(),
            SedFitError::LikelihoodArchiveUnavailable {
                primary: path,
                fallback: tmp_path(&dir, "lnp_partial.zip"),
                reason: String::new(),
            }
        );
    }

    #[test]
    fn test_attach_creates_missing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = tmp_path(&dir, "nested/lnp.zip");
        let mut archive = LnpArchive::attach(path.clone(), metadata());
        assert!(!path.exists());

        // nothing pending: no file is touched
        archive.append(&[]).unwrap();
        assert!(!path.exists());

        archive.append(&[group(0)]).unwrap();
        assert_eq!(LnpArchiveReader::open(&path).unwrap().stars(), vec![0]);
    }
}
