use std::fmt;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::constants::StarIndex;

/// The three persisted outputs of a batch fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    SummaryTable,
    Pdf1d,
    LikelihoodArchive,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Artifact::SummaryTable => write!(f, "summary statistics table"),
            Artifact::Pdf1d => write!(f, "1D PDF file"),
            Artifact::LikelihoodArchive => write!(f, "sparse likelihood archive"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SedFitError {
    #[error("Key \"{0}\" not recognized as a model grid column")]
    UnknownParameter(String),

    #[error("Invalid fit parameter: {0}")]
    InvalidFitParameter(String),

    #[error("Inconsistent model grid: {0}")]
    InconsistentGrid(String),

    #[error("Observed flux has {found} bands but the model grid has {expected}")]
    BandCountMismatch { expected: usize, found: usize },

    #[error("No model grid row has a positive prior weight")]
    EmptyPrior,

    #[error("No finite log-likelihood for star {0}")]
    NoFiniteLikelihood(StarIndex),

    #[error("Sparse likelihood of star {0} is empty")]
    EmptySparseLikelihood(StarIndex),

    #[error("Resume requested but the {artifact} is missing at {path}")]
    MissingResumeArtifact {
        artifact: Artifact,
        path: Utf8PathBuf,
    },

    #[error("Malformed {artifact} at {path}: {reason}")]
    MalformedArtifact {
        artifact: Artifact,
        path: Utf8PathBuf,
        reason: String,
    },

    #[error("I/O failure on the {artifact} at {path}: {source}")]
    ArtifactIo {
        artifact: Artifact,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Likelihood archive unusable at {primary} and at fallback {fallback}: {reason}")]
    LikelihoodArchiveUnavailable {
        primary: Utf8PathBuf,
        fallback: Utf8PathBuf,
        reason: String,
    },

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow_schema::ArrowError),

    #[error("Zip archive error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl SedFitError {
    pub(crate) fn artifact_io(artifact: Artifact, path: &Utf8PathBuf, source: std::io::Error) -> Self {
        SedFitError::ArtifactIo {
            artifact,
            path: path.clone(),
            source,
        }
    }

    pub(crate) fn malformed(artifact: Artifact, path: &Utf8PathBuf, reason: impl Into<String>) -> Self {
        SedFitError::MalformedArtifact {
            artifact,
            path: path.clone(),
            reason: reason.into(),
        }
    }
}

impl PartialEq for SedFitError {
    fn eq(&self, other: &Self) -> bool {
        use SedFitError::*;
        match (self, other) {
            (UnknownParameter(a), UnknownParameter(b)) => a == b,
            (InvalidFitParameter(a), InvalidFitParameter(b)) => a == b,
            (InconsistentGrid(a), InconsistentGrid(b)) => a == b,
            (
                BandCountMismatch {
                    expected: e1,
                    found: f1,
                },
                BandCountMismatch {
                    expected: e2,
                    found: f2,
                },
            ) => e1 == e2 && f1 == f2,
            (NoFiniteLikelihood(a), NoFiniteLikelihood(b)) => a == b,
            (EmptySparseLikelihood(a), EmptySparseLikelihood(b)) => a == b,
            (
                MissingResumeArtifact {
                    artifact: a1,
                    path: p1,
                },
                MissingResumeArtifact {
                    artifact: a2,
                    path: p2,
                },
            ) => a1 == a2 && p1 == p2,
            (
                MalformedArtifact {
                    artifact: a1,
                    path: p1,
                    ..
                },
                MalformedArtifact {
                    artifact: a2,
                    path: p2,
                    ..
                },
            ) => a1 == a2 && p1 == p2,
            (
                ArtifactIo {
                    artifact: a1,
                    path: p1,
                    ..
                },
                ArtifactIo {
                    artifact: a2,
                    path: p2,
                    ..
                },
            ) => a1 == a2 && p1 == p2,
            (
                LikelihoodArchiveUnavailable {
                    primary: p1,
                    fallback: f1,
                    ..
                },
                LikelihoodArchiveUnavailable {
                    primary: p2,
                    fallback: f2,
                    ..
                },
            ) => p1 == p2 && f1 == f2,

            // Wrapped library errors are not comparable: same variant means equal
            (IoError(_), IoError(_)) => true,
            (ParquetError(_), ParquetError(_)) => true,
            (ArrowError(_), ArrowError(_)) => true,
            (ZipError(_), ZipError(_)) => true,
            (JsonError(_), JsonError(_)) => true,

            (EmptyPrior, EmptyPrior) => true,

            _ => false,
        }
    }
}
