use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::detector::DetectorError;
use crate::source::SourceError;

/// Failures reading or writing the dataset and the trained model.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no trained model at {0}; run training first")]
    ModelNotFound(PathBuf),
    #[error("label map missing at {0}; retrain to regenerate the model/label map pair")]
    LabelMapMissing(PathBuf),
    #[error("model generation {model} does not match label map generation {labels}")]
    GenerationMismatch { model: String, labels: String },
    #[error("failed to write sample {path}: {source}")]
    SampleWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode sample {path}: {source}")]
    SampleEncode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} is not a valid model artifact: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Top-level error for the enroll / train / identify entry points.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid identity name '{name}': {reason}")]
    InvalidIdentityName { name: String, reason: String },
    #[error("no training images found; enroll at least one identity before training")]
    NoTrainingData,
    #[error("image source: {0}")]
    Source(#[from] SourceError),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}
