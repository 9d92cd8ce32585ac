//! Persistence for the trained (model, label map) pair.
//!
//! Each training run writes a new generation directory and then swaps the
//! `CURRENT` pointer with an atomic rename:
//!
//! ```text
//! models/
//!   CURRENT                     <- "<generation>"
//!   <generation>/lbph_model.json
//!   <generation>/label_map.json
//! ```
//!
//! A reader resolves `CURRENT` once and reads both files from the same
//! directory, so it sees either the old pair or the new pair. The previous
//! generation is kept on disk for readers that resolved it just before a swap.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::error::StoreError;
use crate::labels::LabelMap;
use crate::lbph::LbphModel;

pub const MODEL_FILE: &str = "lbph_model.json";
pub const LABEL_MAP_FILE: &str = "label_map.json";
const CURRENT_FILE: &str = "CURRENT";
const STAGING_PREFIX: &str = ".staging-";

#[derive(Serialize, Deserialize)]
struct ModelArtifact {
    generation: String,
    trained_at: String,
    model: LbphModel,
}

#[derive(Serialize, Deserialize)]
struct LabelMapArtifact {
    generation: String,
    labels: LabelMap,
}

/// A model together with the label map it was trained against.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub generation: String,
    pub trained_at: String,
    pub model: LbphModel,
    pub labels: LabelMap,
}

/// Directory holding model generations.
#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Generation token `CURRENT` points to, if any model was ever saved.
    pub fn current_generation(&self) -> Result<Option<String>, StoreError> {
        let path = self.root.join(CURRENT_FILE);
        match fs::read_to_string(&path) {
            Ok(token) => Ok(Some(token.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read { path, source }),
        }
    }

    /// Write `model` and `labels` as a new generation and make it current.
    pub fn save(&self, model: LbphModel, labels: LabelMap) -> Result<TrainedModel, StoreError> {
        fs::create_dir_all(&self.root).map_err(|source| StoreError::Write {
            path: self.root.clone(),
            source,
        })?;

        let previous = self.current_generation()?;
        let generation = Uuid::new_v4().to_string();
        let trained_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let model_artifact = ModelArtifact {
            generation: generation.clone(),
            trained_at: trained_at.clone(),
            model,
        };
        let labels_artifact = LabelMapArtifact {
            generation: generation.clone(),
            labels,
        };

        let staging = self.root.join(format!("{STAGING_PREFIX}{generation}"));
        let staged = fs::create_dir(&staging)
            .map_err(|source| StoreError::Write {
                path: staging.clone(),
                source,
            })
            .and_then(|_| write_json(&staging.join(MODEL_FILE), &model_artifact))
            .and_then(|_| write_json(&staging.join(LABEL_MAP_FILE), &labels_artifact))
            .and_then(|_| {
                let target = self.root.join(&generation);
                fs::rename(&staging, &target).map_err(|source| StoreError::Write {
                    path: target,
                    source,
                })
            });
        if let Err(e) = staged {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        self.swap_current(&generation)?;
        tracing::info!(
            generation = %generation,
            samples = model_artifact.model.sample_count(),
            labels = labels_artifact.labels.len(),
            "model generation published"
        );

        self.prune(&generation, previous.as_deref());

        Ok(TrainedModel {
            generation,
            trained_at,
            model: model_artifact.model,
            labels: labels_artifact.labels,
        })
    }

    /// Load the current generation as a pair.
    pub fn load(&self) -> Result<TrainedModel, StoreError> {
        let generation = self
            .current_generation()?
            .ok_or_else(|| StoreError::ModelNotFound(self.root.join(CURRENT_FILE)))?;
        let dir = self.root.join(&generation);

        let model_path = dir.join(MODEL_FILE);
        let model: ModelArtifact =
            read_json(&model_path).map_err(|e| missing_as(e, StoreError::ModelNotFound))?;

        let labels_path = dir.join(LABEL_MAP_FILE);
        let labels: LabelMapArtifact =
            read_json(&labels_path).map_err(|e| missing_as(e, StoreError::LabelMapMissing))?;

        if model.generation != generation || labels.generation != generation {
            return Err(StoreError::GenerationMismatch {
                model: model.generation,
                labels: labels.generation,
            });
        }

        tracing::debug!(generation = %generation, "model generation loaded");
        Ok(TrainedModel {
            generation,
            trained_at: model.trained_at,
            model: model.model,
            labels: labels.labels,
        })
    }

    fn swap_current(&self, generation: &str) -> Result<(), StoreError> {
        let path = self.root.join(CURRENT_FILE);
        let write_err = |source| StoreError::Write {
            path: path.clone(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(&self.root).map_err(write_err)?;
        tmp.write_all(generation.as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;
        Ok(())
    }

    /// Remove generations other than `current` and `previous`, and staging
    /// directories left behind by interrupted saves. Failures only log.
    fn prune(&self, current: &str, previous: Option<&str>) {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let stale_staging = name.starts_with(STAGING_PREFIX);
            if !path.is_dir()
                || (name.starts_with('.') && !stale_staging)
                || name == current
                || Some(name.as_str()) == previous
            {
                continue;
            }
            match fs::remove_dir_all(&path) {
                Ok(()) => tracing::debug!(generation = %name, "pruned old model generation"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to prune model generation"),
            }
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(write_err)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush().map_err(write_err)?;
    writer.get_ref().sync_all().map_err(write_err)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let file = File::open(path).map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Turn a not-found read error into the specific "missing artifact" error.
fn missing_as(err: StoreError, missing: fn(PathBuf) -> StoreError) -> StoreError {
    match err {
        StoreError::Read { path, source } if source.kind() == io::ErrorKind::NotFound => missing(path),
        other => other,
    }
}
