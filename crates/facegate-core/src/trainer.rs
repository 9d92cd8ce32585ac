//! Full retraining from the dataset. There is no incremental update: every
//! run rebuilds the label map and the model from all stored samples.

use crate::dataset::DatasetStore;
use crate::error::PipelineError;
use crate::labels::LabelMap;
use crate::lbph::{LbphModel, LbphParams};
use crate::model_store::{ModelStore, TrainedModel};
use crate::normalize::FaceCrop;
use crate::types::TrainingSummary;

/// Train on everything in `dataset` and publish the result to `models`.
///
/// Fails with [`PipelineError::NoTrainingData`] before anything is written
/// when no identity has a decodable sample, leaving the previous generation
/// in place.
pub fn train(
    dataset: &DatasetStore,
    models: &ModelStore,
    params: LbphParams,
) -> Result<(TrainedModel, TrainingSummary), PipelineError> {
    let identities = dataset.list_identities()?;
    let labels = LabelMap::from_identities(identities.iter().cloned());

    let mut samples: Vec<(FaceCrop, u32)> = Vec::new();
    for (label, name) in labels.iter() {
        let crops = dataset.load_samples(name)?;
        tracing::debug!(identity = name, label, samples = crops.len(), "collected training samples");
        samples.extend(crops.into_iter().map(|crop| (crop, label)));
    }

    if samples.is_empty() {
        tracing::warn!(identities = labels.len(), "training aborted: no samples in dataset");
        return Err(PipelineError::NoTrainingData);
    }

    let model = LbphModel::train(params, samples.iter().map(|(crop, label)| (crop, *label)));
    let trained = models.save(model, labels)?;

    let summary = TrainingSummary {
        people: trained.labels.len(),
        images: samples.len(),
        generation: trained.generation.clone(),
        trained_at: trained.trained_at.clone(),
    };
    tracing::info!(
        people = summary.people,
        images = summary.images,
        generation = %summary.generation,
        "training complete"
    );
    Ok((trained, summary))
}
