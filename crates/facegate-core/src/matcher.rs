//! Turns a raw model distance into an identity decision.

use crate::labels::LabelMap;
use crate::model_store::TrainedModel;
use crate::normalize::FaceCrop;
use crate::types::{IdentityDecision, MatchResult};

/// Default distance threshold. A face matches when its distance is at or below it.
pub const DEFAULT_THRESHOLD: f64 = 75.0;

/// Score `crop` against `trained` and apply `threshold`.
pub fn identify(crop: &FaceCrop, trained: &TrainedModel, threshold: f64) -> IdentityDecision {
    decide(trained.model.predict(crop), &trained.labels, threshold)
}

/// Apply the decision rule to a raw model result.
///
/// Matched only when `distance <= threshold` and the label exists in the
/// map. For anything else the nearest name is dropped; a far "match" is not
/// evidence of identity and must not reach the caller.
pub fn decide(result: Option<MatchResult>, labels: &LabelMap, threshold: f64) -> IdentityDecision {
    let Some(MatchResult { label, distance }) = result else {
        return IdentityDecision::unknown(None);
    };

    match labels.name(label) {
        Some(name) if distance <= threshold => IdentityDecision {
            name: Some(name.to_string()),
            confidence: Some(distance),
            matched: true,
        },
        _ => IdentityDecision::unknown(Some(distance)),
    }
}
