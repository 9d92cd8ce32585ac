//! Frame-level identification: detector → normalizer → matcher.

use serde::{Deserialize, Serialize};

use crate::detector::{DetectorError, FaceDetector};
use crate::error::PipelineError;
use crate::lbph::LbphParams;
use crate::matcher::{self, DEFAULT_THRESHOLD};
use crate::model_store::TrainedModel;
use crate::normalize::{normalize_crop, FaceCrop};
use crate::source::FrameSource;
use crate::types::{BoundingBox, CandidateDecision, Frame, IdentifyReport, IdentityDecision};

/// Tunables shared by enrollment and identification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Distance at or below which a face matches.
    pub threshold: f64,
    /// Faces narrower or shorter than this (pixels) are ignored.
    pub min_face_size: u32,
    /// Frame budget for the duplicate-identity quick match.
    pub quick_match_attempts: usize,
    /// Samples captured per enrollment.
    pub samples_per_enroll: usize,
    /// Frame budget for capturing enrollment samples.
    pub max_capture_frames: usize,
    /// Frame budget for one identification request.
    pub frames_per_identify: usize,
    pub lbph: LbphParams,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            min_face_size: 80,
            quick_match_attempts: 60,
            samples_per_enroll: 50,
            max_capture_frames: 200,
            frames_per_identify: 30,
            lbph: LbphParams::default(),
        }
    }
}

/// Detected faces large enough to use, in detector order.
pub fn usable_faces<D: FaceDetector + ?Sized>(
    detector: &mut D,
    frame: &Frame,
    min_face_size: u32,
) -> Result<Vec<(BoundingBox, FaceCrop)>, DetectorError> {
    let faces = detector.detect(frame)?;
    let total = faces.len();
    let usable: Vec<_> = faces
        .into_iter()
        .filter(|b| b.is_usable(min_face_size))
        .filter_map(|b| normalize_crop(frame, &b).map(|crop| (b, crop)))
        .collect();
    if usable.len() < total {
        tracing::debug!(detected = total, usable = usable.len(), "dropped small or out-of-frame faces");
    }
    Ok(usable)
}

/// Decide every usable face in `frame`.
pub fn evaluate_frame<D: FaceDetector + ?Sized>(
    detector: &mut D,
    frame: &Frame,
    trained: &TrainedModel,
    threshold: f64,
    min_face_size: u32,
) -> Result<Vec<CandidateDecision>, DetectorError> {
    Ok(usable_faces(detector, frame, min_face_size)?
        .into_iter()
        .map(|(bbox, crop)| CandidateDecision {
            bbox,
            decision: matcher::identify(&crop, trained, threshold),
        })
        .collect())
}

/// The frame's primary decision: the matched candidate with the lowest
/// distance, or Unknown carrying the lowest distance seen.
pub fn primary_decision(candidates: &[CandidateDecision]) -> IdentityDecision {
    let best_matched = candidates
        .iter()
        .filter(|c| c.decision.matched)
        .min_by(|a, b| distance_key(&a.decision).total_cmp(&distance_key(&b.decision)));
    if let Some(best) = best_matched {
        return best.decision.clone();
    }

    let lowest = candidates
        .iter()
        .filter_map(|c| c.decision.confidence)
        .min_by(f64::total_cmp);
    IdentityDecision::unknown(lowest)
}

fn distance_key(decision: &IdentityDecision) -> f64 {
    decision.confidence.unwrap_or(f64::INFINITY)
}

/// Whether `candidate` is a better primary than `current`.
fn improves(candidate: &IdentityDecision, current: &IdentityDecision) -> bool {
    match (candidate.matched, current.matched) {
        (true, false) => true,
        (false, true) => false,
        _ => distance_key(candidate) < distance_key(current),
    }
}

/// Identify whoever `source` shows, examining at most `max_frames` frames.
///
/// Stops at the first frame with a matched face. A source that runs dry or
/// shows no face yields an Unknown primary decision, not an error.
pub fn identify_source<D, S>(
    detector: &mut D,
    source: &mut S,
    trained: &TrainedModel,
    threshold: f64,
    settings: &PipelineSettings,
    max_frames: usize,
) -> Result<IdentifyReport, PipelineError>
where
    D: FaceDetector + ?Sized,
    S: FrameSource + ?Sized,
{
    let mut report = IdentifyReport {
        primary: IdentityDecision::unknown(None),
        candidates: Vec::new(),
        frames_examined: 0,
    };

    while report.frames_examined < max_frames {
        let Some(frame) = source.next_frame()? else {
            break;
        };
        report.frames_examined += 1;

        let candidates = evaluate_frame(detector, &frame, trained, threshold, settings.min_face_size)?;
        if candidates.is_empty() {
            continue;
        }
        let primary = primary_decision(&candidates);
        if report.candidates.is_empty() || improves(&primary, &report.primary) {
            report.primary = primary;
            report.candidates = candidates;
        }
        if report.primary.matched {
            break;
        }
    }

    tracing::info!(
        name = report.primary.display_name(),
        matched = report.primary.matched,
        confidence = ?report.primary.confidence,
        frames = report.frames_examined,
        faces = report.candidates.len(),
        "identification finished"
    );
    Ok(report)
}
