//! Enrollment workflow with the duplicate-identity guard.
//!
//! ```text
//! folder absent  ──────────────────────────────► capture → train → NewEnrollment
//! folder present ─► quick match ─┬─ same name ──► AlreadyRegistered
//!                                ├─ other name ─► RejectedDuplicate
//!                                └─ Unknown ────► capture → train → AppendEnrollment
//! ```
//!
//! The quick match always runs against the model trained before this attempt.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::dataset::DatasetStore;
use crate::detector::FaceDetector;
use crate::error::{PipelineError, StoreError};
use crate::matcher;
use crate::model_store::{ModelStore, TrainedModel};
use crate::pipeline::{usable_faces, PipelineSettings};
use crate::source::FrameSource;
use crate::trainer;
use crate::types::{IdentityDecision, IdentityName, TrainingSummary};

/// When the duplicate-identity guard runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardPolicy {
    /// Only when the identity already has a directory.
    #[default]
    ExistingIdentity,
    /// Always, e.g. when registering someone a verification just reported as Unknown.
    Always,
}

#[derive(Debug, Clone)]
pub struct EnrollRequest {
    pub name: IdentityName,
    pub guard: GuardPolicy,
}

impl EnrollRequest {
    pub fn new(name: IdentityName) -> Self {
        Self {
            name,
            guard: GuardPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EnrollmentOutcome {
    /// First samples for a new identity; the model has been retrained.
    NewEnrollment {
        name: String,
        samples: usize,
        training: TrainingSummary,
    },
    /// More samples for an existing identity; the model has been retrained.
    AppendEnrollment {
        name: String,
        samples: usize,
        training: TrainingSummary,
    },
    /// The face already resolves to the requested name. Nothing written.
    AlreadyRegistered { name: String },
    /// The face resolves to someone else. Nothing written.
    RejectedDuplicate { requested: String, existing: String },
    /// No usable face was seen while capturing. Nothing written.
    NoFaceCaptured { name: String },
}

/// Run one enrollment attempt for `request` using frames from `source`.
///
/// Successful writes are followed by a full training run before returning,
/// so a reported enrollment is already live for matching. If capture or
/// training fails, the samples written by this attempt are removed again,
/// along with the identity directory when this attempt created it.
pub fn enroll<D, S>(
    request: &EnrollRequest,
    detector: &mut D,
    source: &mut S,
    dataset: &DatasetStore,
    models: &ModelStore,
    settings: &PipelineSettings,
) -> Result<EnrollmentOutcome, PipelineError>
where
    D: FaceDetector + ?Sized,
    S: FrameSource + ?Sized,
{
    let name = &request.name;
    let exists = dataset.contains(name);
    tracing::info!(identity = %name, exists, guard = ?request.guard, "enrollment started");

    if exists || request.guard == GuardPolicy::Always {
        let decision = match models.load() {
            Ok(trained) => quick_match(detector, source, &trained, settings)?,
            Err(StoreError::ModelNotFound(path)) => {
                tracing::warn!(path = %path.display(), "no trained model yet; duplicate guard has nothing to compare against");
                IdentityDecision::unknown(None)
            }
            Err(e) => return Err(e.into()),
        };
        source.restart();

        match decision.name {
            Some(existing) if existing == name.as_str() => {
                if exists {
                    tracing::info!(identity = %name, confidence = ?decision.confidence, "already registered");
                    return Ok(EnrollmentOutcome::AlreadyRegistered { name: existing });
                }
            }
            Some(existing) => {
                tracing::warn!(
                    requested = %name,
                    existing = %existing,
                    confidence = ?decision.confidence,
                    "enrollment rejected: face belongs to another identity"
                );
                return Ok(EnrollmentOutcome::RejectedDuplicate {
                    requested: name.to_string(),
                    existing,
                });
            }
            None => {}
        }
    }

    let mut written = Vec::new();
    let captured = capture_samples(name, detector, source, dataset, settings, &mut written)
        .and_then(|()| {
            if written.is_empty() {
                return Ok(None);
            }
            trainer::train(dataset, models, settings.lbph).map(|(_, summary)| Some(summary))
        });
    let training = match captured {
        Ok(Some(training)) => training,
        Ok(None) => {
            tracing::warn!(identity = %name, "no usable face captured");
            return Ok(EnrollmentOutcome::NoFaceCaptured {
                name: name.to_string(),
            });
        }
        Err(e) => {
            tracing::warn!(identity = %name, error = %e, written = written.len(), "enrollment aborted");
            dataset.discard(name, &written, !exists);
            return Err(e);
        }
    };

    let samples = written.len();
    let name = name.to_string();
    Ok(if exists {
        EnrollmentOutcome::AppendEnrollment {
            name,
            samples,
            training,
        }
    } else {
        EnrollmentOutcome::NewEnrollment {
            name,
            samples,
            training,
        }
    })
}

/// Bounded single-shot identification used by the guard.
///
/// Looks at the primary face of up to `quick_match_attempts` frames and
/// returns the first matched decision; Unknown when the budget or the
/// source runs out first.
pub fn quick_match<D, S>(
    detector: &mut D,
    source: &mut S,
    trained: &TrainedModel,
    settings: &PipelineSettings,
) -> Result<IdentityDecision, PipelineError>
where
    D: FaceDetector + ?Sized,
    S: FrameSource + ?Sized,
{
    let mut lowest: Option<f64> = None;
    for _ in 0..settings.quick_match_attempts {
        let Some(frame) = source.next_frame()? else {
            break;
        };
        let Some((_, crop)) = usable_faces(detector, &frame, settings.min_face_size)?
            .into_iter()
            .next()
        else {
            continue;
        };

        let decision = matcher::identify(&crop, trained, settings.threshold);
        if decision.matched {
            tracing::debug!(name = decision.display_name(), confidence = ?decision.confidence, "quick match hit");
            return Ok(decision);
        }
        if let Some(d) = decision.confidence {
            lowest = Some(lowest.map_or(d, |l| l.min(d)));
        }
    }
    Ok(IdentityDecision::unknown(lowest))
}

/// Capture primary-face crops into the dataset, recording each written path.
///
/// Any failure stops the capture; `written` still lists what reached disk so
/// the caller can roll it back.
fn capture_samples<D, S>(
    name: &IdentityName,
    detector: &mut D,
    source: &mut S,
    dataset: &DatasetStore,
    settings: &PipelineSettings,
    written: &mut Vec<PathBuf>,
) -> Result<(), PipelineError>
where
    D: FaceDetector + ?Sized,
    S: FrameSource + ?Sized,
{
    for _ in 0..settings.max_capture_frames {
        if written.len() >= settings.samples_per_enroll {
            break;
        }
        let Some(frame) = source.next_frame()? else {
            break;
        };
        if let Some((_, crop)) = usable_faces(detector, &frame, settings.min_face_size)?
            .into_iter()
            .next()
        {
            written.push(dataset.append(name, &crop)?);
        }
    }
    tracing::info!(identity = %name, samples = written.len(), "capture finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::WholeFrameDetector;
    use crate::source::StillFrames;
    use crate::types::Frame;
    use tempfile::TempDir;

    fn stripes(period: u32) -> Frame {
        let data = (0..200u32 * 200)
            .map(|i| if (i % 200 / period) % 2 == 0 { 40 } else { 210 })
            .collect();
        Frame { data, width: 200, height: 200 }
    }

    fn setup(tmp: &TempDir) -> (DatasetStore, ModelStore) {
        (
            DatasetStore::new(tmp.path().join("faces")),
            ModelStore::new(tmp.path().join("models")),
        )
    }

    fn request(name: &str) -> EnrollRequest {
        EnrollRequest::new(IdentityName::parse(name).unwrap())
    }

    #[test]
    fn test_new_enrollment_writes_and_trains() {
        let tmp = TempDir::new().unwrap();
        let (dataset, models) = setup(&tmp);
        let mut source = StillFrames::new(vec![stripes(4); 3]);

        let outcome = enroll(
            &request("alice"),
            &mut WholeFrameDetector,
            &mut source,
            &dataset,
            &models,
            &PipelineSettings::default(),
        )
        .unwrap();

        match outcome {
            EnrollmentOutcome::NewEnrollment { name, samples, training } => {
                assert_eq!(name, "alice");
                assert_eq!(samples, 3);
                assert_eq!(training.people, 1);
                assert_eq!(training.images, 3);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(models.load().unwrap().labels.name(0), Some("alice"));
    }

    #[test]
    fn test_capture_respects_sample_budget() {
        let tmp = TempDir::new().unwrap();
        let (dataset, models) = setup(&tmp);
        let settings = PipelineSettings { samples_per_enroll: 2, ..Default::default() };
        let mut source = StillFrames::new(vec![stripes(4); 5]);

        enroll(&request("alice"), &mut WholeFrameDetector, &mut source, &dataset, &models, &settings).unwrap();
        assert_eq!(dataset.sample_count("alice").unwrap(), 2);
    }

    #[test]
    fn test_small_faces_are_not_captured() {
        let tmp = TempDir::new().unwrap();
        let (dataset, models) = setup(&tmp);
        let tiny = Frame { data: vec![128; 50 * 50], width: 50, height: 50 };
        let mut source = StillFrames::new(vec![tiny]);

        let outcome = enroll(
            &request("alice"),
            &mut WholeFrameDetector,
            &mut source,
            &dataset,
            &models,
            &PipelineSettings::default(),
        )
        .unwrap();
        assert_eq!(outcome, EnrollmentOutcome::NoFaceCaptured { name: "alice".into() });
        assert!(!dataset.contains(&IdentityName::parse("alice").unwrap()));
        assert!(models.current_generation().unwrap().is_none());
    }

    #[test]
    fn test_existing_folder_without_model_appends() {
        let tmp = TempDir::new().unwrap();
        let (dataset, models) = setup(&tmp);
        std::fs::create_dir_all(dataset.identity_dir("alice")).unwrap();
        let mut source = StillFrames::new(vec![stripes(4)]);

        let outcome = enroll(
            &request("alice"),
            &mut WholeFrameDetector,
            &mut source,
            &dataset,
            &models,
            &PipelineSettings::default(),
        )
        .unwrap();
        assert!(matches!(outcome, EnrollmentOutcome::AppendEnrollment { samples: 1, .. }));
    }

    /// Whole-frame detector that fails on call number `fail_on`.
    struct FlakyDetector {
        calls: usize,
        fail_on: usize,
    }

    impl FaceDetector for FlakyDetector {
        fn detect(&mut self, frame: &Frame) -> Result<Vec<crate::types::BoundingBox>, crate::detector::DetectorError> {
            self.calls += 1;
            if self.calls == self.fail_on {
                return Err(crate::detector::DetectorError::InferenceFailed("device lost".into()));
            }
            WholeFrameDetector.detect(frame)
        }
    }

    #[test]
    fn test_failed_capture_removes_new_identity() {
        let tmp = TempDir::new().unwrap();
        let (dataset, models) = setup(&tmp);
        let mut detector = FlakyDetector { calls: 0, fail_on: 3 };
        let mut source = StillFrames::new(vec![stripes(4); 5]);

        let result = enroll(&request("alice"), &mut detector, &mut source, &dataset, &models, &PipelineSettings::default());

        assert!(matches!(result, Err(PipelineError::Detector(_))));
        assert!(!dataset.contains(&IdentityName::parse("alice").unwrap()));
        assert!(models.current_generation().unwrap().is_none());
    }

    #[test]
    fn test_failed_capture_keeps_existing_samples() {
        let tmp = TempDir::new().unwrap();
        let (dataset, models) = setup(&tmp);
        let alice = IdentityName::parse("alice").unwrap();
        let flat = image::GrayImage::from_pixel(200, 200, image::Luma([90]));
        let crop = crate::normalize::normalize_image(&image::DynamicImage::ImageLuma8(flat));
        let kept = dataset.append(&alice, &crop).unwrap();

        // No model yet, so the guard is skipped and capture starts at call one.
        let mut detector = FlakyDetector { calls: 0, fail_on: 2 };
        let mut source = StillFrames::new(vec![stripes(4); 3]);
        let result = enroll(&request("alice"), &mut detector, &mut source, &dataset, &models, &PipelineSettings::default());

        assert!(result.is_err());
        assert_eq!(dataset.list_samples("alice").unwrap(), vec![kept]);
        assert!(models.current_generation().unwrap().is_none());
    }

    #[test]
    fn test_quick_match_gives_up_after_budget() {
        let tmp = TempDir::new().unwrap();
        let (dataset, models) = setup(&tmp);
        let mut source = StillFrames::new(vec![stripes(4)]);
        enroll(&request("alice"), &mut WholeFrameDetector, &mut source, &dataset, &models, &PipelineSettings::default())
            .unwrap();
        let trained = models.load().unwrap();

        // A face-less source never matches and never blocks.
        let mut empty = StillFrames::new(Vec::new());
        let decision = quick_match(&mut WholeFrameDetector, &mut empty, &trained, &PipelineSettings::default()).unwrap();
        assert_eq!(decision, IdentityDecision::unknown(None));
    }

    #[test]
    fn test_outcome_json_is_tagged() {
        let outcome = EnrollmentOutcome::RejectedDuplicate {
            requested: "bob".into(),
            existing: "alice".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "rejected_duplicate");
        assert_eq!(json["existing"], "alice");
    }
}
