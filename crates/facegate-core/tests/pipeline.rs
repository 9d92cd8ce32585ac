use std::fs;

use facegate_core::detector::DetectorError;
use facegate_core::{
    enroll, identify_source, train, BoundingBox, DatasetStore, EnrollRequest, EnrollmentOutcome,
    FaceDetector, Frame, FrameSource, GuardPolicy, IdentifyReport, IdentityName, ModelStore, PipelineError,
    PipelineSettings, SourceError, StillFrames, StoreError, TrainedModel, WholeFrameDetector,
};
use tempfile::TempDir;

const SIZE: u32 = 200;

/// Diagonal triangle-wave texture. Its periods divide the LBPH cell size, so
/// phase shifts and brightness offsets leave the histograms unchanged.
fn alice(shift: u32, bias: u8) -> Frame {
    texture(|x, y| {
        let t = (x + 2 * y + shift) % 12;
        let tri = if t < 6 { t } else { 12 - t };
        (30 + tri * 30) as u8 + bias
    })
}

fn bob(shift: u32) -> Frame {
    texture(|x, y| {
        let t = (3 * x + y + shift) % 12;
        if t < 4 {
            20
        } else if t < 8 {
            120
        } else {
            230
        }
    })
}

/// Hash noise, unlike any enrolled texture.
fn stranger(seed: u32) -> Frame {
    texture(|x, y| {
        let mut h = x.wrapping_mul(374_761_393) ^ y.wrapping_mul(668_265_263) ^ seed.wrapping_mul(2_246_822_519);
        h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
        (h >> 24) as u8
    })
}

fn texture(f: impl Fn(u32, u32) -> u8) -> Frame {
    let mut data = Vec::with_capacity((SIZE * SIZE) as usize);
    for y in 0..SIZE {
        for x in 0..SIZE {
            data.push(f(x, y));
        }
    }
    Frame { data, width: SIZE, height: SIZE }
}

struct Fixture {
    _tmp: TempDir,
    dataset: DatasetStore,
    models: ModelStore,
    settings: PipelineSettings,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        Self {
            dataset: DatasetStore::new(tmp.path().join("faces")),
            models: ModelStore::new(tmp.path().join("models")),
            settings: PipelineSettings::default(),
            _tmp: tmp,
        }
    }

    fn enroll(&self, name: &str, frames: Vec<Frame>) -> EnrollmentOutcome {
        self.enroll_with(name, GuardPolicy::ExistingIdentity, frames)
    }

    fn enroll_with(&self, name: &str, guard: GuardPolicy, frames: Vec<Frame>) -> EnrollmentOutcome {
        let request = EnrollRequest {
            name: IdentityName::parse(name).unwrap(),
            guard,
        };
        let mut source = StillFrames::new(frames);
        enroll(
            &request,
            &mut WholeFrameDetector,
            &mut source,
            &self.dataset,
            &self.models,
            &self.settings,
        )
        .unwrap()
    }

    fn trained(&self) -> TrainedModel {
        self.models.load().unwrap()
    }

    fn identify(&self, frame: Frame, threshold: f64) -> IdentifyReport {
        self.identify_with(&mut WholeFrameDetector, frame, threshold)
    }

    fn identify_with<D: FaceDetector>(&self, detector: &mut D, frame: Frame, threshold: f64) -> IdentifyReport {
        let mut source = StillFrames::new(vec![frame]);
        identify_source(detector, &mut source, &self.trained(), threshold, &self.settings, 1).unwrap()
    }

    fn samples(&self, name: &str) -> usize {
        self.dataset.sample_count(name).unwrap()
    }
}

#[test]
fn end_to_end_enroll_train_identify() {
    let fx = Fixture::new();
    let frames = (0..5).map(|i| alice(i, 0)).collect();
    assert!(matches!(
        fx.enroll("alice", frames),
        EnrollmentOutcome::NewEnrollment { samples: 5, .. }
    ));

    let (_, summary) = train(&fx.dataset, &fx.models, fx.settings.lbph).unwrap();
    assert_eq!(summary.people, 1);
    assert_eq!(summary.images, 5);

    let report = fx.identify(alice(7, 10), 75.0);
    assert!(report.primary.matched);
    assert_eq!(report.primary.name.as_deref(), Some("alice"));

    let report = fx.identify(stranger(1), 75.0);
    assert!(!report.primary.matched);
    assert_eq!(report.primary.name, None);
    assert_eq!(report.primary.display_name(), "Unknown");
}

#[test]
fn stored_samples_identify_as_their_owner() {
    let fx = Fixture::new();
    fx.enroll("alice", vec![alice(0, 0), alice(3, 5)]);
    fx.enroll("bob", vec![bob(0), bob(2)]);
    let trained = fx.trained();

    for name in ["alice", "bob"] {
        for crop in fx.dataset.load_samples(name).unwrap() {
            let decision = facegate_core::matcher::identify(&crop, &trained, 1_000.0);
            assert!(decision.matched);
            assert_eq!(decision.name.as_deref(), Some(name));
        }
    }
}

#[test]
fn identity_without_samples_is_never_returned() {
    let fx = Fixture::new();
    fs::create_dir_all(fx.dataset.identity_dir("carol")).unwrap();
    fx.enroll("alice", vec![alice(0, 0)]);
    fx.enroll("bob", vec![bob(0)]);

    let trained = fx.trained();
    assert_eq!(trained.labels.label("carol"), Some(2));

    for frame in [alice(1, 0), bob(3), stranger(5), stranger(6)] {
        let report = fx.identify(frame, f64::MAX);
        assert_ne!(report.primary.name.as_deref(), Some("carol"));
    }
}

#[test]
fn decreasing_threshold_never_creates_a_match() {
    let fx = Fixture::new();
    fx.enroll("alice", vec![alice(0, 0)]);

    let mut previous = true;
    for threshold in [f64::MAX, 300.0, 150.0, 75.0, 10.0, 0.0] {
        let matched = fx.identify(stranger(9), threshold).primary.matched;
        assert!(previous || !matched);
        previous = matched;
    }
    assert!(fx.identify(stranger(9), f64::MAX).primary.matched);
    assert!(!fx.identify(stranger(9), 75.0).primary.matched);
}

#[test]
fn training_twice_gives_identical_label_map() {
    let fx = Fixture::new();
    fx.enroll("bob", vec![bob(0)]);
    fx.enroll("alice", vec![alice(0, 0)]);

    let (first, _) = train(&fx.dataset, &fx.models, fx.settings.lbph).unwrap();
    let (second, _) = train(&fx.dataset, &fx.models, fx.settings.lbph).unwrap();
    assert_eq!(first.labels, second.labels);
    assert_eq!(second.labels.name(0), Some("alice"));
    assert_eq!(second.labels.name(1), Some("bob"));
}

#[test]
fn empty_dataset_training_keeps_previous_model() {
    let fx = Fixture::new();
    assert!(matches!(
        train(&fx.dataset, &fx.models, fx.settings.lbph),
        Err(PipelineError::NoTrainingData)
    ));
    assert!(matches!(fx.models.load(), Err(StoreError::ModelNotFound(_))));

    fx.enroll("alice", vec![alice(0, 0)]);
    let before = fx.trained().generation;
    fs::remove_dir_all(fx.dataset.identity_dir("alice")).unwrap();

    assert!(matches!(
        train(&fx.dataset, &fx.models, fx.settings.lbph),
        Err(PipelineError::NoTrainingData)
    ));
    assert_eq!(fx.trained().generation, before);
}

#[test]
fn re_enrolling_same_face_is_already_registered() {
    let fx = Fixture::new();
    fx.enroll("alice", vec![alice(0, 0), alice(1, 0)]);
    let generation = fx.trained().generation;

    let outcome = fx.enroll("alice", vec![alice(4, 3)]);
    assert_eq!(outcome, EnrollmentOutcome::AlreadyRegistered { name: "alice".into() });
    assert_eq!(fx.samples("alice"), 2);
    assert_eq!(fx.trained().generation, generation);
}

#[test]
fn enrolling_someone_else_under_existing_name_is_rejected() {
    let fx = Fixture::new();
    fx.enroll("alice", vec![alice(0, 0)]);
    fx.enroll("bob", vec![bob(0)]);

    let outcome = fx.enroll("bob", vec![alice(2, 0)]);
    assert_eq!(
        outcome,
        EnrollmentOutcome::RejectedDuplicate {
            requested: "bob".into(),
            existing: "alice".into(),
        }
    );
    assert_eq!(fx.samples("bob"), 1);
}

#[test]
fn unknown_face_under_existing_name_appends_and_retrains() {
    let fx = Fixture::new();
    fx.enroll("alice", vec![alice(0, 0)]);
    let generation = fx.trained().generation;

    let outcome = fx.enroll("alice", vec![stranger(3), stranger(4)]);
    match outcome {
        EnrollmentOutcome::AppendEnrollment { samples, training, .. } => {
            assert_eq!(samples, 2);
            assert_eq!(training.images, 3);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(fx.samples("alice"), 3);
    assert_ne!(fx.trained().generation, generation);
}

#[test]
fn always_guard_rejects_new_name_for_known_face() {
    let fx = Fixture::new();
    fx.enroll("alice", vec![alice(0, 0)]);

    let outcome = fx.enroll_with("mallory", GuardPolicy::Always, vec![alice(5, 0)]);
    assert!(matches!(outcome, EnrollmentOutcome::RejectedDuplicate { ref existing, .. } if existing == "alice"));
    assert!(!fx.dataset.identity_dir("mallory").exists());

    let outcome = fx.enroll_with("bob", GuardPolicy::Always, vec![bob(0)]);
    assert!(matches!(outcome, EnrollmentOutcome::NewEnrollment { .. }));
}

#[test]
fn new_name_skips_guard_by_default() {
    let fx = Fixture::new();
    fx.enroll("alice", vec![alice(0, 0)]);

    // Without the guard a brand-new name has nothing to conflict with.
    let outcome = fx.enroll("alicia", vec![alice(1, 0)]);
    assert!(matches!(outcome, EnrollmentOutcome::NewEnrollment { samples: 1, .. }));
}

/// Reports the right half first, then the left half, of a 400x200 frame.
struct TwoFaces;

impl FaceDetector for TwoFaces {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
        let half = |x: f32| BoundingBox { x, y: 0.0, width: 200.0, height: 200.0, confidence: 0.9 };
        Ok(vec![half(200.0), half(0.0)])
    }
}

fn side_by_side(left: &Frame, right: &Frame) -> Frame {
    let mut data = Vec::with_capacity((2 * SIZE * SIZE) as usize);
    for y in 0..SIZE as usize {
        let row = y * SIZE as usize..(y + 1) * SIZE as usize;
        data.extend_from_slice(&left.data[row.clone()]);
        data.extend_from_slice(&right.data[row]);
    }
    Frame { data, width: 2 * SIZE, height: SIZE }
}

#[test]
fn best_matched_face_wins_and_others_are_reported() {
    let fx = Fixture::new();
    fx.enroll("alice", vec![alice(0, 0)]);

    let frame = side_by_side(&alice(3, 0), &stranger(2));
    let report = fx.identify_with(&mut TwoFaces, frame, 75.0);

    assert_eq!(report.candidates.len(), 2);
    assert!(!report.candidates[0].decision.matched);
    assert_eq!(report.candidates[0].decision.name, None);
    assert!(report.candidates[1].decision.matched);
    assert_eq!(report.primary.name.as_deref(), Some("alice"));
}

/// Yields its frames, then reports the camera as gone.
struct DroppingCamera {
    frames: Vec<Frame>,
}

impl FrameSource for DroppingCamera {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.frames.is_empty() {
            return Err(SourceError::DeviceUnavailable("/dev/video0 disconnected".into()));
        }
        Ok(Some(self.frames.remove(0)))
    }
}

#[test]
fn camera_lost_mid_capture_leaves_dataset_and_model_untouched() {
    let fx = Fixture::new();
    fx.enroll("alice", vec![alice(0, 0)]);
    let before = fx.trained().generation;

    let request = EnrollRequest::new(IdentityName::parse("bob").unwrap());
    let mut camera = DroppingCamera { frames: vec![bob(0), bob(2)] };
    let result = enroll(
        &request,
        &mut WholeFrameDetector,
        &mut camera,
        &fx.dataset,
        &fx.models,
        &fx.settings,
    );

    assert!(matches!(result, Err(PipelineError::Source(SourceError::DeviceUnavailable(_)))));
    assert!(!fx.dataset.identity_dir("bob").exists());
    assert_eq!(fx.dataset.list_identities().unwrap(), vec!["alice"]);
    assert_eq!(fx.trained().generation, before);

    // The retry is a fresh enrollment, not an append to a half-written folder.
    assert!(matches!(
        fx.enroll("bob", vec![bob(0), bob(2)]),
        EnrollmentOutcome::NewEnrollment { samples: 2, .. }
    ));
}
